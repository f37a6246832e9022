//! plcsim - Modbus/TCP PLC simulator and poller
//!
//! `serve` exposes an in-memory register bank as a Modbus server; `poll`
//! reads holding registers from any Modbus server at a fixed interval.

mod shutdown;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scada_modbus::config::{load_config_from_env, load_config_from_file};
use scada_modbus::exception::describe;
use scada_modbus::logging::{init_logging, LogConfig};
use scada_modbus::{
    ClientConfig, MemoryRegisters, ModbusClient, ModbusConfirmation, ModbusServer, ServerConfig,
};
use tracing::{error, info, warn};

use crate::shutdown::wait_for_shutdown;

#[derive(Parser)]
#[command(name = "plcsim")]
#[command(about = "Modbus/TCP PLC simulator and polling client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log filter directive, e.g. info or scada_modbus=debug
    #[arg(short, long, global = true, default_value = "info", env = "PLCSIM_LOG_LEVEL")]
    log_level: String,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve an in-memory register bank
    Serve {
        /// Listen port (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,

        /// Log every frame
        #[arg(short, long)]
        debug: bool,

        /// Number of coils and discrete inputs from address 0
        #[arg(long, default_value_t = 1000)]
        bits: u16,

        /// Number of holding and input registers from address 0
        #[arg(long, default_value_t = 1000)]
        registers: u16,
    },

    /// Poll holding registers from a Modbus server
    Poll {
        /// Server host (overrides the config file)
        #[arg(long)]
        host: Option<String>,

        /// Server port (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,

        /// First register address
        #[arg(short, long, default_value_t = 0)]
        address: u16,

        /// Number of registers per read
        #[arg(short, long, default_value_t = 10)]
        quantity: u16,

        /// Delay between reads
        #[arg(short, long, default_value_t = 1000)]
        interval_ms: u64,

        /// Stop after this many reads
        #[arg(long)]
        count: Option<u64>,

        /// Log every frame
        #[arg(short, long)]
        debug: bool,
    },
}

fn load<T>(path: Option<&Path>) -> Result<T>
where
    T: for<'de> serde::Deserialize<'de> + serde::Serialize + Default,
{
    let config = match path {
        Some(path) => load_config_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => load_config_from_env()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(&LogConfig::default().with_level(cli.log_level.as_str()))?;

    match cli.command {
        Commands::Serve {
            port,
            debug,
            bits,
            registers,
        } => {
            let mut config: ServerConfig = load(cli.config.as_deref())?;
            if let Some(port) = port {
                config.port = port;
            }
            config.debug |= debug;
            config.validate()?;
            serve(config, bits, registers).await
        },
        Commands::Poll {
            host,
            port,
            address,
            quantity,
            interval_ms,
            count,
            debug,
        } => {
            let mut config: ClientConfig = load(cli.config.as_deref())?;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            config.debug |= debug;
            config.validate()?;
            poll(config, address, quantity, Duration::from_millis(interval_ms), count).await
        },
    }
}

async fn serve(config: ServerConfig, bits: u16, registers: u16) -> Result<()> {
    let bank = Arc::new(MemoryRegisters::new(0, bits, 0, registers).with_debug(config.debug));
    let server = ModbusServer::new(config, bank);
    let address = server.listen().await?;
    info!(
        "Simulating PLC on {} with {} bits and {} registers",
        address, bits, registers
    );

    let signal = wait_for_shutdown().await;
    info!("{} received, stopping the simulator", signal);
    server.shutdown();
    Ok(())
}

/// Logs every confirmation the poller receives
struct LogConfirmation;

impl ModbusConfirmation for LogConfirmation {
    fn on_holding_registers(&self, transaction_id: u16, address: u16, registers: &[u16]) {
        info!("[{}] {}: {:?}", transaction_id, address, registers);
    }

    fn on_exception(&self, transaction_id: u16, function_code: u8, address: u16, exception_code: u8) {
        warn!(
            "[{}] function 0x{:02X} at {} failed: {} (0x{:02X})",
            transaction_id,
            function_code,
            address,
            describe(exception_code),
            exception_code
        );
    }

    fn on_abandoned(&self, transaction_id: u16, function_code: u8) {
        warn!(
            "[{}] function 0x{:02X} abandoned on disconnect",
            transaction_id, function_code
        );
    }
}

async fn poll(
    config: ClientConfig,
    address: u16,
    quantity: u16,
    interval: Duration,
    count: Option<u64>,
) -> Result<()> {
    info!(
        "Polling {} registers at {} from {}",
        quantity,
        address,
        config.address()
    );
    let client = ModbusClient::new(config, Arc::new(LogConfirmation));
    client.connect()?;

    let mut ticker = tokio::time::interval(interval);
    let mut issued = 0u64;
    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        if count.is_some_and(|count| issued >= count) {
            break;
        }

        tokio::select! {
            signal = &mut shutdown => {
                info!("{} received, stopping the poller", signal);
                break;
            },
            _ = ticker.tick() => {
                if let Err(e) = client.read_holding_registers(address, quantity) {
                    error!("Failed to issue read: {}", e);
                    break;
                }
                issued += 1;
            },
        }
    }

    // Give the last confirmation a chance to arrive
    if count.is_some() {
        tokio::time::sleep(interval.min(Duration::from_secs(1))).await;
    }
    info!("Issued {} read(s)", issued);
    Ok(())
}
