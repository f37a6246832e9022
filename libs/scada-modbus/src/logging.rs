//! Logging setup for hosts of the Modbus engine
//!
//! The engine itself only emits `tracing` events. Binaries call
//! [`init_logging`] once to route them to the console and, optionally, to a
//! daily-rolling file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::error::{ModbusError, Result};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `scada_modbus=debug,info`
    pub level: String,
    /// Enable console output
    pub console: bool,
    /// Log file path, rolled daily
    pub file: Option<String>,
    pub format: LogFormat,
    /// Enable ANSI colors in console output
    pub ansi: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// `timestamp [LEVEL] message`
    Bracketed,
    Json,
    Pretty,
    Compact,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
            file: None,
            format: LogFormat::Bracketed,
            ansi: true,
        }
    }
}

impl LogConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }
}

/// Bracketed tag and ANSI color for a level
fn level_style(level: Level) -> (&'static str, &'static str) {
    match level {
        Level::TRACE => ("[TRACE]", "\x1b[35m"),
        Level::DEBUG => ("[DEBUG]", "\x1b[34m"),
        Level::INFO => ("[INFO]", "\x1b[32m"),
        Level::WARN => ("[WARN]", "\x1b[33m"),
        Level::ERROR => ("[ERROR]", "\x1b[31m"),
    }
}

/// `timestamp [LEVEL] target: message`
///
/// The target names the engine module (`scada_modbus::client`,
/// `scada_modbus::server`) so client and server traces can be told apart
/// when one process runs both.
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let (tag, color) = level_style(*metadata.level());
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");

        if writer.has_ansi_escapes() {
            write!(writer, "{} {}{}\x1b[0m ", timestamp, color, tag)?;
        } else {
            write!(writer, "{} {} ", timestamp, tag)?;
        }
        write!(writer, "{}: ", metadata.target())?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn build_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| ModbusError::config(format!("Invalid log level: {}", e)))
}

fn build_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_ansi(ansi);
    match format {
        LogFormat::Bracketed => layer.event_format(BracketedLevelFormat).boxed(),
        LogFormat::Json => layer.json().with_target(true).boxed(),
        LogFormat::Pretty => layer.pretty().with_target(true).boxed(),
        LogFormat::Compact => layer.compact().with_target(true).boxed(),
    }
}

/// Initialize logging with the given configuration
///
/// Returns a guard that must be kept alive for file logging to work
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if config.console {
        let layer = build_layer(config.format, std::io::stdout, config.ansi);
        layers.push(layer.with_filter(build_filter(&config.level)?).boxed());
    }

    if let Some(file_path) = &config.file {
        let path = Path::new(file_path);
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(directory)?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("plcsim.log");
        let file_appender = tracing_appender::rolling::daily(directory, file_name);
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(file_guard);

        let layer = build_layer(config.format, non_blocking, false);
        layers.push(layer.with_filter(build_filter(&config.level)?).boxed());
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| ModbusError::config(format!("Failed to initialize logging: {}", e)))?;

    Ok(guard)
}
