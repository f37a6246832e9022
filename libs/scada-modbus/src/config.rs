//! Client and server configuration
//!
//! Files are TOML, YAML or JSON (picked by extension) and may be overridden
//! by `SCADA_MODBUS_`-prefixed environment variables, e.g.
//! `SCADA_MODBUS_PORT=1502` or `SCADA_MODBUS_RETRY__MAX_MS=5000`.

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::constants::{MODBUS_TCP_DEFAULT_PORT, MODBUS_TCP_SLAVE};
use crate::error::{ModbusError, Result};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "SCADA_MODBUS_";

/// Reconnection pacing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RetryPolicy {
    /// Retry as soon as the previous attempt failed
    Immediate,
    /// Double the delay after every failure, up to `max_ms`
    Exponential {
        #[serde(default = "default_initial_ms")]
        initial_ms: u64,
        #[serde(default = "default_max_ms")]
        max_ms: u64,
    },
}

fn default_initial_ms() -> u64 {
    1000
}

fn default_max_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Exponential {
            initial_ms: default_initial_ms(),
            max_ms: default_max_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay before reconnection attempt number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            RetryPolicy::Immediate => Duration::ZERO,
            RetryPolicy::Exponential { initial_ms, max_ms } => {
                let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
                Duration::from_millis(initial_ms.saturating_mul(factor).min(max_ms))
            },
        }
    }
}

/// Modbus client settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// PLC host name or address
    pub host: String,
    pub port: u16,
    /// Unit identifier expected in every confirmation
    pub unit_id: u8,
    /// Per-frame tracing
    pub debug: bool,
    /// First transaction identifier issued by the default generator
    pub transaction_start: u16,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: MODBUS_TCP_DEFAULT_PORT,
            unit_id: MODBUS_TCP_SLAVE,
            debug: false,
            transaction_start: 1,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ModbusError::config("host must not be empty"));
        }
        Ok(())
    }
}

/// Standard device identification objects 0x00-0x06
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceIdentification {
    pub vendor_name: String,
    pub product_code: String,
    pub revision: String,
    pub vendor_url: Option<String>,
    pub product_name: Option<String>,
    pub model_name: Option<String>,
    pub user_application_name: Option<String>,
}

impl Default for DeviceIdentification {
    fn default() -> Self {
        Self {
            vendor_name: "SCADA".to_string(),
            product_code: "PLCSIM".to_string(),
            revision: env!("CARGO_PKG_VERSION").to_string(),
            vendor_url: None,
            product_name: None,
            model_name: None,
            user_application_name: None,
        }
    }
}

/// Modbus server settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Unit identifier this server answers to
    pub unit_id: u8,
    pub debug: bool,
    pub identification: DeviceIdentification,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: MODBUS_TCP_DEFAULT_PORT,
            unit_id: MODBUS_TCP_SLAVE,
            debug: false,
            identification: DeviceIdentification::default(),
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bind_address.trim().is_empty() {
            return Err(ModbusError::config("bind_address must not be empty"));
        }
        if self.identification.vendor_name.is_empty() {
            return Err(ModbusError::config("identification.vendor_name is mandatory"));
        }
        Ok(())
    }
}

/// Load configuration from a specific file, then apply environment overrides
pub fn load_config_from_file<T, P>(path: P) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Serialize + Default,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ModbusError::config("Config file must have an extension"))?;

    let figment = Figment::from(Serialized::defaults(T::default()));
    let figment = match extension {
        "toml" => figment.merge(Toml::file(path)),
        "yaml" | "yml" => figment.merge(Yaml::file(path)),
        "json" => figment.merge(Json::file(path)),
        _ => {
            return Err(ModbusError::Config(format!(
                "Unsupported config file format: {}",
                extension
            )))
        },
    };

    figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ModbusError::Config(format!("Failed to load configuration from file: {}", e)))
}

/// Defaults plus environment overrides, for runs without a config file
pub fn load_config_from_env<T>() -> Result<T>
where
    T: for<'de> Deserialize<'de> + Serialize + Default,
{
    Figment::from(Serialized::defaults(T::default()))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ModbusError::Config(format!("Failed to load configuration: {}", e)))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_client_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.port, 502);
        assert_eq!(config.unit_id, 0xFF);
        assert_eq!(config.transaction_start, 1);
        assert!(!config.debug);
        assert_eq!(
            config.retry,
            RetryPolicy::Exponential {
                initial_ms: 1000,
                max_ms: 30_000
            }
        );
    }

    #[test]
    fn test_retry_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(1000));
        assert_eq!(policy.delay(1), Duration::from_millis(2000));
        assert_eq!(policy.delay(4), Duration::from_millis(16_000));
        assert_eq!(policy.delay(5), Duration::from_millis(30_000));
        assert_eq!(policy.delay(200), Duration::from_millis(30_000));
        assert_eq!(RetryPolicy::Immediate.delay(7), Duration::ZERO);
    }

    #[test]
    fn test_load_client_toml() {
        let file = write_config(
            ".toml",
            r#"
host = "10.0.0.7"
port = 1502
unit_id = 1
debug = true

[retry]
kind = "exponential"
max_ms = 5000
"#,
        );

        let config: ClientConfig = load_config_from_file(file.path()).unwrap();
        assert_eq!(config.host, "10.0.0.7");
        assert_eq!(config.port, 1502);
        assert_eq!(config.unit_id, 1);
        assert!(config.debug);
        assert_eq!(config.transaction_start, 1);
        assert_eq!(
            config.retry,
            RetryPolicy::Exponential {
                initial_ms: 1000,
                max_ms: 5000
            }
        );
        assert_eq!(config.address(), "10.0.0.7:1502");
    }

    #[test]
    fn test_load_server_yaml() {
        let file = write_config(
            ".yaml",
            r#"
port: 5020
identification:
  vendor_name: "Acme"
  product_code: "PLC-1"
  revision: "2.1"
  model_name: "X100"
"#,
        );

        let config: ServerConfig = load_config_from_file(file.path()).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.port, 5020);
        assert_eq!(config.identification.vendor_name, "Acme");
        assert_eq!(config.identification.model_name.as_deref(), Some("X100"));
        assert_eq!(config.identification.vendor_url, None);
        config.validate().unwrap();
    }

    #[test]
    fn test_unsupported_extension() {
        let file = write_config(".ini", "port = 1");
        let err = load_config_from_file::<ClientConfig, _>(file.path()).unwrap_err();
        assert!(matches!(err, ModbusError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_empty_host() {
        let config = ClientConfig::new("  ", 502);
        assert!(config.validate().is_err());
    }
}
