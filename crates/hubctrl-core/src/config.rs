//! Configuration defaults and helpers.
//!
//! Constants shared by the CLI and the device crate live here so they are
//! defined once.

use std::time::Duration;

/// Default values.
pub mod defaults {
    /// MQTT broker port when the address carries none.
    pub const MQTT_PORT: u16 = 1883;
    /// MQTT keep-alive interval in seconds.
    pub const KEEP_ALIVE_SECS: u64 = 60;
    /// Time allowed for CONNACK / SUBACK during startup.
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;
    /// Delay before polling again after a connection error.
    pub const RECONNECT_INTERVAL_MS: u64 = 5000;
    /// Upper bound for a single pin-control call.
    pub const PIN_OP_TIMEOUT_MS: u64 = 500;
    /// Linux sysfs GPIO root.
    pub const SYSFS_ROOT: &str = "/sys/class/gpio";
    /// Buffered payloads between the bus client and the control loop.
    pub const CHANNEL_CAPACITY: usize = 256;
    /// Prefix for generated MQTT client ids.
    pub const CLIENT_ID_PREFIX: &str = "hubctrl";
    /// Time allowed for releasing pins on shutdown.
    pub const SHUTDOWN_TIMEOUT_SECS: u64 = 5;
}

/// Environment variable names.
pub mod env_vars {
    use super::defaults;

    pub const LOG_JSON: &str = "HUBCTRL_LOG_JSON";
    pub const SYSFS_ROOT: &str = "HUBCTRL_SYSFS_ROOT";
    pub const PIN_TIMEOUT_MS: &str = "HUBCTRL_PIN_TIMEOUT_MS";

    /// Whether JSON log output is requested.
    pub fn log_json() -> bool {
        std::env::var(LOG_JSON)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false)
    }

    /// Sysfs GPIO root, or the default.
    pub fn sysfs_root() -> String {
        std::env::var(SYSFS_ROOT).unwrap_or_else(|_| defaults::SYSFS_ROOT.to_string())
    }

    /// Pin-control timeout in milliseconds, or the default.
    pub fn pin_timeout_ms() -> u64 {
        std::env::var(PIN_TIMEOUT_MS)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults::PIN_OP_TIMEOUT_MS)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid broker address {0:?}")]
    InvalidBroker(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// Split a broker address into host and port.
///
/// Accepts `host`, `host:port` and `tcp://host:port`.
pub fn parse_broker_address(address: &str) -> Result<(String, u16), ConfigError> {
    let trimmed = address.trim();
    let without_scheme = trimmed
        .strip_prefix("tcp://")
        .or_else(|| trimmed.strip_prefix("mqtt://"))
        .unwrap_or(trimmed)
        .trim_end_matches('/');

    let invalid = || ConfigError::InvalidBroker(address.to_string());

    let (host, port) = match without_scheme.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
        None => (without_scheme, defaults::MQTT_PORT),
    };

    if host.is_empty() || host.contains('/') {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

/// How the dispatcher applies commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Upper bound for each pin-control call.
    pub op_timeout: Duration,
    /// Reject SetMode with an unrecognized mode instead of storing it.
    pub reject_unspecified_mode: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_millis(defaults::PIN_OP_TIMEOUT_MS),
            reject_unspecified_mode: false,
        }
    }
}

impl DispatchOptions {
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.reject_unspecified_mode = strict;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.op_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "op_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
