//! Server configuration.
//!
//! Configuration is loaded from environment variables. The shared
//! password is redacted in Debug output.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use dropcast_room::parse_flag;
use thiserror::Error;

/// Default listen address.
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:10325";

/// Default per-recipient write bound during broadcast, in milliseconds.
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 5_000;

/// Default WebSocket handshake bound, in seconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Dropcast server configuration.
#[derive(Clone)]
pub struct Config {
    /// Address to listen on (default: "0.0.0.0:10325").
    pub listen_address: String,

    /// Enables debug-level logging when no `RUST_LOG` is set.
    pub debug: bool,

    /// Shared secret required in the `token` query parameter.
    /// `None` lets every connection through.
    pub password: Option<String>,

    /// Per-recipient write bound during broadcast. `None` waits forever.
    pub send_timeout: Option<Duration>,

    /// Closes connections that send nothing for this long. `None` disables.
    pub idle_timeout: Option<Duration>,

    /// Bound on the WebSocket upgrade handshake.
    pub handshake_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            debug: false,
            password: None,
            send_timeout: Some(Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS)),
            idle_timeout: None,
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
        }
    }
}

/// Custom Debug implementation that redacts the password.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("listen_address", &self.listen_address)
            .field("debug", &self.debug)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("send_timeout", &self.send_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let listen_address = vars
            .get("DROPCAST_LISTEN")
            .filter(|v| !v.is_empty())
            .map(|v| normalize_listen_address(v))
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.to_string());

        let debug = vars
            .get("DROPCAST_DEBUG")
            .and_then(|v| parse_flag(v))
            .unwrap_or(false);

        let password = vars
            .get("DROPCAST_PASSWORD")
            .filter(|v| !v.is_empty())
            .cloned();

        let send_timeout =
            parse_u64(vars, "DROPCAST_SEND_TIMEOUT_MS", DEFAULT_SEND_TIMEOUT_MS)?;
        let idle_timeout = parse_u64(vars, "DROPCAST_IDLE_TIMEOUT_SECS", 0)?;
        let handshake_timeout = parse_u64(
            vars,
            "DROPCAST_HANDSHAKE_TIMEOUT_SECS",
            DEFAULT_HANDSHAKE_TIMEOUT_SECS,
        )?;
        if handshake_timeout == 0 {
            return Err(ConfigError::InvalidValue(
                "DROPCAST_HANDSHAKE_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            listen_address,
            debug,
            password,
            send_timeout: non_zero(send_timeout).map(Duration::from_millis),
            idle_timeout: non_zero(idle_timeout).map(Duration::from_secs),
            handshake_timeout: Duration::from_secs(handshake_timeout),
        })
    }
}

/// Expands the `:port` shorthand to an all-interfaces address.
fn normalize_listen_address(raw: &str) -> String {
    if raw.starts_with(':') {
        format!("0.0.0.0{raw}")
    } else {
        raw.to_string()
    }
}

fn parse_u64(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw.trim().parse().map_err(|e| {
            ConfigError::InvalidValue(format!("{key}={raw:?}: {e}"))
        }),
        None => Ok(default),
    }
}

fn non_zero(value: u64) -> Option<u64> {
    (value > 0).then_some(value)
}
