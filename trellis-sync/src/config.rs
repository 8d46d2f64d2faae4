//! Server configuration.

use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub const ENV_BIND_ADDR: &str = "TRELLIS_BIND_ADDR";
pub const ENV_HTTP_ADDR: &str = "TRELLIS_HTTP_ADDR";
pub const ENV_STORAGE_PATH: &str = "TRELLIS_STORAGE_PATH";
pub const ENV_MAX_SESSIONS: &str = "TRELLIS_MAX_SESSIONS";
pub const ENV_BROADCAST_CAPACITY: &str = "TRELLIS_BROADCAST_CAPACITY";
pub const ENV_HEARTBEAT_SECS: &str = "TRELLIS_HEARTBEAT_SECS";
pub const ENV_CHAT_HISTORY: &str = "TRELLIS_CHAT_HISTORY";
pub const ENV_BOARD_KEY: &str = "TRELLIS_BOARD_KEY";

/// Upper bound for `TRELLIS_HEARTBEAT_SECS` (one day).
pub const MAX_HEARTBEAT_SECS: u64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// WebSocket address to bind to
    pub bind_addr: String,
    /// HTTP API address (None = no HTTP boundary)
    pub http_addr: Option<String>,
    /// Maximum concurrently connected observers
    pub max_sessions: usize,
    /// Events buffered per observer before it lags
    pub broadcast_capacity: usize,
    /// Heartbeat interval in seconds (0 disables)
    pub heartbeat_interval_secs: u64,
    /// Chat messages retained for `GET /api/chat`
    pub chat_history_limit: usize,
    /// Persistence storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
    /// Key the board snapshot is stored under
    pub board_key: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            http_addr: Some("127.0.0.1:8000".to_string()),
            max_sessions: 100,
            broadcast_capacity: 256,
            heartbeat_interval_secs: 30,
            chat_history_limit: 500,
            storage_path: None,
            board_key: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ServerConfig {
    /// Defaults overlaid with `TRELLIS_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`ServerConfig::from_env`], reading variables through `lookup`.
    ///
    /// An empty `TRELLIS_HTTP_ADDR` or the value `off` disables HTTP.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup(ENV_BIND_ADDR) {
            config.bind_addr = non_empty(ENV_BIND_ADDR, addr)?;
        }
        if let Some(addr) = lookup(ENV_HTTP_ADDR) {
            let addr = addr.trim().to_string();
            config.http_addr = if addr.is_empty() || addr.eq_ignore_ascii_case("off") {
                None
            } else {
                Some(addr)
            };
        }
        if let Some(path) = lookup(ENV_STORAGE_PATH) {
            config.storage_path = Some(PathBuf::from(non_empty(ENV_STORAGE_PATH, path)?));
        }
        if let Some(value) = lookup(ENV_MAX_SESSIONS) {
            config.max_sessions = positive(ENV_MAX_SESSIONS, value)?;
        }
        if let Some(value) = lookup(ENV_BROADCAST_CAPACITY) {
            config.broadcast_capacity = positive(ENV_BROADCAST_CAPACITY, value)?;
        }
        if let Some(value) = lookup(ENV_HEARTBEAT_SECS) {
            config.heartbeat_interval_secs = at_most(ENV_HEARTBEAT_SECS, value, MAX_HEARTBEAT_SECS)?;
        }
        if let Some(value) = lookup(ENV_CHAT_HISTORY) {
            config.chat_history_limit = parse(ENV_CHAT_HISTORY, value)?;
        }
        if let Some(key) = lookup(ENV_BOARD_KEY) {
            config.board_key = non_empty(ENV_BOARD_KEY, key)?;
        }

        Ok(config)
    }

    /// In-memory config on ephemeral ports, for tests.
    pub fn ephemeral() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            http_addr: Some("127.0.0.1:0".to_string()),
            max_sessions: 16,
            broadcast_capacity: 64,
            ..Self::default()
        }
    }
}

fn parse<T>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: e.to_string(),
        value,
    })
}

fn positive(var: &'static str, value: String) -> Result<usize, ConfigError> {
    let parsed: usize = parse(var, value.clone())?;
    if parsed == 0 {
        return Err(ConfigError::Invalid {
            var,
            value,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(parsed)
}

fn at_most(var: &'static str, value: String, max: u64) -> Result<u64, ConfigError> {
    let parsed: u64 = parse(var, value.clone())?;
    if parsed > max {
        return Err(ConfigError::Invalid {
            var,
            value,
            reason: format!("must be at most {max}"),
        });
    }
    Ok(parsed)
}

fn non_empty(var: &'static str, value: String) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid {
            var,
            value,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.http_addr.as_deref(), Some("127.0.0.1:8000"));
        assert_eq!(config.max_sessions, 100);
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert_eq!(config.chat_history_limit, 500);
        assert!(config.storage_path.is_none());
        assert_eq!(config.board_key, "default");
    }

    #[test]
    fn test_no_variables_gives_defaults() {
        assert_eq!(ServerConfig::from_lookup(lookup(&[])).unwrap(), ServerConfig::default());
    }

    #[test]
    fn test_variables_override_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[
            (ENV_BIND_ADDR, "0.0.0.0:7000"),
            (ENV_HTTP_ADDR, "off"),
            (ENV_STORAGE_PATH, "/var/lib/trellis"),
            (ENV_MAX_SESSIONS, "12"),
            (ENV_BROADCAST_CAPACITY, " 32 "),
            (ENV_HEARTBEAT_SECS, "0"),
            (ENV_CHAT_HISTORY, "50"),
            (ENV_BOARD_KEY, "team"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:7000");
        assert!(config.http_addr.is_none());
        assert_eq!(config.storage_path, Some(PathBuf::from("/var/lib/trellis")));
        assert_eq!(config.max_sessions, 12);
        assert_eq!(config.broadcast_capacity, 32);
        assert_eq!(config.heartbeat_interval_secs, 0);
        assert_eq!(config.chat_history_limit, 50);
        assert_eq!(config.board_key, "team");
    }

    #[test]
    fn test_malformed_values_rejected() {
        let err = ServerConfig::from_lookup(lookup(&[(ENV_MAX_SESSIONS, "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: ENV_MAX_SESSIONS, .. }));

        let err = ServerConfig::from_lookup(lookup(&[(ENV_BROADCAST_CAPACITY, "0")])).unwrap_err();
        assert!(err.to_string().contains("greater than zero"));

        assert!(ServerConfig::from_lookup(lookup(&[(ENV_BOARD_KEY, "  ")])).is_err());
    }

    #[test]
    fn test_heartbeat_bounded() {
        let config = ServerConfig::from_lookup(lookup(&[(ENV_HEARTBEAT_SECS, "86400")])).unwrap();
        assert_eq!(config.heartbeat_interval_secs, MAX_HEARTBEAT_SECS);

        let huge = u64::MAX.to_string();
        let err = ServerConfig::from_lookup(lookup(&[(ENV_HEARTBEAT_SECS, huge.as_str())])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: ENV_HEARTBEAT_SECS, .. }));
        assert!(err.to_string().contains("at most"));
    }
}
