use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(String),
    #[error("config parse error: {0}")]
    ParseError(String),
    #[error("config validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_addr: String,

    // Waiting
    pub handshake_timeout_secs: u64,
    pub response_timeout_secs: u64,

    // Logging
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:7878".to_string(),
            handshake_timeout_secs: 10,
            response_timeout_secs: 10,
            log_level: "warn".to_string(),
        }
    }
}

impl ClientConfig {
    /// Parse `path`, then apply environment overrides on top.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::load_from_file_with(path, |key| std::env::var(key).ok())
    }

    /// Parse `path`, then apply overrides from `lookup` on top.
    pub fn load_from_file_with<F>(path: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileNotFound(format!("{}: {}", path.display(), e)))?;

        let config: ClientConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        let config = config.with_overrides(lookup);

        config.validate()?;
        Ok(config)
    }

    pub fn load_from_env() -> Result<Self, ConfigError> {
        let config = Self::default().with_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `SIPC_SERVER_ADDR` and `RUST_LOG` overrides from `lookup`.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("SIPC_SERVER_ADDR") {
            self.server_addr = addr;
        }
        if let Some(level) = lookup("RUST_LOG") {
            self.log_level = level;
        }
        self
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server_addr.parse().map_err(|e| {
            ConfigError::ValidationError(format!("server_addr '{}': {}", self.server_addr, e))
        })
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        if self.handshake_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "handshake_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        config.validate().unwrap();
        assert_eq!(config.server_addr, "127.0.0.1:7878");
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server_addr = \"10.0.0.2:7000\"\nresponse_timeout_secs = 3").unwrap();
        let config = ClientConfig::load_from_file_with(file.path(), |_| None).unwrap();
        assert_eq!(config.server_addr, "10.0.0.2:7000");
        assert_eq!(config.response_timeout(), Duration::from_secs(3));
        assert_eq!(config.handshake_timeout_secs, 10);
    }

    #[test]
    fn test_validation() {
        let bad_addr = ClientConfig {
            server_addr: "nowhere".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            bad_addr.validate(),
            Err(ConfigError::ValidationError(_))
        ));
        let no_wait = ClientConfig {
            handshake_timeout_secs: 0,
            ..Default::default()
        };
        assert!(no_wait.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = ClientConfig::default().with_overrides(|key| match key {
            "SIPC_SERVER_ADDR" => Some("127.0.0.1:9".to_string()),
            _ => None,
        });
        assert_eq!(config.server_addr, "127.0.0.1:9");
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server_addr = \"10.0.0.2:7000\"\nlog_level = \"info\"").unwrap();
        let config = ClientConfig::load_from_file_with(file.path(), |key| match key {
            "SIPC_SERVER_ADDR" => Some("127.0.0.1:9".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.server_addr, "127.0.0.1:9");
        assert_eq!(config.log_level, "info");

        let bad = ClientConfig::load_from_file_with(file.path(), |key| match key {
            "SIPC_SERVER_ADDR" => Some("nowhere".to_string()),
            _ => None,
        });
        assert!(matches!(bad, Err(ConfigError::ValidationError(_))));
    }
}
