use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sipc_core::DEFAULT_RESPONSE_PREFIX;
use sipc_crypto::identity::MIN_RSA_BITS;

/// Largest RSA modulus the service will generate.
pub const MAX_RSA_BITS: usize = 8192;

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
pub struct ServiceConfig {
    pub bind_addr: String,

    // Identity
    pub key_alias: String,
    pub key_dir: PathBuf,
    pub rsa_bits: usize,

    // Application
    pub response_prefix: String,

    // Logging
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7878".to_string(),
            key_alias: "ServiceRSAKey".to_string(),
            key_dir: PathBuf::from("./sipc-keys"),
            rsa_bits: MIN_RSA_BITS,
            response_prefix: DEFAULT_RESPONSE_PREFIX.to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ServiceConfig {
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

        let config: ServiceConfig =
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

    /// Apply `SIPC_*` and `RUST_LOG` overrides from `lookup`.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("SIPC_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(dir) = lookup("SIPC_KEY_DIR") {
            self.key_dir = PathBuf::from(dir);
        }
        if let Some(alias) = lookup("SIPC_KEY_ALIAS") {
            self.key_alias = alias;
        }
        if let Some(level) = lookup("RUST_LOG") {
            self.log_level = level;
        }
        self
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_addr
            .parse()
            .map_err(|e| ConfigError::ValidationError(format!("bind_addr '{}': {}", self.bind_addr, e)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        if self.rsa_bits < MIN_RSA_BITS || self.rsa_bits > MAX_RSA_BITS {
            return Err(ConfigError::ValidationError(format!(
                "rsa_bits must be between {} and {}",
                MIN_RSA_BITS, MAX_RSA_BITS
            )));
        }
        if self.key_alias.is_empty() {
            return Err(ConfigError::ValidationError(
                "key_alias must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
