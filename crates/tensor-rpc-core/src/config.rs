//! Centralized configuration for the tensor RPC server and client.
//!
//! Protocol-wide constants live on [`RpcConfig`]; per-process server settings
//! live on [`ServerConfig`], which can be loaded from JSON.

use crate::{Result, RpcError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Protocol-wide constants.
pub struct RpcConfig;

impl RpcConfig {
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 50052;

    /// Upper bound on a single length-prefixed message (1 GiB).
    pub const MAX_MESSAGE_SIZE: u64 = 1 << 30;
    pub const MAX_CONNECTIONS: usize = 64;
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    // Host backend
    pub const HOST_ALIGNMENT: u64 = 32;
    pub const DEFAULT_HOST_MEMORY: u64 = 2 << 30; // 2 GiB
}

/// Settings for one server process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Connections accepted concurrently; extra connections are dropped.
    pub max_connections: usize,
    /// Largest variable-length request body accepted from a client.
    pub max_message_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: RpcConfig::DEFAULT_HOST.to_string(),
            port: RpcConfig::DEFAULT_PORT,
            max_connections: RpcConfig::MAX_CONNECTIONS,
            max_message_size: RpcConfig::MAX_MESSAGE_SIZE,
        }
    }
}

impl ServerConfig {
    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| RpcError::Config {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;
        let config: ServerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(RpcError::Config {
                message: "max_connections must be at least 1".to_string(),
            });
        }
        if self.max_message_size == 0 {
            return Err(RpcError::Config {
                message: "max_message_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Socket address to bind.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| RpcError::Config {
                message: format!("Invalid bind address {}:{}: {}", self.host, self.port, e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_addr().unwrap().port(), RpcConfig::DEFAULT_PORT);
    }

    #[test]
    fn test_zero_limits_rejected() {
        let config = ServerConfig {
            max_connections: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            max_message_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_host_rejected() {
        let config = ServerConfig {
            host: "not a host".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.bind_addr(), Err(RpcError::Config { .. })));
    }

    #[test]
    fn test_load_partial_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"port": 0, "max_connections": 2}}"#).unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 0);
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.host, RpcConfig::DEFAULT_HOST);
        assert_eq!(config.max_message_size, RpcConfig::MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_missing_config_file_is_config_error() {
        let result = ServerConfig::from_file(Path::new("/nonexistent/tensor-rpc.json"));
        assert!(matches!(result, Err(RpcError::Config { .. })));
    }
}
