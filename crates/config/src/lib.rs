//! Gatehouse configuration structures to map the gatehouse.toml configuration.

#![deny(missing_docs)]

mod loader;
mod rate_limit;
mod storage;

use std::{net::SocketAddr, path::Path};

pub use rate_limit::{RateLimitConfig, RateLimitQuota};
use serde::Deserialize;
pub use storage::{RedisConfig, RedisPoolConfig, RedisTlsConfig, StorageBackend, StorageConfig};

/// Main configuration structure for the Gatehouse application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Rate limiting configuration settings.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }
}

/// HTTP server configuration settings.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server should listen on.
    pub listen_address: Option<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert!(config.server.listen_address.is_none());
        assert_eq!(config.rate_limits.ip.limit, 10);
        assert_eq!(config.rate_limits.token.limit, 100);
    }

    #[test]
    fn listen_address_parses() {
        let config: Config = toml::from_str(
            r#"
            [server]
            listen_address = "0.0.0.0:8080"
        "#,
        )
        .unwrap();

        assert_eq!(config.server.listen_address.unwrap().port(), 8080);
    }
}
