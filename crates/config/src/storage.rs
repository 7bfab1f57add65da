//! Storage backend configuration for the rate limiter.

use std::time::Duration;

use duration_str::deserialize_option_duration;
use serde::{Deserialize, Deserializer};

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Which backend keeps the counters and block-list.
    #[serde(default)]
    pub backend: StorageBackend,
    /// Redis connection settings, used when the backend is `redis`.
    #[serde(default)]
    pub redis: RedisConfig,
}

/// Selector for the storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    /// In-process storage guarded by a lock, with a periodic sweep.
    Memory,
    /// Redis storage shared between server instances.
    #[default]
    Redis,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Memory => f.write_str("memory"),
            StorageBackend::Redis => f.write_str("redis"),
        }
    }
}

impl<'de> Deserialize<'de> for StorageBackend {
    // An unknown selector is recovered as redis rather than failing startup.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;

        match value.as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "redis" => Ok(StorageBackend::Redis),
            other => {
                log::warn!("Invalid storage backend '{other}', using redis");
                Ok(StorageBackend::Redis)
            }
        }
    }
}

/// Redis storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Redis connection URL (redis:// or rediss:// for TLS).
    pub url: String,
    /// Connection pool configuration.
    #[serde(default)]
    pub pool: RedisPoolConfig,
    /// TLS configuration.
    pub tls: Option<RedisTlsConfig>,
    /// Key prefix for all rate limit keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Response timeout for Redis commands.
    #[serde(
        default = "default_response_timeout",
        deserialize_with = "deserialize_option_duration"
    )]
    pub response_timeout: Option<Duration>,
    /// Connection timeout.
    #[serde(
        default = "default_connection_timeout",
        deserialize_with = "deserialize_option_duration"
    )]
    pub connection_timeout: Option<Duration>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            pool: RedisPoolConfig::default(),
            tls: None,
            key_prefix: default_key_prefix(),
            response_timeout: default_response_timeout(),
            connection_timeout: default_connection_timeout(),
        }
    }
}

fn default_key_prefix() -> String {
    "gatehouse:rate_limit:".to_string()
}

fn default_response_timeout() -> Option<Duration> {
    Some(Duration::from_secs(1))
}

fn default_connection_timeout() -> Option<Duration> {
    Some(Duration::from_secs(5))
}

/// Redis connection pool configuration (deadpool).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisPoolConfig {
    /// Maximum number of connections.
    pub max_size: Option<usize>,
    /// Timeout for creating connections.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_create: Option<Duration>,
    /// Timeout for waiting for a connection.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_wait: Option<Duration>,
    /// Timeout before recycling idle connections.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_recycle: Option<Duration>,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            max_size: Some(16),
            timeout_create: Some(Duration::from_secs(5)),
            timeout_wait: Some(Duration::from_secs(5)),
            timeout_recycle: Some(Duration::from_secs(300)),
        }
    }
}

/// Redis TLS configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisTlsConfig {
    /// Enable TLS (automatically enabled for rediss:// URLs).
    pub enabled: bool,
    /// Allow insecure connections (skip certificate validation).
    pub insecure: Option<bool>,
    /// Path to CA certificate file.
    pub ca_cert_path: Option<String>,
    /// Path to client certificate file (for mutual TLS).
    pub client_cert_path: Option<String>,
    /// Path to client key file (for mutual TLS).
    pub client_key_path: Option<String>,
}
