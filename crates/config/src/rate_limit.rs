//! Rate limiting configuration structures.
//!
//! The limiter values are deliberately forgiving: an invalid limit or window
//! is replaced by its documented default with a warning, so a typo in the
//! configuration never prevents the service from starting.

use std::time::Duration;

use serde::{Deserialize, Deserializer};
use toml::Value;

use crate::StorageConfig;

const DEFAULT_IP_LIMIT: u32 = 10;
const DEFAULT_TOKEN_LIMIT: u32 = 100;
const DEFAULT_WINDOW: Duration = Duration::from_secs(300);
const DEFAULT_BLOCK_DURATION: Duration = Duration::from_secs(300);

/// Rate limiting configuration for the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Quota applied to requests identified by client IP address.
    #[serde(default = "default_ip_quota", deserialize_with = "deserialize_ip_quota")]
    pub ip: RateLimitQuota,
    /// Quota applied to requests identified by access token.
    #[serde(
        default = "default_token_quota",
        deserialize_with = "deserialize_token_quota"
    )]
    pub token: RateLimitQuota,
    /// How long an identifier stays blocked after exceeding its quota.
    #[serde(
        default = "default_block_duration",
        deserialize_with = "deserialize_block_duration"
    )]
    pub block_duration: Duration,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            ip: default_ip_quota(),
            token: default_token_quota(),
            block_duration: DEFAULT_BLOCK_DURATION,
            storage: StorageConfig::default(),
        }
    }
}

/// Configuration for a rate limit quota.
#[derive(Debug, Clone)]
pub struct RateLimitQuota {
    /// Maximum number of requests allowed within the window.
    pub limit: u32,
    /// Time window for the quota.
    pub window: Duration,
}

fn default_ip_quota() -> RateLimitQuota {
    RateLimitQuota {
        limit: DEFAULT_IP_LIMIT,
        window: DEFAULT_WINDOW,
    }
}

fn default_token_quota() -> RateLimitQuota {
    RateLimitQuota {
        limit: DEFAULT_TOKEN_LIMIT,
        window: DEFAULT_WINDOW,
    }
}

fn default_block_duration() -> Duration {
    DEFAULT_BLOCK_DURATION
}

fn deserialize_ip_quota<'de, D>(deserializer: D) -> Result<RateLimitQuota, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(resolve_quota(&value, default_ip_quota(), "rate_limits.ip"))
}

fn deserialize_token_quota<'de, D>(deserializer: D) -> Result<RateLimitQuota, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(resolve_quota(&value, default_token_quota(), "rate_limits.token"))
}

fn deserialize_block_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;

    Ok(lenient_duration(
        &value,
        DEFAULT_BLOCK_DURATION,
        "rate_limits.block_duration",
    ))
}

fn resolve_quota(value: &Value, defaults: RateLimitQuota, path: &str) -> RateLimitQuota {
    let Value::Table(table) = value else {
        log::warn!("Invalid value for {path}, expected a table, using defaults");
        return defaults;
    };

    let limit = table
        .get("limit")
        .map(|value| lenient_limit(value, defaults.limit, path))
        .unwrap_or(defaults.limit);

    let window = table
        .get("window")
        .map(|value| lenient_duration(value, defaults.window, path))
        .unwrap_or(defaults.window);

    RateLimitQuota { limit, window }
}

fn lenient_limit(value: &Value, default: u32, path: &str) -> u32 {
    match value {
        Value::Integer(limit) => match u32::try_from(*limit) {
            Ok(limit) => limit,
            Err(_) => {
                log::warn!("Value {limit} for {path}.limit is out of range, using default {default}");
                default
            }
        },
        other => {
            log::warn!("Invalid value {other:?} for {path}.limit, using default {default}");
            default
        }
    }
}

/// Accepts either a `duration-str` string such as `"300s"` or a bare integer
/// interpreted as seconds.
fn lenient_duration(value: &Value, default: Duration, path: &str) -> Duration {
    match value {
        Value::String(duration) => match duration_str::parse(duration) {
            Ok(duration) => duration,
            Err(_) => {
                log::warn!("Invalid duration {duration:?} for {path}, using default {default:?}");
                default
            }
        },
        Value::Integer(seconds) => match u64::try_from(*seconds) {
            Ok(seconds) => Duration::from_secs(seconds),
            Err(_) => {
                log::warn!("Negative duration for {path}, using default {default:?}");
                default
            }
        },
        other => {
            log::warn!("Invalid value {other:?} for {path}, using default {default:?}");
            default
        }
    }
}
