//! Storage backends for rate limiting.
//!
//! A backend persists two record kinds per identifier key: a counter with an
//! expiry, and a block flag with its own independent expiry. Absence of
//! either record means "zero requests" / "not blocked", never an error.

use std::time::Duration;

use config::{StorageBackend, StorageConfig};

pub mod memory;
pub mod redis;
mod redis_pool;

pub use memory::MemoryStorage;
pub use redis::RedisStorage;

/// How often the in-memory backend sweeps out expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Trait for rate limit storage backends.
#[allow(async_fn_in_trait)]
pub trait RateLimitStorage: Send + Sync {
    /// Increment the counter for a key, creating it at 1 if absent or
    /// expired, and refresh its expiry to now plus the window. Returns the
    /// new value. Atomic per key: two concurrent calls never observe the
    /// same pre-increment value.
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StorageError>;

    /// Return the live count for a key, or 0 if absent or expired.
    async fn get(&self, key: &str) -> Result<u64, StorageError>;

    /// True iff a live block exists for the key.
    async fn is_blocked(&self, key: &str) -> Result<bool, StorageError>;

    /// Create or overwrite a block for the key, expiring after the duration.
    async fn block(&self, key: &str, duration: Duration) -> Result<(), StorageError>;

    /// Release backend resources. Safe to call once at shutdown.
    async fn close(&self) -> Result<(), StorageError>;
}

/// Errors that can occur in storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to reach the backend.
    #[error("Connection error: {0}")]
    Connection(String),
    /// The backend rejected or failed an operation.
    #[error("Query error: {0}")]
    Query(String),
    /// The backend did not answer within the configured deadline.
    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Configured storage backend.
///
/// New backends implement [`RateLimitStorage`] and gain a variant here; the
/// limiter itself never branches on the backend kind.
pub enum Storage {
    /// In-process storage.
    Memory(MemoryStorage),
    /// Redis-backed storage.
    Redis(RedisStorage),
}

impl Storage {
    /// Construct the backend selected by the configuration.
    ///
    /// An unreachable Redis is a hard failure: without a working backend the
    /// limiter cannot make any admission decision.
    pub async fn connect(config: &StorageConfig) -> Result<Self, StorageError> {
        match config.backend {
            StorageBackend::Memory => {
                log::info!("Using in-memory rate limit storage");

                let storage = MemoryStorage::new();
                storage.start_sweeper(SWEEP_INTERVAL);

                Ok(Storage::Memory(storage))
            }
            StorageBackend::Redis => {
                log::info!("Using Redis rate limit storage at {}", config.redis.url);

                let storage = RedisStorage::connect(&config.redis).await?;
                Ok(Storage::Redis(storage))
            }
        }
    }

    /// Increment and refresh a counter, see [`RateLimitStorage::increment`].
    pub async fn increment(&self, key: &str, window: Duration) -> Result<u64, StorageError> {
        match self {
            Storage::Memory(storage) => storage.increment(key, window).await,
            Storage::Redis(storage) => storage.increment(key, window).await,
        }
    }

    /// Read-only count lookup, see [`RateLimitStorage::get`].
    pub async fn get(&self, key: &str) -> Result<u64, StorageError> {
        match self {
            Storage::Memory(storage) => storage.get(key).await,
            Storage::Redis(storage) => storage.get(key).await,
        }
    }

    /// Block flag lookup, see [`RateLimitStorage::is_blocked`].
    pub async fn is_blocked(&self, key: &str) -> Result<bool, StorageError> {
        match self {
            Storage::Memory(storage) => storage.is_blocked(key).await,
            Storage::Redis(storage) => storage.is_blocked(key).await,
        }
    }

    /// Write a block flag, see [`RateLimitStorage::block`].
    pub async fn block(&self, key: &str, duration: Duration) -> Result<(), StorageError> {
        match self {
            Storage::Memory(storage) => storage.block(key, duration).await,
            Storage::Redis(storage) => storage.block(key, duration).await,
        }
    }

    /// Release backend resources, see [`RateLimitStorage::close`].
    pub async fn close(&self) -> Result<(), StorageError> {
        match self {
            Storage::Memory(storage) => storage.close().await,
            Storage::Redis(storage) => storage.close().await,
        }
    }
}
