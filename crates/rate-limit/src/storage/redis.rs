//! Redis-based rate limit storage.
//!
//! Atomicity is delegated to Redis: counters use a transactional
//! INCR + EXPIRE pair so a counter can never outlive its window, and blocks
//! are single SET-with-TTL writes under a separate key namespace. Redis
//! serializes operations per key, so no client-side locking is needed, and
//! any number of server instances sharing one Redis observe the same blocks.

use std::future::Future;
use std::time::Duration;

use config::RedisConfig;

use super::redis_pool::{self, Pool};
use super::{RateLimitStorage, StorageError};

/// Namespace separating block flags from counters.
const BLOCK_NAMESPACE: &str = "blocked:";

/// Redis-based rate limit storage implementation.
pub struct RedisStorage {
    pool: Pool,
    key_prefix: String,
    response_timeout: Duration,
}

impl RedisStorage {
    /// Create a new Redis storage instance and verify the server is
    /// reachable.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StorageError> {
        let storage = Self::connect_lazy(config)?;

        // Fail fast at startup rather than on the first request.
        let mut conn = storage.connection().await?;

        storage
            .run(redis::cmd("PING").query_async::<String>(&mut *conn))
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to ping Redis server: {e}")))?;

        Ok(storage)
    }

    /// Create a Redis storage instance without contacting the server. The
    /// first command surfaces any connection failure.
    pub fn connect_lazy(config: &RedisConfig) -> Result<Self, StorageError> {
        let pool = redis_pool::create_pool(config)
            .map_err(|e| StorageError::Connection(format!("Failed to create Redis connection pool: {e}")))?;

        Ok(Self {
            pool,
            key_prefix: config.key_prefix.clone(),
            response_timeout: config.response_timeout.unwrap_or(Duration::from_secs(1)),
        })
    }

    fn counter_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    fn block_key(&self, key: &str) -> String {
        format!("{}{BLOCK_NAMESPACE}{key}", self.key_prefix)
    }

    async fn connection(&self) -> Result<deadpool::managed::Object<redis_pool::Manager>, StorageError> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// Run a Redis command under the configured response deadline. A command
    /// that does not finish in time fails; it is never reported as success.
    async fn run<T, F>(&self, command: F) -> Result<T, StorageError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.response_timeout, command).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StorageError::Query(e.to_string())),
            Err(_) => Err(StorageError::Timeout(self.response_timeout)),
        }
    }
}

impl RateLimitStorage for RedisStorage {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StorageError> {
        let key = self.counter_key(key);
        let mut conn = self.connection().await?;

        // MULTI/EXEC so the counter and its deadline land as one unit.
        let (count,) = self
            .run(
                redis::pipe()
                    .atomic()
                    .incr(&key, 1)
                    .expire(&key, window.as_secs().max(1) as i64)
                    .ignore()
                    .query_async::<(u64,)>(&mut *conn),
            )
            .await?;

        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<u64, StorageError> {
        let key = self.counter_key(key);
        let mut conn = self.connection().await?;

        let count = self
            .run(redis::cmd("GET").arg(&key).query_async::<Option<u64>>(&mut *conn))
            .await?;

        Ok(count.unwrap_or(0))
    }

    async fn is_blocked(&self, key: &str) -> Result<bool, StorageError> {
        let key = self.block_key(key);
        let mut conn = self.connection().await?;

        let exists = self
            .run(redis::cmd("EXISTS").arg(&key).query_async::<i64>(&mut *conn))
            .await?;

        Ok(exists > 0)
    }

    async fn block(&self, key: &str, duration: Duration) -> Result<(), StorageError> {
        let key = self.block_key(key);
        let mut conn = self.connection().await?;

        self.run(
            redis::cmd("SET")
                .arg(&key)
                .arg(1)
                .arg("EX")
                .arg(duration.as_secs().max(1))
                .query_async::<()>(&mut *conn),
        )
        .await?;

        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.pool.close();
        Ok(())
    }
}
