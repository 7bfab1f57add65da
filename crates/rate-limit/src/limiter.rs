//! Core admission decision.

use std::time::Duration;

use config::{RateLimitConfig, RateLimitQuota};

use crate::error::RateLimitError;
use crate::storage::Storage;

/// The rate limiter: one fixed-window quota per identifier kind and a shared
/// block duration, backed by a [`Storage`].
///
/// The limiter is "allow first N, block from the (N+1)th": the request that
/// trips the limit is itself counted, and once an identifier is blocked every
/// check short-circuits to denied until the block expires on its own. There
/// is no explicit unblock operation.
pub struct RateLimiter {
    storage: Storage,
    ip: RateLimitQuota,
    token: RateLimitQuota,
    block_duration: Duration,
}

impl RateLimiter {
    /// Create a rate limiter with the backend selected by the configuration.
    pub async fn new(config: RateLimitConfig) -> Result<Self, RateLimitError> {
        let storage = Storage::connect(&config.storage).await?;

        Ok(Self::with_storage(&config, storage))
    }

    /// Create a rate limiter over an explicitly owned storage instance.
    pub fn with_storage(config: &RateLimitConfig, storage: Storage) -> Self {
        Self {
            storage,
            ip: config.ip.clone(),
            token: config.token.clone(),
            block_duration: config.block_duration,
        }
    }

    /// Check whether a request from this IP address is admitted.
    pub async fn check_ip(&self, ip: &str) -> Result<bool, RateLimitError> {
        self.check(&format!("ip:{ip}"), &self.ip).await
    }

    /// Check whether a request bearing this access token is admitted.
    pub async fn check_token(&self, token: &str) -> Result<bool, RateLimitError> {
        self.check(&format!("token:{token}"), &self.token).await
    }

    async fn check(&self, key: &str, quota: &RateLimitQuota) -> Result<bool, RateLimitError> {
        if self.storage.is_blocked(key).await? {
            return Ok(false);
        }

        // The gap between the block check and the increment stays open: a
        // concurrent request may slip through while another one is writing
        // the block. The per-operation atomicity of the storage makes this
        // harmless, and closing it would need cross-call locking.
        let count = self.storage.increment(key, quota.window).await?;

        if count > u64::from(quota.limit) {
            log::debug!("Rate limit exceeded for {key}: {count} > {}", quota.limit);
            self.storage.block(key, self.block_duration).await?;

            return Ok(false);
        }

        Ok(true)
    }

    /// Release the backing storage. Called once at shutdown.
    pub async fn close(&self) -> Result<(), RateLimitError> {
        self.storage.close().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn limiter(ip: (u32, u64), token: (u32, u64), block_secs: u64) -> RateLimiter {
        let config = RateLimitConfig {
            ip: RateLimitQuota {
                limit: ip.0,
                window: Duration::from_secs(ip.1),
            },
            token: RateLimitQuota {
                limit: token.0,
                window: Duration::from_secs(token.1),
            },
            block_duration: Duration::from_secs(block_secs),
            ..RateLimitConfig::default()
        };

        RateLimiter::with_storage(&config, Storage::Memory(MemoryStorage::new()))
    }

    #[tokio::test]
    async fn ip_allowed_up_to_limit_then_blocked() {
        let limiter = limiter((3, 300), (100, 300), 300);

        for _ in 0..3 {
            assert!(limiter.check_ip("192.168.1.1").await.unwrap());
        }

        assert!(!limiter.check_ip("192.168.1.1").await.unwrap());
        assert!(limiter.storage.is_blocked("ip:192.168.1.1").await.unwrap());
    }

    #[tokio::test]
    async fn token_allowed_up_to_limit_then_blocked() {
        let limiter = limiter((10, 300), (5, 300), 300);

        for _ in 0..5 {
            assert!(limiter.check_token("test-token").await.unwrap());
        }

        assert!(!limiter.check_token("test-token").await.unwrap());
        assert!(limiter.storage.is_blocked("token:test-token").await.unwrap());
    }

    #[tokio::test]
    async fn blocked_identifier_stays_blocked() {
        let limiter = limiter((2, 300), (100, 300), 300);

        limiter.check_ip("10.0.0.1").await.unwrap();
        limiter.check_ip("10.0.0.1").await.unwrap();
        assert!(!limiter.check_ip("10.0.0.1").await.unwrap());

        for _ in 0..10 {
            assert!(!limiter.check_ip("10.0.0.1").await.unwrap());
        }
    }

    #[tokio::test]
    async fn blocked_check_does_not_grow_the_counter() {
        let limiter = limiter((2, 300), (100, 300), 300);

        limiter.check_ip("10.0.0.1").await.unwrap();
        limiter.check_ip("10.0.0.1").await.unwrap();
        limiter.check_ip("10.0.0.1").await.unwrap();

        // Denied-by-block checks return before the increment.
        limiter.check_ip("10.0.0.1").await.unwrap();
        limiter.check_ip("10.0.0.1").await.unwrap();

        assert_eq!(limiter.storage.get("ip:10.0.0.1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn ip_and_token_limits_are_independent() {
        let limiter = limiter((2, 300), (2, 300), 300);

        limiter.check_token("abc").await.unwrap();
        limiter.check_token("abc").await.unwrap();
        assert!(!limiter.check_token("abc").await.unwrap());

        // The IP space is untouched by the token block.
        assert!(limiter.check_ip("10.0.0.1").await.unwrap());
        assert!(!limiter.storage.is_blocked("ip:10.0.0.1").await.unwrap());
    }

    #[tokio::test]
    async fn different_ips_have_separate_counters() {
        let limiter = limiter((2, 300), (100, 300), 300);

        limiter.check_ip("10.0.0.1").await.unwrap();
        limiter.check_ip("10.0.0.1").await.unwrap();
        assert!(!limiter.check_ip("10.0.0.1").await.unwrap());

        assert!(limiter.check_ip("10.0.0.2").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_block_starts_a_fresh_window() {
        let limiter = limiter((2, 60), (100, 300), 300);

        limiter.check_ip("10.0.0.1").await.unwrap();
        limiter.check_ip("10.0.0.1").await.unwrap();
        assert!(!limiter.check_ip("10.0.0.1").await.unwrap());

        // Outlive both the block and the counter window.
        tokio::time::advance(Duration::from_secs(301)).await;

        assert!(limiter.check_ip("10.0.0.1").await.unwrap());
        assert_eq!(limiter.storage.get("ip:10.0.0.1").await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn block_outlives_the_counter_window() {
        let limiter = limiter((2, 60), (100, 300), 300);

        limiter.check_ip("10.0.0.1").await.unwrap();
        limiter.check_ip("10.0.0.1").await.unwrap();
        assert!(!limiter.check_ip("10.0.0.1").await.unwrap());

        // The counter window has lapsed but the block has not.
        tokio::time::advance(Duration::from_secs(120)).await;

        assert!(!limiter.check_ip("10.0.0.1").await.unwrap());
    }

    #[tokio::test]
    async fn close_releases_storage() {
        let limiter = limiter((2, 60), (100, 300), 300);
        limiter.close().await.unwrap();
    }
}
