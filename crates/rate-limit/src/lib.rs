//! Rate limiting functionality for Gatehouse.
//!
//! This crate provides the admission decision for incoming requests: a
//! fixed-window counter with sliding refresh per identifier, plus a
//! separately-expiring block-list. Counters and blocks live in a pluggable
//! storage backend, either in-process memory or Redis.

#![deny(missing_docs)]

mod error;
mod limiter;
mod storage;

pub use error::RateLimitError;
pub use limiter::RateLimiter;
pub use storage::{MemoryStorage, RateLimitStorage, RedisStorage, Storage, StorageError};
