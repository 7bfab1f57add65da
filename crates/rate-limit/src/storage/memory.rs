//! In-process rate limit storage.
//!
//! Counters and blocks live in two maps behind a single reader/writer lock;
//! the critical sections are short enough that coarse locking wins over
//! per-key granularity at this scale. Every read re-checks expiry against
//! the current time, so the periodic sweep only reclaims memory and is never
//! needed for correctness.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{RateLimitStorage, StorageError};

struct Counter {
    value: u64,
    expires_at: Instant,
}

#[derive(Default)]
struct Maps {
    counters: HashMap<String, Counter>,
    blocks: HashMap<String, Instant>,
}

/// In-memory rate limit storage implementation.
///
/// The maps are owned by this instance, not by the process: dropping the
/// storage drops all state and cancels the sweeper task.
pub struct MemoryStorage {
    maps: Arc<RwLock<Maps>>,
    sweeper: CancellationToken,
}

impl MemoryStorage {
    /// Create a new in-memory storage instance with no sweeper running.
    pub fn new() -> Self {
        Self {
            maps: Arc::new(RwLock::new(Maps::default())),
            sweeper: CancellationToken::new(),
        }
    }

    /// Spawn the background task that evicts expired counters and blocks on
    /// a fixed interval. The task stops when the storage is closed or
    /// dropped.
    pub fn start_sweeper(&self, interval: Duration) {
        let maps = self.maps.clone();
        let token = self.sweeper.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => sweep(&maps),
                }
            }

            log::debug!("Memory storage sweeper stopped");
        });
    }
}

fn sweep(maps: &RwLock<Maps>) {
    let now = Instant::now();
    let mut maps = maps.write().unwrap();

    maps.counters.retain(|_, counter| counter.expires_at > now);
    maps.blocks.retain(|_, expires_at| *expires_at > now);
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryStorage {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

impl RateLimitStorage for MemoryStorage {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StorageError> {
        let now = Instant::now();
        let mut maps = self.maps.write().unwrap();

        match maps.counters.get_mut(key) {
            Some(counter) if counter.expires_at > now => {
                counter.value += 1;
                counter.expires_at = now + window;
                Ok(counter.value)
            }
            _ => {
                // First hit, or the previous window has lapsed.
                maps.counters.insert(
                    key.to_string(),
                    Counter {
                        value: 1,
                        expires_at: now + window,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<u64, StorageError> {
        let now = Instant::now();
        let maps = self.maps.read().unwrap();

        let count = maps
            .counters
            .get(key)
            .filter(|counter| counter.expires_at > now)
            .map(|counter| counter.value)
            .unwrap_or(0);

        Ok(count)
    }

    async fn is_blocked(&self, key: &str) -> Result<bool, StorageError> {
        let now = Instant::now();
        let maps = self.maps.read().unwrap();

        Ok(maps
            .blocks
            .get(key)
            .is_some_and(|expires_at| *expires_at > now))
    }

    async fn block(&self, key: &str, duration: Duration) -> Result<(), StorageError> {
        let now = Instant::now();
        let mut maps = self.maps.write().unwrap();

        maps.blocks.insert(key.to_string(), now + duration);

        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.sweeper.cancel();
        Ok(())
    }
}
