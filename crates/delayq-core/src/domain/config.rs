//! QueueConfig - ポーリング周期・リトライ予算などの設定
//!
//! All fields have serde defaults, so a partial JSON document is enough:
//! `{"max_retry": 5}` keeps every other knob at its default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::QueueError;

/// Upper bound for a single remote call.
const MAX_STORE_TIMEOUT_MS: u64 = 10_000;

/// Bounded calls a compaction makes while holding the lease (scan + swap).
const STORE_CALLS_UNDER_LEASE: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Retries allowed before an item is dead-lettered.
    pub max_retry: i64,

    pub fetch_check_sec: u64,
    /// How far into the past a fetch still collects due items.
    pub fetch_timeout_sec: u64,
    pub fetch_per_count: usize,

    pub retry_check_sec: u64,
    /// How long a claimed item may stay un-acknowledged before reclaim.
    pub retry_timeout_sec: u64,
    pub retry_per_count: usize,

    /// Compactor lease TTL. Must be at least `2 * store_timeout_ms` so the
    /// scan and the swap both fit inside one lease.
    pub lock_ttl_ms: u64,
    /// Deadline for each store call.
    pub store_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retry: 3,
            fetch_check_sec: 1,
            fetch_timeout_sec: 600,
            fetch_per_count: 100,
            retry_check_sec: 5,
            retry_timeout_sec: 60,
            retry_per_count: 100,
            lock_ttl_ms: 8_000,
            store_timeout_ms: 3_000,
        }
    }
}

impl QueueConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, QueueError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        let invalid = |msg: &str| Err(QueueError::InvalidConfig(msg.to_string()));

        if self.max_retry < 0 {
            return invalid("max_retry must be >= 0");
        }
        if self.fetch_check_sec == 0 || self.retry_check_sec == 0 {
            return invalid("check intervals must be positive");
        }
        if self.fetch_timeout_sec == 0 || self.retry_timeout_sec == 0 {
            return invalid("timeouts must be positive");
        }
        if self.fetch_per_count == 0 || self.retry_per_count == 0 {
            return invalid("per-cycle counts must be positive");
        }
        if self.lock_ttl_ms == 0 {
            return invalid("lock_ttl_ms must be positive");
        }
        if self.store_timeout_ms == 0 || self.store_timeout_ms > MAX_STORE_TIMEOUT_MS {
            return invalid("store_timeout_ms must be within 1..=10000");
        }
        if self.lock_ttl_ms < STORE_CALLS_UNDER_LEASE * self.store_timeout_ms {
            return invalid("lock_ttl_ms must cover two store calls (2 * store_timeout_ms)");
        }
        Ok(())
    }

    pub fn fetch_check_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_check_sec)
    }

    pub fn retry_check_interval(&self) -> Duration {
        Duration::from_secs(self.retry_check_sec)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}
