//! LeaseLock port - TTL 付きの分散ロック
//!
//! # 設計原則
//! - acquire は所有トークンを返す（取れなければ None）
//! - release は compare-and-delete（トークンが一致する場合のみ削除）

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use ulid::Ulid;

use super::StoreError;

/// Ownership proof for an acquired lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseToken(String);

impl LeaseToken {
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LeaseToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[async_trait]
pub trait LeaseLock: Send + Sync {
    /// Try to take the lease on `key` for `ttl`. `None` means someone else holds it.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LeaseToken>, StoreError>;

    /// Release the lease if `token` still owns it. Returns whether it did.
    async fn release(&self, key: &str, token: &LeaseToken) -> Result<bool, StoreError>;
}
