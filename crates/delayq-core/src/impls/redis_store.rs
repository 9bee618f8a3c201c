//! RedisStore - 本番用のストア（feature = "redis"）
//!
//! Sorted sets map 1:1 onto Redis ZSETs. The two compound operations run as
//! Lua scripts so Redis executes them without interleaving other commands.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};

use crate::ports::{
    LeaseLock, LeaseToken, Replacement, ScoreRange, SortedSetStore, StoreError,
};

const CLAIM_DUE_LUA: &str = include_str!("lua/claim_due.lua");
const REPLACE_MEMBERS_LUA: &str = include_str!("lua/replace_members.lua");
const RELEASE_LOCK_LUA: &str = include_str!("lua/release_lock.lua");

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    claim_due_script: Script,
    replace_members_script: Script,
    release_lock_script: Script,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Unavailable(format!("invalid redis url: {e}")))?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self::with_connection(conn))
    }

    pub fn with_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            claim_due_script: Script::new(CLAIM_DUE_LUA),
            replace_members_script: Script::new(REPLACE_MEMBERS_LUA),
            release_lock_script: Script::new(RELEASE_LOCK_LUA),
        }
    }

    // MultiplexedConnection is a cheap handle; each call gets its own clone.
    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

#[async_trait]
impl SortedSetStore for RedisStore {
    async fn add(&self, key: &str, entries: &[(String, i64)]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let items: Vec<(i64, &str)> = entries
            .iter()
            .map(|(member, score)| (*score, member.as_str()))
            .collect();
        let _: () = self.conn().zadd_multiple(key, &items[..]).await?;
        Ok(())
    }

    async fn remove(&self, key: &str, members: &[String]) -> Result<usize, StoreError> {
        if members.is_empty() {
            return Ok(0);
        }
        let removed: usize = self.conn().zrem(key, members).await?;
        Ok(removed)
    }

    async fn range_by_score_rev(
        &self,
        key: &str,
        range: ScoreRange,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>, StoreError> {
        let members: Vec<String> = redis::cmd("ZREVRANGEBYSCORE")
            .arg(key)
            .arg(range.max.to_arg())
            .arg(range.min.to_arg())
            .arg("LIMIT")
            .arg(offset)
            .arg(count)
            .query_async(&mut self.conn())
            .await?;
        Ok(members)
    }

    async fn count_by_score(&self, key: &str, range: ScoreRange) -> Result<usize, StoreError> {
        let count: usize = redis::cmd("ZCOUNT")
            .arg(key)
            .arg(range.min.to_arg())
            .arg(range.max.to_arg())
            .query_async(&mut self.conn())
            .await?;
        Ok(count)
    }

    async fn claim_due(
        &self,
        ready: &str,
        claimed: &str,
        range: ScoreRange,
        limit: usize,
        claimed_at: i64,
    ) -> Result<Vec<String>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let members: Vec<String> = self
            .claim_due_script
            .key(ready)
            .key(claimed)
            .arg(range.min.to_arg())
            .arg(range.max.to_arg())
            .arg(limit)
            .arg(claimed_at)
            .invoke_async(&mut self.conn())
            .await?;
        Ok(members)
    }

    async fn replace_members(
        &self,
        key: &str,
        replacements: &[Replacement],
    ) -> Result<Vec<bool>, StoreError> {
        if replacements.is_empty() {
            return Ok(Vec::new());
        }
        let mut invocation = self.replace_members_script.key(key);
        for r in replacements {
            invocation.arg(&r.old).arg(&r.new).arg(r.score);
        }
        let applied: Vec<i64> = invocation.invoke_async(&mut self.conn()).await?;
        Ok(applied.into_iter().map(|flag| flag == 1).collect())
    }
}

#[async_trait]
impl LeaseLock for RedisStore {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LeaseToken>, StoreError> {
        let token = LeaseToken::generate();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut self.conn())
            .await?;
        Ok(reply.map(|_| token))
    }

    async fn release(&self, key: &str, token: &LeaseToken) -> Result<bool, StoreError> {
        let released: i64 = self
            .release_lock_script
            .key(key)
            .arg(token.as_str())
            .invoke_async(&mut self.conn())
            .await?;
        Ok(released == 1)
    }
}
