//! QueueCore - ストア操作のアルゴリズム本体
//!
//! Everything here talks to the store through bounded calls; nothing keeps
//! in-process state between cycles. The polling loops and the public queue
//! API both go through this type.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::status::QueueCounts;
use crate::domain::{Item, QueueConfig, QueueError, QueueKeys};
use crate::ports::{Clock, LeaseLock, Replacement, ScoreRange, SortedSetStore, StoreError};

/// Result of one retry compaction cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Another instance holds the compactor lease; nothing was done.
    LockBusy,
    Compacted(CompactionReport),
}

impl CompactionOutcome {
    pub fn report(&self) -> Option<&CompactionReport> {
        match self {
            CompactionOutcome::LockBusy => None,
            CompactionOutcome::Compacted(report) => Some(report),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Items re-armed for redelivery, already carrying their new retry count.
    pub rearmed: Vec<Item>,
    /// Items whose retry budget ran out.
    pub dead: Vec<Item>,
    /// Undecodable members moved out of the in-flight window.
    pub malformed: usize,
}

enum Staged {
    Rearm(Item),
    Dead(Item),
    Malformed,
}

pub(crate) struct QueueCore {
    pub(crate) keys: QueueKeys,
    pub(crate) config: QueueConfig,
    store: Arc<dyn SortedSetStore>,
    lock: Arc<dyn LeaseLock>,
    clock: Arc<dyn Clock>,
}

impl QueueCore {
    pub(crate) fn new(
        keys: QueueKeys,
        config: QueueConfig,
        store: Arc<dyn SortedSetStore>,
        lock: Arc<dyn LeaseLock>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            keys,
            config,
            store,
            lock,
            clock,
        }
    }

    /// Run one remote call under the configured deadline.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        let limit = self.config.store_timeout();
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| StoreError::Timeout(limit))?
    }

    fn decode_all(&self, members: Vec<String>) -> Vec<Item> {
        members
            .into_iter()
            .filter_map(|member| match Item::decode(&member) {
                Ok(item) => Some(item),
                Err(e) => {
                    error!(queue = %self.keys.ready, %member, error = %e, "dropping malformed member");
                    None
                }
            })
            .collect()
    }

    pub(crate) async fn set(&self, item: &Item) -> Result<(), QueueError> {
        let member = item.encode()?;
        self.bounded(self.store.add(&self.keys.ready, &[(member, item.at)]))
            .await?;
        Ok(())
    }

    pub(crate) async fn set_dead(&self, item: &Item) -> Result<(), QueueError> {
        let member = item.encode()?;
        self.bounded(self.store.add(&self.keys.retry, &[(member, 0)]))
            .await?;
        Ok(())
    }

    pub(crate) async fn done(&self, items: &[Item]) -> Result<usize, QueueError> {
        let members = items
            .iter()
            .map(Item::encode)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.bounded(self.store.remove(&self.keys.retry, &members)).await?)
    }

    pub(crate) async fn dead_list(&self, offset: usize, count: usize) -> Result<Vec<Item>, QueueError> {
        let members = self
            .bounded(self.store.range_by_score_rev(
                &self.keys.retry,
                ScoreRange::exactly(0),
                offset,
                count,
            ))
            .await?;
        Ok(self.decode_all(members))
    }

    pub(crate) async fn stats(&self) -> Result<QueueCounts, QueueError> {
        let everything = ScoreRange::inclusive(i64::MIN, i64::MAX);
        let ready = self
            .bounded(self.store.count_by_score(&self.keys.ready, everything))
            .await?;
        let in_flight = self
            .bounded(
                self.store
                    .count_by_score(&self.keys.retry, ScoreRange::left_open(0, i64::MAX)),
            )
            .await?;
        let dead = self
            .bounded(self.store.count_by_score(&self.keys.retry, ScoreRange::exactly(0)))
            .await?;
        Ok(QueueCounts {
            ready,
            in_flight,
            dead,
        })
    }

    /// Claim every due item (up to `fetch_per_count`) in one atomic store call.
    ///
    /// Due means `now - fetch_timeout_sec <= at <= now`. Claimed members move
    /// to the retry set scored with the claim time.
    pub(crate) async fn fetch_due(&self) -> Result<Vec<Item>, QueueError> {
        let now = self.clock.now();
        let oldest = now.saturating_sub(self.config.fetch_timeout_sec as i64);
        let members = self
            .bounded(self.store.claim_due(
                &self.keys.ready,
                &self.keys.retry,
                ScoreRange::inclusive(oldest, now),
                self.config.fetch_per_count,
                now,
            ))
            .await?;
        Ok(self.decode_all(members))
    }

    /// Reclaim stale in-flight items under the compactor lease.
    ///
    /// The lease is released before returning, whether or not the cycle
    /// itself succeeded.
    pub(crate) async fn compact(&self) -> Result<CompactionOutcome, QueueError> {
        let lease = self
            .bounded(self.lock.acquire(&self.keys.lock, self.config.lock_ttl()))
            .await?;
        let Some(token) = lease else {
            debug!(lock = %self.keys.lock, "compactor lease held elsewhere, skipping");
            return Ok(CompactionOutcome::LockBusy);
        };

        let result = self.compact_locked().await;

        match self.bounded(self.lock.release(&self.keys.lock, &token)).await {
            Ok(true) => {}
            Ok(false) => warn!(lock = %self.keys.lock, "compactor lease expired before release"),
            Err(e) => warn!(lock = %self.keys.lock, error = %e, "failed to release compactor lease"),
        }

        result.map(CompactionOutcome::Compacted)
    }

    async fn compact_locked(&self) -> Result<CompactionReport, QueueError> {
        let now = self.clock.now();
        let stale_before = now.saturating_sub(self.config.retry_timeout_sec as i64);
        let members = self
            .bounded(self.store.range_by_score_rev(
                &self.keys.retry,
                ScoreRange::left_open(0, stale_before),
                0,
                self.config.retry_per_count,
            ))
            .await?;

        let mut replacements = Vec::with_capacity(members.len());
        let mut staged = Vec::with_capacity(members.len());
        for member in members {
            match Item::decode(&member) {
                Ok(item) if item.retry_count >= self.config.max_retry => {
                    replacements.push(Replacement {
                        old: member.clone(),
                        new: member,
                        score: 0,
                    });
                    staged.push(Staged::Dead(item));
                }
                Ok(item) => {
                    let next = item.next_attempt();
                    replacements.push(Replacement {
                        old: member,
                        new: next.encode()?,
                        score: now,
                    });
                    staged.push(Staged::Rearm(next));
                }
                Err(e) => {
                    error!(queue = %self.keys.retry, %member, error = %e, "quarantining malformed member");
                    replacements.push(Replacement {
                        old: member.clone(),
                        new: member,
                        score: 0,
                    });
                    staged.push(Staged::Malformed);
                }
            }
        }

        let mut report = CompactionReport::default();
        if replacements.is_empty() {
            return Ok(report);
        }

        let applied = self
            .bounded(self.store.replace_members(&self.keys.retry, &replacements))
            .await?;
        for (entry, applied) in staged.into_iter().zip(applied) {
            if !applied {
                // acknowledged between the scan and the swap
                continue;
            }
            match entry {
                Staged::Rearm(item) => report.rearmed.push(item),
                Staged::Dead(item) => report.dead.push(item),
                Staged::Malformed => report.malformed += 1,
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    use crate::impls::InMemoryStore;
    use crate::ports::ManualClock;

    const T0: i64 = 1_700_000_000;

    /// Store whose calls all fail, except `claim_due`, which never answers.
    struct BrokenStore;

    fn down() -> StoreError {
        StoreError::Unavailable("down".into())
    }

    #[async_trait]
    impl SortedSetStore for BrokenStore {
        async fn add(&self, _key: &str, _entries: &[(String, i64)]) -> Result<(), StoreError> {
            Err(down())
        }

        async fn remove(&self, _key: &str, _members: &[String]) -> Result<usize, StoreError> {
            Err(down())
        }

        async fn range_by_score_rev(
            &self,
            _key: &str,
            _range: ScoreRange,
            _offset: usize,
            _count: usize,
        ) -> Result<Vec<String>, StoreError> {
            Err(down())
        }

        async fn count_by_score(&self, _key: &str, _range: ScoreRange) -> Result<usize, StoreError> {
            Err(down())
        }

        async fn claim_due(
            &self,
            _ready: &str,
            _claimed: &str,
            _range: ScoreRange,
            _limit: usize,
            _claimed_at: i64,
        ) -> Result<Vec<String>, StoreError> {
            std::future::pending().await
        }

        async fn replace_members(
            &self,
            _key: &str,
            _replacements: &[Replacement],
        ) -> Result<Vec<bool>, StoreError> {
            Err(down())
        }
    }

    /// Broken sorted sets, working leases.
    fn broken_core() -> (QueueCore, InMemoryStore) {
        let leases = InMemoryStore::new();
        let core = QueueCore::new(
            QueueKeys::new("jobs"),
            QueueConfig::default(),
            Arc::new(BrokenStore),
            Arc::new(leases.clone()),
            Arc::new(ManualClock::new(T0)),
        );
        (core, leases)
    }

    fn core_with(config: QueueConfig) -> (QueueCore, InMemoryStore, Arc<ManualClock>) {
        let store = InMemoryStore::new();
        let clock = Arc::new(ManualClock::new(T0));
        let core = QueueCore::new(
            QueueKeys::new("jobs"),
            config,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            clock.clone(),
        );
        (core, store, clock)
    }

    fn core() -> (QueueCore, InMemoryStore, Arc<ManualClock>) {
        core_with(QueueConfig::default())
    }

    #[tokio::test]
    async fn set_scores_by_fire_time() {
        let (core, store, _) = core();
        let item = Item::with_id("a", "mail", T0 + 10);
        core.set(&item).await.unwrap();
        assert_eq!(store.score("jobs", &item.encode().unwrap()).await, Some(T0 + 10));
    }

    #[tokio::test]
    async fn same_id_different_time_is_two_members() {
        let (core, store, _) = core();
        core.set(&Item::with_id("a", "mail", T0 + 1)).await.unwrap();
        core.set(&Item::with_id("a", "mail", T0 + 2)).await.unwrap();
        assert_eq!(store.entries("jobs").await.len(), 2);
    }

    #[tokio::test]
    async fn fetch_skips_items_older_than_backlog_window() {
        let config = QueueConfig {
            fetch_timeout_sec: 60,
            ..QueueConfig::default()
        };
        let (core, store, _) = core_with(config);
        let ancient = Item::with_id("old", "n", T0 - 61);
        let recent = Item::with_id("new", "n", T0 - 60);
        core.set(&ancient).await.unwrap();
        core.set(&recent).await.unwrap();

        let fetched = core.fetch_due().await.unwrap();
        assert_eq!(fetched, vec![recent]);
        assert!(store.score("jobs", &ancient.encode().unwrap()).await.is_some());
    }

    #[tokio::test]
    async fn fetch_respects_per_count() {
        let config = QueueConfig {
            fetch_per_count: 2,
            ..QueueConfig::default()
        };
        let (core, _, _) = core_with(config);
        for i in 0..5 {
            core.set(&Item::with_id(format!("i{i}"), "n", T0 - i)).await.unwrap();
        }
        assert_eq!(core.fetch_due().await.unwrap().len(), 2);
        assert_eq!(core.fetch_due().await.unwrap().len(), 2);
        assert_eq!(core.fetch_due().await.unwrap().len(), 1);
        assert!(core.fetch_due().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_fetched_member_is_dropped_and_later_quarantined() {
        let (core, store, clock) = core();
        store.add("jobs", &[("garbage".to_string(), T0)]).await.unwrap();
        assert!(core.fetch_due().await.unwrap().is_empty());
        assert_eq!(store.score("jobs:retry", "garbage").await, Some(T0));

        clock.advance(61);
        let outcome = core.compact().await.unwrap();
        assert_eq!(outcome.report().unwrap().malformed, 1);
        assert_eq!(store.score("jobs:retry", "garbage").await, Some(0));
        assert!(core.dead_list(0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn compaction_ignores_fresh_in_flight_items() {
        let (core, _, clock) = core();
        core.set(&Item::with_id("a", "n", T0)).await.unwrap();
        core.fetch_due().await.unwrap();

        clock.advance(59);
        let outcome = core.compact().await.unwrap();
        assert_eq!(outcome, CompactionOutcome::Compacted(CompactionReport::default()));
    }

    #[tokio::test]
    async fn compaction_skips_when_lease_is_held() {
        let (core, store, clock) = core();
        core.set(&Item::with_id("a", "n", T0)).await.unwrap();
        core.fetch_due().await.unwrap();
        clock.advance(120);

        let held = store
            .acquire("jobs:retry:lock", std::time::Duration::from_secs(8))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(core.compact().await.unwrap(), CompactionOutcome::LockBusy);

        store.release("jobs:retry:lock", &held).await.unwrap();
        let outcome = core.compact().await.unwrap();
        assert_eq!(outcome.report().unwrap().rearmed.len(), 1);
    }

    #[tokio::test]
    async fn compaction_releases_lease_after_each_cycle() {
        let (core, store, _) = core();
        core.compact().await.unwrap();
        let token = store
            .acquire("jobs:retry:lock", std::time::Duration::from_secs(8))
            .await
            .unwrap();
        assert!(token.is_some());
    }

    #[tokio::test]
    async fn done_removes_exact_member_only() {
        let (core, store, _) = core();
        let item = Item::with_id("a", "n", T0);
        core.set(&item).await.unwrap();
        let claimed = core.fetch_due().await.unwrap();

        let stale_copy = Item {
            retry_count: 1,
            ..item.clone()
        };
        assert_eq!(core.done(&[stale_copy]).await.unwrap(), 0);
        assert_eq!(core.done(&claimed).await.unwrap(), 1);
        assert_eq!(core.done(&claimed).await.unwrap(), 0);
        assert!(store.entries("jobs:retry").await.is_empty());
    }

    #[tokio::test]
    async fn stats_counts_each_collection() {
        let (core, _, _) = core();
        core.set(&Item::with_id("a", "n", T0)).await.unwrap();
        core.set(&Item::with_id("b", "n", T0 + 100)).await.unwrap();
        core.set_dead(&Item::with_id("c", "n", T0)).await.unwrap();
        core.fetch_due().await.unwrap();

        let counts = core.stats().await.unwrap();
        assert_eq!(
            counts,
            QueueCounts {
                ready: 1,
                in_flight: 1,
                dead: 1
            }
        );
    }

    #[tokio::test]
    async fn failed_compaction_still_releases_the_lease() {
        let (core, leases) = broken_core();

        let err = core.compact().await.unwrap_err();
        assert!(matches!(err, QueueError::Store(StoreError::Unavailable(_))), "{err}");

        let token = leases
            .acquire("jobs:retry:lock", Duration::from_secs(8))
            .await
            .unwrap();
        assert!(token.is_some());
    }

    #[tokio::test]
    async fn producer_calls_return_store_errors() {
        let (core, _) = broken_core();
        let item = Item::with_id("a", "n", T0);

        assert!(matches!(core.set(&item).await, Err(QueueError::Store(_))));
        assert!(matches!(core.set_dead(&item).await, Err(QueueError::Store(_))));
        assert!(matches!(
            core.done(std::slice::from_ref(&item)).await,
            Err(QueueError::Store(_))
        ));
        assert!(matches!(core.dead_list(0, 10).await, Err(QueueError::Store(_))));
        assert!(matches!(core.stats().await, Err(QueueError::Store(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_store_call_hits_the_deadline() {
        let (core, _) = broken_core();
        let limit = core.config.store_timeout();

        let err = core.fetch_due().await.unwrap_err();
        match err {
            QueueError::Store(StoreError::Timeout(after)) => assert_eq!(after, limit),
            other => panic!("expected timeout, got {other}"),
        }
    }
}
