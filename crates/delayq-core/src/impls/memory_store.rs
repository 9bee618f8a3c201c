//! InMemoryStore - 開発用・テスト用のストア
//!
//! # 実装詳細
//! - HashMap<String, SortedSet> で key ごとに集合を管理
//! - ひとつの Mutex ですべての操作を直列化するので、各操作は原子的
//! - lease は期限付きで保持し、acquire 時に期限切れを判定

use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::ports::{
    LeaseLock, LeaseToken, Replacement, ScoreBound, ScoreRange, SortedSetStore, StoreError,
};

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: i64) {
        if let Some(previous) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(previous, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }

    /// Members scored within `range`, lowest first. Only the matching part of
    /// the ordered index is visited.
    fn in_range(&self, range: ScoreRange) -> impl DoubleEndedIterator<Item = &String> {
        self.ordered
            .range(index_bounds(range))
            .map(|(_, member)| member)
    }
}

type IndexBound = Bound<(i64, String)>;

/// Translate a score range into bounds over `(score, member)` keys.
///
/// The empty string sorts before every member, so `(score, "")` is the first
/// key that can carry `score`.
fn index_bounds(range: ScoreRange) -> (IndexBound, IndexBound) {
    let first = match range.min {
        ScoreBound::Inclusive(v) => i128::from(v),
        ScoreBound::Exclusive(v) => i128::from(v) + 1,
    };
    let past_last = match range.max {
        ScoreBound::Inclusive(v) => i128::from(v) + 1,
        ScoreBound::Exclusive(v) => i128::from(v),
    };
    if first >= past_last {
        // BTreeSet::range panics on inverted bounds
        return (
            Bound::Included((0, String::new())),
            Bound::Excluded((0, String::new())),
        );
    }

    // first < past_last <= i64::MAX + 1, so `first` always fits
    let lower = Bound::Included((first as i64, String::new()));
    let upper = match i64::try_from(past_last) {
        Ok(v) => Bound::Excluded((v, String::new())),
        Err(_) => Bound::Unbounded,
    };
    (lower, upper)
}

#[derive(Debug)]
struct Lease {
    token: LeaseToken,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct StoreState {
    sets: HashMap<String, SortedSet>,
    leases: HashMap<String, Lease>,
}

/// Process-local store implementing both [`SortedSetStore`] and [`LeaseLock`].
///
/// Clones share the same state, which lets tests run several queue
/// instances against one "remote" store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score of `member` in `key`, if present.
    pub async fn score(&self, key: &str, member: &str) -> Option<i64> {
        let state = self.state.lock().await;
        state.sets.get(key)?.scores.get(member).copied()
    }

    /// All `(member, score)` pairs of `key`, lowest score first.
    pub async fn entries(&self, key: &str) -> Vec<(String, i64)> {
        let state = self.state.lock().await;
        state
            .sets
            .get(key)
            .map(|set| {
                set.ordered
                    .iter()
                    .map(|(score, member)| (member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl SortedSetStore for InMemoryStore {
    async fn add(&self, key: &str, entries: &[(String, i64)]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let set = state.sets.entry(key.to_string()).or_default();
        for (member, score) in entries {
            set.insert(member, *score);
        }
        Ok(())
    }

    async fn remove(&self, key: &str, members: &[String]) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let Some(set) = state.sets.get_mut(key) else {
            return Ok(0);
        };
        Ok(members.iter().filter(|m| set.remove(m)).count())
    }

    async fn range_by_score_rev(
        &self,
        key: &str,
        range: ScoreRange,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().await;
        let Some(set) = state.sets.get(key) else {
            return Ok(Vec::new());
        };
        Ok(set
            .in_range(range)
            .rev()
            .skip(offset)
            .take(count)
            .cloned()
            .collect())
    }

    async fn count_by_score(&self, key: &str, range: ScoreRange) -> Result<usize, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .sets
            .get(key)
            .map(|set| set.in_range(range).count())
            .unwrap_or(0))
    }

    async fn claim_due(
        &self,
        ready: &str,
        claimed: &str,
        range: ScoreRange,
        limit: usize,
        claimed_at: i64,
    ) -> Result<Vec<String>, StoreError> {
        let mut state = self.state.lock().await;
        let due: Vec<String> = match state.sets.get(ready) {
            Some(set) => set.in_range(range).take(limit).cloned().collect(),
            None => return Ok(Vec::new()),
        };
        if due.is_empty() {
            return Ok(due);
        }

        if let Some(set) = state.sets.get_mut(ready) {
            for member in &due {
                set.remove(member);
            }
        }
        let target = state.sets.entry(claimed.to_string()).or_default();
        for member in &due {
            target.insert(member, claimed_at);
        }
        Ok(due)
    }

    async fn replace_members(
        &self,
        key: &str,
        replacements: &[Replacement],
    ) -> Result<Vec<bool>, StoreError> {
        let mut state = self.state.lock().await;
        let set = state.sets.entry(key.to_string()).or_default();
        Ok(replacements
            .iter()
            .map(|r| {
                let applied = set.remove(&r.old);
                if applied {
                    set.insert(&r.new, r.score);
                }
                applied
            })
            .collect())
    }
}

#[async_trait]
impl LeaseLock for InMemoryStore {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LeaseToken>, StoreError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if let Some(lease) = state.leases.get(key)
            && lease.expires_at > now
        {
            return Ok(None);
        }

        let token = LeaseToken::generate();
        state.leases.insert(
            key.to_string(),
            Lease {
                token: token.clone(),
                expires_at: now + ttl,
            },
        );
        Ok(Some(token))
    }

    async fn release(&self, key: &str, token: &LeaseToken) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.leases.get(key) {
            Some(lease) if lease.token == *token => {
                state.leases.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn m(s: &str) -> String {
        s.to_string()
    }

    #[tokio::test]
    async fn add_rescores_existing_member() {
        let store = InMemoryStore::new();
        store.add("q", &[(m("a"), 10)]).await.unwrap();
        store.add("q", &[(m("a"), 20)]).await.unwrap();
        assert_eq!(store.entries("q").await, vec![(m("a"), 20)]);
    }

    #[tokio::test]
    async fn remove_ignores_absent_members() {
        let store = InMemoryStore::new();
        store.add("q", &[(m("a"), 1)]).await.unwrap();
        assert_eq!(store.remove("q", &[m("a"), m("b")]).await.unwrap(), 1);
        assert_eq!(store.remove("q", &[m("a")]).await.unwrap(), 0);
        assert_eq!(store.remove("missing", &[m("a")]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn range_rev_is_descending_and_paginated() {
        let store = InMemoryStore::new();
        store
            .add("q", &[(m("a"), 1), (m("b"), 2), (m("c"), 3), (m("d"), 4)])
            .await
            .unwrap();
        let range = ScoreRange::inclusive(2, 4);
        assert_eq!(
            store.range_by_score_rev("q", range, 0, 10).await.unwrap(),
            vec![m("d"), m("c"), m("b")]
        );
        assert_eq!(
            store.range_by_score_rev("q", range, 1, 1).await.unwrap(),
            vec![m("c")]
        );
        assert_eq!(store.count_by_score("q", range).await.unwrap(), 3);
    }

    #[rstest]
    #[case::everything(ScoreRange::inclusive(i64::MIN, i64::MAX), vec!["zero", "a", "b", "top"])]
    #[case::in_flight_only(ScoreRange::left_open(0, i64::MAX), vec!["a", "b", "top"])]
    #[case::dead_only(ScoreRange::exactly(0), vec!["zero"])]
    #[case::open_both_ends(
        ScoreRange { min: ScoreBound::Exclusive(0), max: ScoreBound::Exclusive(7) },
        vec!["a"]
    )]
    #[case::inverted(ScoreRange::inclusive(9, 3), vec![])]
    #[case::empty_open(
        ScoreRange { min: ScoreBound::Exclusive(5), max: ScoreBound::Exclusive(5) },
        vec![]
    )]
    #[case::above_max(ScoreRange::left_open(i64::MAX, i64::MAX), vec![])]
    #[tokio::test]
    async fn range_bounds_select_exact_scores(
        #[case] range: ScoreRange,
        #[case] expected: Vec<&str>,
    ) {
        let store = InMemoryStore::new();
        store
            .add(
                "q",
                &[(m("zero"), 0), (m("a"), 5), (m("b"), 7), (m("top"), i64::MAX)],
            )
            .await
            .unwrap();

        let mut members = store.range_by_score_rev("q", range, 0, 10).await.unwrap();
        members.reverse();
        assert_eq!(members, expected);
        assert_eq!(store.count_by_score("q", range).await.unwrap(), expected.len());
    }

    #[tokio::test]
    async fn claim_due_moves_oldest_first_up_to_limit() {
        let store = InMemoryStore::new();
        store
            .add("q", &[(m("late"), 50), (m("a"), 5), (m("b"), 6), (m("c"), 7)])
            .await
            .unwrap();

        let claimed = store
            .claim_due("q", "q:retry", ScoreRange::inclusive(0, 10), 2, 10)
            .await
            .unwrap();
        assert_eq!(claimed, vec![m("a"), m("b")]);
        assert_eq!(store.score("q:retry", "a").await, Some(10));
        assert_eq!(store.score("q", "a").await, None);
        assert_eq!(store.score("q", "c").await, Some(7));
        assert_eq!(store.score("q", "late").await, Some(50));
    }

    #[tokio::test]
    async fn concurrent_claims_never_share_a_member() {
        let store = InMemoryStore::new();
        let entries: Vec<(String, i64)> = (0..200).map(|i| (format!("m{i}"), 1)).collect();
        store.add("q", &entries).await.unwrap();

        let mut joins = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            joins.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                loop {
                    let got = store
                        .claim_due("q", "q:retry", ScoreRange::inclusive(0, 1), 7, 1)
                        .await
                        .unwrap();
                    if got.is_empty() {
                        break;
                    }
                    mine.extend(got);
                }
                mine
            }));
        }

        let mut all = Vec::new();
        for join in joins {
            all.extend(join.await.unwrap());
        }
        let unique: BTreeSet<_> = all.iter().cloned().collect();
        assert_eq!(all.len(), 200);
        assert_eq!(unique.len(), 200);
    }

    #[tokio::test]
    async fn replace_skips_missing_old_members() {
        let store = InMemoryStore::new();
        store.add("q", &[(m("old"), 5)]).await.unwrap();

        let applied = store
            .replace_members(
                "q",
                &[
                    Replacement { old: m("old"), new: m("new"), score: 9 },
                    Replacement { old: m("gone"), new: m("ghost"), score: 9 },
                ],
            )
            .await
            .unwrap();
        assert_eq!(applied, vec![true, false]);
        assert_eq!(store.entries("q").await, vec![(m("new"), 9)]);
    }

    #[tokio::test]
    async fn replace_with_same_member_rescores_it() {
        let store = InMemoryStore::new();
        store.add("q", &[(m("x"), 5)]).await.unwrap();
        let applied = store
            .replace_members("q", &[Replacement { old: m("x"), new: m("x"), score: 0 }])
            .await
            .unwrap();
        assert_eq!(applied, vec![true]);
        assert_eq!(store.score("q", "x").await, Some(0));
    }

    #[tokio::test]
    async fn lease_is_exclusive_until_released() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(8);
        let token = store.acquire("lock", ttl).await.unwrap().unwrap();
        assert!(store.acquire("lock", ttl).await.unwrap().is_none());

        assert!(!store.release("lock", &LeaseToken::generate()).await.unwrap());
        assert!(store.acquire("lock", ttl).await.unwrap().is_none());

        assert!(store.release("lock", &token).await.unwrap());
        assert!(store.acquire("lock", ttl).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn lease_expires_after_ttl() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(8);
        let stale = store.acquire("lock", ttl).await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        let fresh = store.acquire("lock", ttl).await.unwrap().unwrap();
        assert_ne!(stale, fresh);
        // The previous holder can no longer release someone else's lease.
        assert!(!store.release("lock", &stale).await.unwrap());
    }
}
