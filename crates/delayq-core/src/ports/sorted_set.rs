//! SortedSetStore port - スコア付き集合ストア（Redis または InMemory）
//!
//! # 設計原則
//! - member は不透明な文字列（エンコード済み Item）
//! - score は unix 秒
//! - `claim_due` と `replace_members` はストア側で原子的に実行される

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// One end of a score range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBound {
    Inclusive(i64),
    Exclusive(i64),
}

impl ScoreBound {
    /// Redis range syntax (`5` or `(5`).
    pub fn to_arg(self) -> String {
        match self {
            ScoreBound::Inclusive(v) => v.to_string(),
            ScoreBound::Exclusive(v) => format!("({v}"),
        }
    }

    fn admits_from_below(self, score: i64) -> bool {
        match self {
            ScoreBound::Inclusive(v) => score >= v,
            ScoreBound::Exclusive(v) => score > v,
        }
    }

    fn admits_from_above(self, score: i64) -> bool {
        match self {
            ScoreBound::Inclusive(v) => score <= v,
            ScoreBound::Exclusive(v) => score < v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreRange {
    pub min: ScoreBound,
    pub max: ScoreBound,
}

impl ScoreRange {
    /// `[min, max]`
    pub fn inclusive(min: i64, max: i64) -> Self {
        Self {
            min: ScoreBound::Inclusive(min),
            max: ScoreBound::Inclusive(max),
        }
    }

    /// `(min, max]`
    pub fn left_open(min: i64, max: i64) -> Self {
        Self {
            min: ScoreBound::Exclusive(min),
            max: ScoreBound::Inclusive(max),
        }
    }

    /// Exactly one score.
    pub fn exactly(score: i64) -> Self {
        Self::inclusive(score, score)
    }

    pub fn contains(&self, score: i64) -> bool {
        self.min.admits_from_below(score) && self.max.admits_from_above(score)
    }
}

/// Swap `old` for `new` (scored `score`) in one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub old: String,
    pub new: String,
    pub score: i64,
}

/// Ordered-collection store used by the queue.
///
/// Implementations must make `claim_due` and `replace_members` atomic with
/// respect to every other call on the same store.
#[async_trait]
pub trait SortedSetStore: Send + Sync {
    /// Insert or re-score members.
    async fn add(&self, key: &str, entries: &[(String, i64)]) -> Result<(), StoreError>;

    /// Remove members; absent members are ignored. Returns how many were removed.
    async fn remove(&self, key: &str, members: &[String]) -> Result<usize, StoreError>;

    /// Members in `range`, highest score first, paginated.
    async fn range_by_score_rev(
        &self,
        key: &str,
        range: ScoreRange,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>, StoreError>;

    async fn count_by_score(&self, key: &str, range: ScoreRange) -> Result<usize, StoreError>;

    /// Atomically take up to `limit` members of `ready` within `range`
    /// (lowest score first), remove them from `ready` and insert them into
    /// `claimed` with score `claimed_at`. Returns the moved members.
    async fn claim_due(
        &self,
        ready: &str,
        claimed: &str,
        range: ScoreRange,
        limit: usize,
        claimed_at: i64,
    ) -> Result<Vec<String>, StoreError>;

    /// Atomically apply `replacements` to `key`. A replacement only inserts
    /// its `new` member if its `old` member was present and got removed.
    /// Returns one applied flag per replacement.
    async fn replace_members(
        &self,
        key: &str,
        replacements: &[Replacement],
    ) -> Result<Vec<bool>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ScoreRange::inclusive(1, 3), 1, true)]
    #[case(ScoreRange::inclusive(1, 3), 3, true)]
    #[case(ScoreRange::inclusive(1, 3), 4, false)]
    #[case(ScoreRange::left_open(0, 10), 0, false)]
    #[case(ScoreRange::left_open(0, 10), 1, true)]
    #[case(ScoreRange::exactly(0), 0, true)]
    #[case(ScoreRange::exactly(0), 1, false)]
    fn range_contains(#[case] range: ScoreRange, #[case] score: i64, #[case] expected: bool) {
        assert_eq!(range.contains(score), expected);
    }

    #[test]
    fn bounds_render_redis_syntax() {
        assert_eq!(ScoreBound::Inclusive(5).to_arg(), "5");
        assert_eq!(ScoreBound::Exclusive(0).to_arg(), "(0");
    }
}
