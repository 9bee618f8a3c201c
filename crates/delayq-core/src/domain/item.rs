//! Item - 遅延実行されるワークアイテムとそのエンコード
//!
//! The store keys its sorted sets by the *encoded* item, so the encoding is
//! also the item's identity inside the store. Changing `retry_count` produces
//! a different member; the old one has to be removed explicitly.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::errors::QueueError;

/// A unit of work scheduled for execution at `at` (unix seconds).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub at: i64,
    #[serde(default)]
    pub retry_count: i64,
}

impl Item {
    /// Create an item with a freshly generated ULID id.
    pub fn new(name: impl Into<String>, at: i64) -> Self {
        Self::with_id(Ulid::new().to_string(), name, at)
    }

    pub fn with_id(id: impl Into<String>, name: impl Into<String>, at: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            at,
            retry_count: 0,
        }
    }

    /// Encode into the member string used by the sorted sets.
    ///
    /// Field order is fixed by the struct definition, so equal items always
    /// produce byte-identical members.
    pub fn encode(&self) -> Result<String, QueueError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(member: &str) -> Result<Self, QueueError> {
        Ok(serde_json::from_str(member)?)
    }

    /// Copy of this item with the retry counter bumped by one.
    pub(crate) fn next_attempt(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }
}
