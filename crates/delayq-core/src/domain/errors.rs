//! Errors - キュー操作のエラー分類
//!
//! - `Store`: transient backend failure. Producer calls return it as-is;
//!   background loops log it and try again on the next tick.
//! - `NoHandlerRegistered`: fatal at `start()`.
//! - `Serialization`: a member that cannot be decoded.
//! - `StopTimeout`: loops did not acknowledge shutdown in time.
//!
//! Lock contention is not an error; see `CompactionOutcome::LockBusy`.

use std::time::Duration;

use thiserror::Error;

use crate::ports::{PoolError, StoreError};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no handler registered")]
    NoHandlerRegistered,

    #[error("queue already started")]
    AlreadyStarted,

    #[error("queue not started")]
    NotStarted,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("loops did not stop within {0:?}")]
    StopTimeout(Duration),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("worker pool rejected batch: {0}")]
    PoolRejected(#[from] PoolError),
}
