//! WorkerPool port - ハンドラ呼び出しの並列実行
//!
//! Saturation and queueing policy belong to the implementation.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// A unit of work handed to the pool.
pub type PoolJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool is closed")]
    Closed,
}

pub trait WorkerPool: Send + Sync {
    fn submit(&self, job: PoolJob) -> Result<(), PoolError>;
}
