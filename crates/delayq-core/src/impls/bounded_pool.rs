//! BoundedPool - Semaphore で同時実行数を制限するワーカープール
//!
//! Jobs are spawned right away and wait for a permit, so submission never
//! blocks the polling loops. `close()` rejects later submissions; jobs
//! already waiting for a permit are dropped.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::ports::{PoolError, PoolJob, WorkerPool};

#[derive(Debug, Clone)]
pub struct BoundedPool {
    permits: Arc<Semaphore>,
}

impl BoundedPool {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub fn close(&self) {
        self.permits.close();
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl WorkerPool for BoundedPool {
    fn submit(&self, job: PoolJob) -> Result<(), PoolError> {
        if self.permits.is_closed() {
            return Err(PoolError::Closed);
        }
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            // closed while waiting: drop the job
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            job.await;
        });
        Ok(())
    }
}
