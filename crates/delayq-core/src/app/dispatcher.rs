//! Dispatcher - バッチをハンドラへ渡す
//!
//! With a worker pool the handler runs on the pool; without one it runs
//! inline on the polling loop, which then waits for it before the next tick.

use std::sync::Arc;

use tracing::error;

use super::handler::BatchHandler;
use crate::domain::{Item, QueueError};
use crate::ports::WorkerPool;

#[derive(Clone)]
pub(crate) struct Dispatcher {
    handler: Arc<dyn BatchHandler>,
    pool: Option<Arc<dyn WorkerPool>>,
}

impl Dispatcher {
    pub(crate) fn new(handler: Arc<dyn BatchHandler>, pool: Option<Arc<dyn WorkerPool>>) -> Self {
        Self { handler, pool }
    }

    pub(crate) async fn submit(&self, items: Vec<Item>) -> Result<(), QueueError> {
        if items.is_empty() {
            return Ok(());
        }
        match &self.pool {
            Some(pool) => {
                let handler = Arc::clone(&self.handler);
                let count = items.len();
                pool.submit(Box::pin(async move { handler.handle(items).await }))
                    .inspect_err(|e| error!(count, error = %e, "worker pool rejected batch"))?;
                Ok(())
            }
            None => {
                self.handler.handle(items).await;
                Ok(())
            }
        }
    }
}
