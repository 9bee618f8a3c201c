//! FetchLoop - 期限到来アイテムの取り出しループ
//!
//! # フロー
//! 1. tick ごとに QueueCore::fetch_due() で原子的に claim
//! 2. Dispatcher でハンドラへ渡す
//!
//! No lock is taken: the store-side claim already guarantees that each due
//! member goes to exactly one fetcher.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::core::QueueCore;
use super::dispatcher::Dispatcher;
use crate::domain::QueueError;

pub(crate) struct FetchLoop {
    core: Arc<QueueCore>,
    dispatcher: Dispatcher,
}

impl FetchLoop {
    pub(crate) fn new(core: Arc<QueueCore>, dispatcher: Dispatcher) -> Self {
        Self { core, dispatcher }
    }

    /// One claim-and-dispatch cycle. Returns how many items were dispatched.
    pub(crate) async fn cycle(&self) -> Result<usize, QueueError> {
        let items = self.core.fetch_due().await?;
        let claimed = items.len();
        if claimed > 0 {
            debug!(queue = %self.core.keys.ready, claimed, "claimed due items");
            self.dispatcher.submit(items).await?;
        }
        Ok(claimed)
    }

    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.core.config.fetch_check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(queue = %self.core.keys.ready, "fetch loop started");

        loop {
            // stop は tick の合間にだけ観測する（処理中のサイクルは中断しない）
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.cycle().await {
                warn!(queue = %self.core.keys.ready, error = %e, "fetch cycle failed");
            }
        }

        info!(queue = %self.core.keys.ready, "fetch loop stopped");
    }
}
