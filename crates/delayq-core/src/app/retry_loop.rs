//! RetryLoop - 放置された in-flight アイテムの回収ループ
//!
//! # フロー
//! 1. tick ごとに compactor lease を取得（取れなければスキップ）
//! 2. 期限切れの in-flight を retry_count +1 で再投入、予算切れは dead へ
//! 3. lease を解放してから、再投入分を Dispatcher へ渡す

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::core::{CompactionOutcome, QueueCore};
use super::dispatcher::Dispatcher;
use crate::domain::QueueError;

pub(crate) struct RetryLoop {
    core: Arc<QueueCore>,
    dispatcher: Dispatcher,
}

impl RetryLoop {
    pub(crate) fn new(core: Arc<QueueCore>, dispatcher: Dispatcher) -> Self {
        Self { core, dispatcher }
    }

    pub(crate) async fn cycle(&self) -> Result<CompactionOutcome, QueueError> {
        let outcome = self.core.compact().await?;
        if let CompactionOutcome::Compacted(report) = &outcome {
            if !report.dead.is_empty() || !report.rearmed.is_empty() {
                info!(
                    queue = %self.core.keys.retry,
                    rearmed = report.rearmed.len(),
                    dead = report.dead.len(),
                    "compacted stale items"
                );
            }
            self.dispatcher.submit(report.rearmed.clone()).await?;
        }
        Ok(outcome)
    }

    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.core.config.retry_check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(queue = %self.core.keys.retry, "retry loop started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.cycle().await {
                warn!(queue = %self.core.keys.retry, error = %e, "retry cycle failed");
            }
        }

        info!(queue = %self.core.keys.retry, "retry loop stopped");
    }
}
