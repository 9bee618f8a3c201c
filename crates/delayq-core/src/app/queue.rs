//! DelayQueue - 公開 API（producer / ack / lifecycle）
//!
//! # 使用例
//! ```ignore
//! let store = Arc::new(InMemoryStore::new());
//! let mut queue = DelayQueue::builder("mail", store.clone(), store).build()?;
//! let handle = queue.handle();
//! queue.register_handler(handler_fn(move |items| {
//!     let handle = handle.clone();
//!     async move { let _ = handle.done(&items).await; }
//! }));
//! queue.start()?;
//! queue.set(&Item::new("send_welcome", now + 30)).await?;
//! queue.stop(Duration::from_secs(5)).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::core::{CompactionOutcome, QueueCore};
use super::dispatcher::Dispatcher;
use super::fetch_loop::FetchLoop;
use super::handler::BatchHandler;
use super::retry_loop::RetryLoop;
use super::status::QueueCounts;
use crate::domain::{Item, QueueConfig, QueueError, QueueKeys};
use crate::ports::{Clock, LeaseLock, SortedSetStore, SystemClock, WorkerPool};

/// Cloneable producer / acknowledgement handle.
///
/// Handlers keep one of these to call [`QueueHandle::done`].
#[derive(Clone)]
pub struct QueueHandle {
    core: Arc<QueueCore>,
}

impl QueueHandle {
    pub fn keys(&self) -> &QueueKeys {
        &self.core.keys
    }

    /// Schedule `item` for `item.at`.
    ///
    /// Items are compared by their full encoding, so two items with the same
    /// id but different fire times are stored independently.
    pub async fn set(&self, item: &Item) -> Result<(), QueueError> {
        self.core.set(item).await
    }

    /// Put `item` straight into the dead-letter state.
    pub async fn set_dead(&self, item: &Item) -> Result<(), QueueError> {
        self.core.set_dead(item).await
    }

    /// Acknowledge processed items. Already-removed items are ignored;
    /// returns how many were actually removed.
    pub async fn done(&self, items: &[Item]) -> Result<usize, QueueError> {
        self.core.done(items).await
    }

    /// Dead-lettered items, newest first.
    pub async fn dead_list(&self, offset: usize, count: usize) -> Result<Vec<Item>, QueueError> {
        self.core.dead_list(offset, count).await
    }

    pub async fn stats(&self) -> Result<QueueCounts, QueueError> {
        self.core.stats().await
    }
}

struct RunningLoops {
    shutdown: watch::Sender<bool>,
    /// Loops not yet joined. Entries leave only once their task has ended.
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

/// Delayed queue with at-least-once delivery, retry and dead-lettering.
pub struct DelayQueue {
    handle: QueueHandle,
    handler: Option<Arc<dyn BatchHandler>>,
    pool: Option<Arc<dyn WorkerPool>>,
    running: Option<RunningLoops>,
}

impl DelayQueue {
    pub fn builder(
        name: impl Into<String>,
        store: Arc<dyn SortedSetStore>,
        lock: Arc<dyn LeaseLock>,
    ) -> DelayQueueBuilder {
        DelayQueueBuilder::new(name, store, lock)
    }

    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.handle.core.config
    }

    /// Set the batch callback. Replaces any previous one; takes effect on the
    /// next `start()`.
    pub fn register_handler(&mut self, handler: impl BatchHandler + 'static) {
        self.handler = Some(Arc::new(handler));
    }

    pub async fn set(&self, item: &Item) -> Result<(), QueueError> {
        self.handle.set(item).await
    }

    pub async fn set_dead(&self, item: &Item) -> Result<(), QueueError> {
        self.handle.set_dead(item).await
    }

    pub async fn done(&self, items: &[Item]) -> Result<usize, QueueError> {
        self.handle.done(items).await
    }

    pub async fn dead_list(&self, offset: usize, count: usize) -> Result<Vec<Item>, QueueError> {
        self.handle.dead_list(offset, count).await
    }

    pub async fn stats(&self) -> Result<QueueCounts, QueueError> {
        self.handle.stats().await
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    fn dispatcher(&self) -> Result<Dispatcher, QueueError> {
        let handler = self.handler.clone().ok_or(QueueError::NoHandlerRegistered)?;
        Ok(Dispatcher::new(handler, self.pool.clone()))
    }

    /// Run one fetch cycle now: claim due items and dispatch them.
    pub async fn fetch_now(&self) -> Result<usize, QueueError> {
        FetchLoop::new(Arc::clone(&self.handle.core), self.dispatcher()?)
            .cycle()
            .await
    }

    /// Run one retry compaction cycle now and dispatch re-armed items.
    pub async fn compact_now(&self) -> Result<CompactionOutcome, QueueError> {
        RetryLoop::new(Arc::clone(&self.handle.core), self.dispatcher()?)
            .cycle()
            .await
    }

    /// Launch the fetch and retry loops in the background.
    ///
    /// # Panics
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self) -> Result<(), QueueError> {
        if self.running.is_some() {
            return Err(QueueError::AlreadyStarted);
        }
        let dispatcher = self.dispatcher()?;
        let core = &self.handle.core;
        let (shutdown, shutdown_rx) = watch::channel(false);

        let fetch = tokio::spawn(
            FetchLoop::new(Arc::clone(core), dispatcher.clone()).run(shutdown_rx.clone()),
        );
        let retry = tokio::spawn(RetryLoop::new(Arc::clone(core), dispatcher).run(shutdown_rx));

        info!(queue = %core.keys.ready, "queue started");
        self.running = Some(RunningLoops {
            shutdown,
            tasks: vec![("fetch", fetch), ("retry", retry)],
        });
        Ok(())
    }

    /// Signal both loops to exit and wait up to `timeout` for them.
    ///
    /// A cycle already in progress is allowed to finish; it is never cut off
    /// mid-call. When the bound elapses `StopTimeout` is returned and the
    /// queue still counts as running: `start()` keeps failing until a later
    /// `stop()` has seen both loops exit.
    pub async fn stop(&mut self, timeout: Duration) -> Result<(), QueueError> {
        let loops = self.running.as_mut().ok_or(QueueError::NotStarted)?;
        // receivers may already be gone if a loop panicked
        let _ = loops.shutdown.send(true);

        let tasks = &mut loops.tasks;
        let joined = tokio::time::timeout(timeout, async {
            while let Some((name, join)) = tasks.first_mut() {
                if let Err(e) = join.await {
                    error!(task = *name, error = %e, "queue loop terminated abnormally");
                }
                tasks.remove(0);
            }
        })
        .await;

        match joined {
            Ok(()) => {
                self.running = None;
                info!(queue = %self.handle.core.keys.ready, "queue stopped");
                Ok(())
            }
            Err(_) => Err(QueueError::StopTimeout(timeout)),
        }
    }
}

/// Wires the queue's collaborators; every dependency is passed in explicitly.
pub struct DelayQueueBuilder {
    name: String,
    store: Arc<dyn SortedSetStore>,
    lock: Arc<dyn LeaseLock>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    pool: Option<Arc<dyn WorkerPool>>,
    handler: Option<Arc<dyn BatchHandler>>,
}

impl DelayQueueBuilder {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn SortedSetStore>,
        lock: Arc<dyn LeaseLock>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            lock,
            config: QueueConfig::default(),
            clock: Arc::new(SystemClock),
            pool: None,
            handler: None,
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn worker_pool(mut self, pool: Arc<dyn WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn handler(mut self, handler: impl BatchHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<DelayQueue, QueueError> {
        if self.name.is_empty() {
            return Err(QueueError::InvalidConfig("queue name must not be empty".into()));
        }
        self.config.validate()?;

        let core = QueueCore::new(
            QueueKeys::new(&self.name),
            self.config,
            self.store,
            self.lock,
            self.clock,
        );
        Ok(DelayQueue {
            handle: QueueHandle {
                core: Arc::new(core),
            },
            handler: self.handler,
            pool: self.pool,
            running: None,
        })
    }
}
