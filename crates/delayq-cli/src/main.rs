use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::{Duration, Instant, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use delayq_core::impls::InMemoryStore;
use delayq_core::ports::{Clock, SystemClock};
use delayq_core::{BatchHandler, DelayQueue, Item, QueueConfig, QueueError, QueueHandle};

/// Fails (= does not ack) the first `n` deliveries of "hello" and never acks "poison".
struct FlakyHandler {
    queue: QueueHandle,
    remaining_failures: AtomicU32,
}

impl FlakyHandler {
    fn new(queue: QueueHandle, n: u32) -> Self {
        Self {
            queue,
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl BatchHandler for FlakyHandler {
    async fn handle(&self, items: Vec<Item>) {
        let mut processed = Vec::new();
        for item in items {
            if item.name == "poison" {
                warn!(id = %item.id, retry = item.retry_count, "poison item, leaving it unacknowledged");
                continue;
            }

            let left = self.remaining_failures.load(Ordering::Relaxed);
            if left > 0 {
                self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
                warn!(id = %item.id, retry = item.retry_count, left, "intentional failure");
                continue;
            }

            println!("Hello from {} (retry={})", item.id, item.retry_count);
            processed.push(item);
        }

        // ack は処理できたものだけ。残りは retry loop が拾い直す
        if let Err(e) = self.queue.done(&processed).await {
            warn!(error = %e, "ack failed");
        }
    }
}

/// `delayq-cli [config.json]`: runs a short demo against the in-memory store.
fn load_config() -> Result<QueueConfig, QueueError> {
    match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| QueueError::InvalidConfig(format!("{path}: {e}")))?;
            QueueConfig::from_json_str(&raw)
        }
        None => Ok(QueueConfig {
            max_retry: 2,
            fetch_check_sec: 1,
            retry_check_sec: 1,
            retry_timeout_sec: 1,
            ..QueueConfig::default()
        }),
    }
}

#[tokio::main]
async fn main() -> Result<(), QueueError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();

    // (A) store と queue を用意
    let config = load_config()?;
    let store = Arc::new(InMemoryStore::new());
    let mut queue = DelayQueue::builder("demo", store.clone(), store)
        .config(config)
        .build()?;
    queue.register_handler(FlakyHandler::new(queue.handle(), 1));

    // (B) fetch / retry ループを起動
    queue.start()?;

    // (C) アイテム投入
    let now = SystemClock.now();
    let hello = Item::new("hello", now + 1);
    let poison = Item::new("poison", now);
    queue.set(&hello).await?;
    queue.set(&poison).await?;
    info!(hello = %hello.id, poison = %poison.id, "items scheduled");

    // (D) ready / in-flight が空になるまでポーリング
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        let counts = queue.stats().await?;
        if counts.ready == 0 && counts.in_flight == 0 {
            println!("counts: {counts:?}");
            break;
        }
        if Instant::now() >= deadline {
            warn!(?counts, "demo did not settle before the deadline");
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = sleep(Duration::from_millis(200)) => {}
        }
    }

    for item in queue.dead_list(0, 10).await? {
        println!("dead: id={} name={} retry={}", item.id, item.name, item.retry_count);
    }

    // (E) graceful shutdown
    queue.stop(Duration::from_secs(5)).await
}
