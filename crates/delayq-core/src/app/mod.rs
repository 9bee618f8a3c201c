//! App - アプリケーション層
//!
//! ports を組み合わせてキューの振る舞いを実装します。
//!
//! # 主要コンポーネント
//! - **DelayQueue**: 公開 API と lifecycle（start / stop）
//! - **QueueCore**: set / done / fetch / compaction の本体
//! - **FetchLoop**: 期限到来アイテムの claim と配送
//! - **RetryLoop**: lease 付きの retry compaction
//! - **Dispatcher**: ハンドラ呼び出し（inline または WorkerPool）

mod core;
mod dispatcher;
mod fetch_loop;
pub mod handler;
pub mod queue;
mod retry_loop;
pub mod status;

pub use self::core::{CompactionOutcome, CompactionReport};
pub use self::handler::{BatchHandler, FnHandler, handler_fn};
pub use self::queue::{DelayQueue, DelayQueueBuilder, QueueHandle};
pub use self::status::QueueCounts;
