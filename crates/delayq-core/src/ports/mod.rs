//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（Redis などのスコア付き集合ストア、ワーカープール）
//! へのインターフェースを提供し、実装の詳細を隠蔽します。
//! 依存はすべてコンストラクタ（builder）経由で注入します。

pub mod clock;
pub mod lease_lock;
pub mod sorted_set;
pub mod worker_pool;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::lease_lock::{LeaseLock, LeaseToken};
pub use self::sorted_set::{Replacement, ScoreBound, ScoreRange, SortedSetStore, StoreError};
pub use self::worker_pool::{PoolError, PoolJob, WorkerPool};
