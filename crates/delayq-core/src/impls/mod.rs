//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStore**: 開発用・テスト用のストア（SortedSetStore + LeaseLock）
//! - **BoundedPool**: tokio ベースのワーカープール
//! - **RedisStore**: 本番用のストア（feature = "redis"）

pub mod bounded_pool;
pub mod memory_store;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use self::bounded_pool::BoundedPool;
pub use self::memory_store::InMemoryStore;
#[cfg(feature = "redis")]
pub use self::redis_store::RedisStore;
