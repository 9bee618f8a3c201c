//! delayq-core
//!
//! Delayed task queue on top of a shared sorted-set store, with at-least-once
//! delivery, bounded retries and dead-lettering.
//!
//! # モジュール構成
//! - **domain**: Item, QueueConfig, QueueKeys, QueueError
//! - **ports**: 抽象化レイヤー（SortedSetStore, LeaseLock, WorkerPool, Clock）
//! - **impls**: 実装（InMemoryStore, BoundedPool, RedisStore は feature = "redis"）
//! - **app**: DelayQueue と fetch / retry ループ

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{
    BatchHandler, CompactionOutcome, CompactionReport, DelayQueue, DelayQueueBuilder,
    QueueCounts, QueueHandle, handler_fn,
};
pub use domain::{Item, QueueConfig, QueueError};
