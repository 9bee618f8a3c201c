//! BatchHandler - 取り出したアイテムのバッチを処理する callback
//!
//! The handler owns acknowledgement: it must call `QueueHandle::done` for
//! every item it finished. Items it stays silent about are reclaimed by the
//! retry loop once their in-flight window expires.

use std::future::Future;

use async_trait::async_trait;

use crate::domain::Item;

#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle(&self, items: Vec<Item>);
}

/// Adapter turning an async closure into a [`BatchHandler`].
///
/// ```ignore
/// let handler = handler_fn(move |items| {
///     let queue = queue.clone();
///     async move { queue.done(&items).await.ok(); }
/// });
/// ```
pub struct FnHandler<F> {
    f: F,
}

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Vec<Item>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> BatchHandler for FnHandler<F>
where
    F: Fn(Vec<Item>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn handle(&self, items: Vec<Item>) {
        (self.f)(items).await
    }
}
