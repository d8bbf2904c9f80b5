//! 多方共享的生命周期 Promise。
//!
//! ## 设计背景（Why）
//! - 同一逻辑操作（一次 open/export/close）可能被任意多个线程并发发起，只有赢得 CAS 的一方
//!   真正执行；其余调用方拿到同一个 [`Promise`] 的克隆等待结果；
//! - 结果由执行序列通过 [`Completer`] 写入，与调用方是否仍在轮询无关。
//!
//! ## 契约说明（What）
//! - `Promise` 以 `futures::channel::oneshot` 承载结果，外层包裹 `futures::future::Shared`，
//!   所有克隆观察到同一结果；
//! - 每个 Promise 携带发布它的周期纪元 [`Epoch`]，用于识别“当前” Promise；
//! - `Completer` 在写入前被丢弃时，Promise 以 [`LifecycleError::Abandoned`] 结束。

use core::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{
    FutureExt,
    channel::oneshot,
    future::{BoxFuture, Shared},
};

use crate::{
    error::{LifecycleError, LifecycleResult},
    state::Epoch,
};

/// 多方共享的操作结果。
pub struct Promise<T> {
    epoch: Epoch,
    inner: Shared<BoxFuture<'static, LifecycleResult<T>>>,
}

impl<T> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// 创建一对尚未完成的 Promise 与其完成端。
    pub fn pair(epoch: Epoch) -> (Completer<T>, Promise<T>) {
        let (sender, receiver) = oneshot::channel();
        let pending: BoxFuture<'static, LifecycleResult<T>> = receiver
            .map(|received| received.unwrap_or(Err(LifecycleError::Abandoned)))
            .boxed();
        (
            Completer { sender },
            Promise {
                epoch,
                inner: pending.shared(),
            },
        )
    }

    /// 创建已完成的 Promise。
    pub fn settled(epoch: Epoch, result: LifecycleResult<T>) -> Promise<T> {
        let (completer, promise) = Self::pair(epoch);
        completer.complete(result);
        promise
    }

    /// 发布此 Promise 的周期纪元。
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// 以新纪元重新打标，底层结果保持共享。
    pub fn retag(&self, epoch: Epoch) -> Promise<T> {
        Promise {
            epoch,
            inner: self.inner.clone(),
        }
    }

    /// 不阻塞地读取结果。
    ///
    /// 其他任务恰好正在轮询底层 `Shared` 时可能暂时返回 `None`。
    pub fn try_result(&self) -> Option<LifecycleResult<T>> {
        self.inner.clone().now_or_never()
    }

    /// 是否已经完成。
    pub fn is_settled(&self) -> bool {
        self.try_result().is_some()
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            epoch: self.epoch,
            inner: self.inner.clone(),
        }
    }
}

impl<T> Future for Promise<T>
where
    T: Clone,
{
    type Output = LifecycleResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

/// Promise 的唯一完成端。
pub struct Completer<T> {
    sender: oneshot::Sender<LifecycleResult<T>>,
}

impl<T> Completer<T> {
    /// 写入结果。所有等待方都已离开时结果被丢弃，这不是错误。
    pub fn complete(self, result: LifecycleResult<T>) {
        let _ = self.sender.send(result);
    }
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer").finish_non_exhaustive()
    }
}
