//! 生命周期序列的任务派发契约。
//!
//! # 设计背景（Why）
//! - Rust 的 Future 是惰性的：若打开/关闭序列只存在于调用方返回的 Future 中，调用方一旦丢弃它，
//!   状态机就会停留在 `Opening` 或 `Closing`；
//! - 因此每个序列在同步前置步骤（CAS、发布 Promise、创建控制器、发布起始事件）之后，
//!   作为独立任务交给 [`TaskSpawner`]，结果经由 Promise 交付，与调用方是否继续等待无关。
//!
//! # 契约说明（What）
//! - `spawn_task` 必须立即返回，不得在调用线程上同步驱动任务；
//! - 执行器关闭导致任务被丢弃时，对应 Promise 以 `LifecycleError::Abandoned` 结束。
//!
//! # 风险提示（Trade-offs）
//! - 内核不持有专属线程，派发器由外围端点注入，同一执行器可以在多个状态机之间共享。

use std::sync::Arc;

use futures::future::BoxFuture;

/// 生命周期序列使用的任务派发器。
pub trait TaskSpawner: Send + Sync + 'static {
    /// 以分离方式运行任务。
    fn spawn_task(&self, task: BoxFuture<'static, ()>);
}

impl<S> TaskSpawner for Arc<S>
where
    S: TaskSpawner + ?Sized,
{
    fn spawn_task(&self, task: BoxFuture<'static, ()>) {
        (**self).spawn_task(task)
    }
}

#[cfg(feature = "thread-pool")]
impl TaskSpawner for futures::executor::ThreadPool {
    fn spawn_task(&self, task: BoxFuture<'static, ()>) {
        self.spawn_ok(task);
    }
}

#[cfg(feature = "runtime-tokio")]
pub use self::tokio_spawner::TokioSpawner;

#[cfg(feature = "runtime-tokio")]
mod tokio_spawner {
    use futures::future::BoxFuture;
    use tokio::runtime::Handle;

    use super::TaskSpawner;

    /// 把序列派发到 Tokio 运行时。
    #[derive(Clone, Debug)]
    pub struct TokioSpawner {
        handle: Handle,
    }

    impl TokioSpawner {
        pub fn new(handle: Handle) -> Self {
            Self { handle }
        }

        /// 绑定当前上下文的运行时；不在运行时内调用时返回 `None`。
        pub fn current() -> Option<Self> {
            Handle::try_current().ok().map(Self::new)
        }
    }

    impl TaskSpawner for TokioSpawner {
        fn spawn_task(&self, task: BoxFuture<'static, ()>) {
            // 句柄被丢弃不会取消任务。
            drop(self.handle.spawn(task));
        }
    }
}
