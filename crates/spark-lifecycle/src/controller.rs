//! 控制器契约：真正执行打开/导出/关闭工作的策略对象。
//!
//! ## 设计背景（Why）
//! - 生命周期内核只负责状态与并发契约，网络 I/O、注册中心交互等都由外围端点在
//!   [`Controller`] 实现中完成；
//! - 每个 open（或扩展状态机的 export）周期由 [`ControllerFactory`] 生成一个新实例，
//!   周期结束（关闭事件发布之后）释放。
//!
//! ## 契约说明（What）
//! - `open`/`close`/`export` 返回 `'static` 的 Future，实现方需要自行克隆所需的共享状态；
//! - `fire_close` 是同步、非阻塞、尽力而为的信号，告知在途的 `open` 可以提前放弃；
//!   无法中止的实现直接忽略即可；
//! - 控制器若同时是事件处理器，可通过 [`Controller::event_handler`] 暴露自身，
//!   内核会在配置的处理器之后通知它。

use core::{fmt, ops::Deref};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use futures::future::BoxFuture;

use crate::{error::BoxError, event::LifecycleEventHandler};

/// 控制器异步操作的结果。
pub type ControllerFuture<T> = BoxFuture<'static, Result<T, BoxError>>;

/// 端点控制器。
pub trait Controller: Send + Sync + 'static {
    /// `open`（以及 `export`）成功时产出的值，会分发给所有等待方。
    type Output: Clone + Send + Sync + 'static;

    /// 开始异步打开工作。
    fn open(&self) -> ControllerFuture<Self::Output>;

    /// 开始异步拆除工作；`gracefully` 请求“先排空再停止”，排空细节由实现决定。
    fn close(&self, gracefully: bool) -> ControllerFuture<()>;

    /// 通知在途的 `open` 尽快放弃。
    fn fire_close(&self) {}

    /// 控制器自身作为事件处理器时返回 `Some`。
    fn event_handler(&self) -> Option<&dyn LifecycleEventHandler> {
        None
    }
}

/// 支持两阶段启动的控制器：先导出（注册/绑定），再打开（开始服务）。
pub trait ExportController: Controller {
    /// 开始异步导出工作。
    fn export(&self) -> ControllerFuture<Self::Output>;
}

/// 控制器工厂，在周期开始的瞬间调用。
///
/// 调用发生在赢得 CAS 的线程上，此时本周期的 Promise 已经发布。工厂 panic 会放弃本周期
/// （等待方得到 `Abandoned`，随后的关闭照常到达 `Closed`），但阶段停在 `Opening`/`Exporting`
/// 直到有人调用 `close()`。
pub struct ControllerFactory<C> {
    make: Arc<dyn Fn() -> C + Send + Sync>,
}

impl<C> ControllerFactory<C> {
    pub fn new<F>(make: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        Self {
            make: Arc::new(make),
        }
    }

    pub(crate) fn create(&self) -> Arc<C> {
        Arc::new((self.make)())
    }
}

impl<C> Clone for ControllerFactory<C> {
    fn clone(&self) -> Self {
        Self {
            make: Arc::clone(&self.make),
        }
    }
}

impl<C> fmt::Debug for ControllerFactory<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerFactory").finish_non_exhaustive()
    }
}

/// 调用方持有的控制器引用。
///
/// 句柄不会阻止关闭流程释放控制器；长时间运行的操作应定期以
/// `machine.is_close(&handle)` 检查自己是否应当协作退出。
pub struct ControllerHandle<C> {
    inner: Arc<C>,
}

impl<C> ControllerHandle<C> {
    pub(crate) fn new(inner: Arc<C>) -> Self {
        Self { inner }
    }

    /// 两个句柄是否指向同一控制器实例。
    pub fn same_as(&self, other: &ControllerHandle<C>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn arc(&self) -> &Arc<C> {
        &self.inner
    }
}

impl<C> Clone for ControllerHandle<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> Deref for ControllerHandle<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.inner
    }
}

impl<C> fmt::Debug for ControllerHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerHandle")
            .field("ptr", &Arc::as_ptr(&self.inner))
            .finish()
    }
}

/// 当前周期控制器的单一所有者槽位。
///
/// 写入只发生在赢得周期 CAS 的线程上；释放使用指针比较交换，
/// 避免旧周期的收尾覆盖新周期刚安装的控制器。
pub(crate) struct ControllerSlot<C> {
    current: ArcSwapOption<C>,
}

impl<C> ControllerSlot<C> {
    pub(crate) fn empty() -> Self {
        Self {
            current: ArcSwapOption::const_empty(),
        }
    }

    pub(crate) fn load(&self) -> Option<Arc<C>> {
        self.current.load_full()
    }

    pub(crate) fn install(&self, controller: Arc<C>) {
        self.current.store(Some(controller));
    }

    /// 仅当槽位仍是 `controller` 时清空；返回是否清空。
    pub(crate) fn release(&self, controller: &Arc<C>) -> bool {
        let expected = Some(Arc::clone(controller));
        let previous = self.current.compare_and_swap(&expected, None);
        matches!(&*previous, Some(seen) if Arc::ptr_eq(seen, controller))
    }

    pub(crate) fn holds(&self, controller: &Arc<C>) -> bool {
        matches!(&*self.current.load(), Some(seen) if Arc::ptr_eq(seen, controller))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Script(u32);

    #[test]
    fn release_only_clears_the_expected_controller() {
        let slot = ControllerSlot::empty();
        let factory = ControllerFactory::new(|| Script(1));
        let first = factory.create();
        let second = factory.create();

        slot.install(Arc::clone(&first));
        assert!(slot.holds(&first));
        assert!(!slot.release(&second), "旧周期的释放不能清掉别人的控制器");
        assert!(slot.holds(&first));

        assert!(slot.release(&first));
        assert!(slot.load().is_none());
        assert!(!slot.release(&first), "重复释放返回 false");
    }

    #[test]
    fn handles_compare_by_identity() {
        let factory = ControllerFactory::new(|| Script(7));
        let shared = factory.create();
        let left = ControllerHandle::new(Arc::clone(&shared));
        let right = left.clone();
        let other = ControllerHandle::new(factory.create());
        assert!(left.same_as(&right));
        assert!(!left.same_as(&other));
        assert_eq!(left.0, 7);
    }
}
