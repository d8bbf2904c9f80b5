use core::fmt;
use std::sync::Arc;

use crate::{
    config::LifecycleSettings,
    controller::{Controller, ControllerFactory, ControllerHandle},
    executor::TaskSpawner,
    promise::Promise,
    state::{Epoch, Phase, State, StateWord},
};

use super::{Core, LifecycleBuilder, MachineBuilder};

/// 基础生命周期状态机：`Closed → Opening → Opened → Closing → Closed`。
///
/// # 教案式说明
/// - **意图 (Why)**：为 RPC 端点提供“每个周期恰好一次”的打开/关闭编排，外围端点只需实现
///   [`Controller`] 并调用 `open`/`close`；
/// - **契约 (What)**：
///   - 并发的 `open()` 只会触发一次控制器工厂调用，所有调用方共享同一个 Promise；
///   - `close()` 可在任意时刻调用：打断在途的打开时会等待其结束再关闭；
///   - 失败的 `open()` 总会让状态机回到 `Closed`，调用方可以直接重试；
/// - **实现 (How)**：句柄是共享内核上的廉价克隆，序列主体运行在构造时注入的
///   [`TaskSpawner`] 上。
pub struct LifecycleMachine<C: Controller> {
    core: Arc<Core<StateWord, C>>,
}

impl<C: Controller> LifecycleMachine<C> {
    /// 以任务派发器与控制器工厂开始构造。
    pub fn builder<S>(spawner: S, factory: ControllerFactory<C>) -> LifecycleBuilder<C>
    where
        S: TaskSpawner,
    {
        MachineBuilder::new(Arc::new(spawner), factory)
    }

    pub(crate) fn from_core(core: Core<StateWord, C>) -> Self {
        Self {
            core: Arc::new(core),
        }
    }

    /// 打开端点；返回所有并发调用方共享的 Promise。
    pub fn open(&self) -> Promise<C::Output> {
        self.core.open(|| {})
    }

    /// 打开端点，赢得 CAS 后在调用线程上执行 `side_effect`。
    pub fn open_with<F>(&self, side_effect: F) -> Promise<C::Output>
    where
        F: FnOnce(),
    {
        self.core.open(side_effect)
    }

    /// 关闭端点；`gracefully` 为 `false` 时跳过关闭前闸门。
    pub fn close(&self, gracefully: bool) -> Promise<()> {
        self.core.close(gracefully, || {})
    }

    /// 关闭端点，常规关闭路径上在调用线程执行 `side_effect`。
    pub fn close_with<F>(&self, gracefully: bool, side_effect: F) -> Promise<()>
    where
        F: FnOnce(),
    {
        self.core.close(gracefully, side_effect)
    }

    /// 关闭进行中时立即放行关闭前闸门；返回是否确有闸门被放行。
    pub fn pass(&self) -> bool {
        self.core.pass()
    }

    /// 仅当控制器存在且 `predicate` 匹配调用瞬间的阶段时执行 `f`；返回是否执行。
    pub fn when<P, F>(&self, predicate: P, f: F) -> bool
    where
        P: FnOnce(Phase) -> bool,
        F: FnOnce(&C),
    {
        self.core.when(predicate, f)
    }

    /// `Opening` 或 `Opened` 时执行。
    pub fn when_open<F>(&self, f: F) -> bool
    where
        F: FnOnce(&C),
    {
        self.core.when(Phase::is_open, f)
    }

    /// `Opened` 时执行。
    pub fn when_opened<F>(&self, f: F) -> bool
    where
        F: FnOnce(&C),
    {
        self.core.when(|phase| phase == Phase::Opened, f)
    }

    /// 当前控制器；关闭中或已关闭时返回 `None`。
    pub fn controller(&self) -> Option<ControllerHandle<C>> {
        self.core.controller()
    }

    /// 句柄是否已失效：不再是当前控制器，或状态机已进入关闭族。
    pub fn is_close(&self, handle: &ControllerHandle<C>) -> bool {
        self.core.is_close(handle)
    }

    /// 当前周期纪元。
    pub fn epoch(&self) -> Epoch {
        self.core.snapshot().epoch
    }

    pub fn settings(&self) -> &LifecycleSettings {
        self.core.settings()
    }
}

impl<C: Controller> State for LifecycleMachine<C> {
    fn phase(&self) -> Phase {
        self.core.word().phase()
    }
}

impl<C: Controller> Clone for LifecycleMachine<C> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<C: Controller> fmt::Debug for LifecycleMachine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.core.snapshot();
        f.debug_struct("LifecycleMachine")
            .field("label", &self.core.settings().label)
            .field("phase", &snapshot.phase)
            .field("epoch", &snapshot.epoch)
            .finish()
    }
}
