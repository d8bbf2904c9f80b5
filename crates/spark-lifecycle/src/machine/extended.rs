use core::fmt;
use std::sync::Arc;

use crate::{
    config::LifecycleSettings,
    controller::{ControllerFactory, ControllerHandle, ExportController},
    executor::TaskSpawner,
    promise::Promise,
    state::{Epoch, ExState, ExStateTransition, ExStateWord, Phase, State, Transition},
};

use super::{Core, ExLifecycleBuilder, MachineBuilder};

/// 两阶段启动的生命周期状态机：`Closed → Exporting → Exported → Opening → Opened`。
///
/// # 教案式说明
/// - **意图 (Why)**：服务提供方通常先导出（注册/绑定资源），再开始接收流量；把两步拆开后，
///   打开失败只需回滚到 `Exported`，重试时无需重复注册；
/// - **契约 (What)**：
///   - `export()` 调用一次控制器工厂，得到的控制器在随后的 `open()` 中复用；
///   - 打开失败时阶段从 `Opening` 回滚到 `Exported`，导出的资源保持有效，需要显式 `close()` 释放；
///   - 未导出就调用 `open()` 会得到非法状态错误；
/// - **实现 (How)**：与 [`super::LifecycleMachine`] 共享内核，只是共享字换成 [`ExStateWord`]。
pub struct ExLifecycleMachine<C: ExportController> {
    core: Arc<Core<ExStateWord, C>>,
}

impl<C: ExportController> ExLifecycleMachine<C> {
    /// 以任务派发器与控制器工厂开始构造。
    pub fn builder<S>(spawner: S, factory: ControllerFactory<C>) -> ExLifecycleBuilder<C>
    where
        S: TaskSpawner,
    {
        MachineBuilder::new(Arc::new(spawner), factory)
    }

    pub(crate) fn from_core(core: Core<ExStateWord, C>) -> Self {
        Self {
            core: Arc::new(core),
        }
    }

    /// 导出端点。
    pub fn export(&self) -> Promise<C::Output> {
        self.export_with(|| {})
    }

    /// 导出端点，赢得 CAS 后在调用线程上执行 `side_effect`。
    pub fn export_with<F>(&self, side_effect: F) -> Promise<C::Output>
    where
        F: FnOnce(),
    {
        match self.core.word().try_exporting() {
            Transition::Success(epoch) => {
                let start = |controller: &C| controller.export();
                self.core
                    .begin_export(epoch, side_effect, start, ExStateWord::try_exported)
            }
            Transition::Failed(seen) => self.core.join_export(seen),
        }
    }

    /// 在已导出的端点上开始服务；打开失败回滚到 `Exported`。
    pub fn open(&self) -> Promise<C::Output> {
        self.core.open(|| {})
    }

    pub fn open_with<F>(&self, side_effect: F) -> Promise<C::Output>
    where
        F: FnOnce(),
    {
        self.core.open(side_effect)
    }

    /// 关闭端点，可从导出或打开的任一阶段发起。
    pub fn close(&self, gracefully: bool) -> Promise<()> {
        self.core.close(gracefully, || {})
    }

    pub fn close_with<F>(&self, gracefully: bool, side_effect: F) -> Promise<()>
    where
        F: FnOnce(),
    {
        self.core.close(gracefully, side_effect)
    }

    pub fn pass(&self) -> bool {
        self.core.pass()
    }

    pub fn when<P, F>(&self, predicate: P, f: F) -> bool
    where
        P: FnOnce(Phase) -> bool,
        F: FnOnce(&C),
    {
        self.core.when(predicate, f)
    }

    pub fn when_open<F>(&self, f: F) -> bool
    where
        F: FnOnce(&C),
    {
        self.core.when(Phase::is_open, f)
    }

    pub fn when_opened<F>(&self, f: F) -> bool
    where
        F: FnOnce(&C),
    {
        self.core.when(|phase| phase == Phase::Opened, f)
    }

    /// `Exporting` 或 `Exported` 时执行。
    pub fn when_export<F>(&self, f: F) -> bool
    where
        F: FnOnce(&C),
    {
        self.core.when(Phase::is_export, f)
    }

    pub fn when_exported<F>(&self, f: F) -> bool
    where
        F: FnOnce(&C),
    {
        self.core.when(|phase| phase == Phase::Exported, f)
    }

    pub fn controller(&self) -> Option<ControllerHandle<C>> {
        self.core.controller()
    }

    pub fn is_close(&self, handle: &ControllerHandle<C>) -> bool {
        self.core.is_close(handle)
    }

    pub fn epoch(&self) -> Epoch {
        self.core.snapshot().epoch
    }

    pub fn settings(&self) -> &LifecycleSettings {
        self.core.settings()
    }
}

impl<C: ExportController> State for ExLifecycleMachine<C> {
    fn phase(&self) -> Phase {
        self.core.word().phase()
    }
}

impl<C: ExportController> ExState for ExLifecycleMachine<C> {}

impl<C: ExportController> Clone for ExLifecycleMachine<C> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<C: ExportController> fmt::Debug for ExLifecycleMachine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.core.snapshot();
        f.debug_struct("ExLifecycleMachine")
            .field("label", &self.core.settings().label)
            .field("phase", &snapshot.phase)
            .field("epoch", &snapshot.epoch)
            .finish()
    }
}
