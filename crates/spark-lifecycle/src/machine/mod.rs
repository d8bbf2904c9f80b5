//! 生命周期编排器。
//!
//! # 设计背景（Why）
//! - 把状态字 CAS、Promise 发布、闸门等待、控制器调用与事件发布串成 `open`、`close`、`export`
//!   三条序列，允许任意多个线程并发调用而不重复执行工作；
//! - 基础状态机（[`LifecycleMachine`]）与两阶段启动状态机（[`ExLifecycleMachine`]）共享同一个
//!   内核 [`Core`]，差异收敛到共享字类型与少量分支。
//!
//! # 逻辑解析（How）
//! - 每条序列分为同步前置与异步主体：前置在调用线程上完成 CAS、创建/复用控制器、发布 Promise、
//!   发布起始事件与执行副作用回调；主体交给 [`TaskSpawner`] 以分离任务运行；
//! - 竞争失败的调用方读取 `(phase, epoch)`，只等待同纪元的 Promise；阶段离开目标族时立即
//!   得到失败的非法状态 Promise；
//! - 关闭赢家若打断了在途的 open/export，先等待其 Promise，再进入终止步骤。
//!
//! # 风险提示（Trade-offs）
//! - 等待 Promise 发布的退避循环运行在调用线程上，窗口只覆盖“CAS 成功到发布完成”的几条指令，
//!   不是通用互斥手段；
//! - 控制器异步操作无法被强制取消，`fire_close` 只是协作信号。

mod base;
mod builder;
mod extended;

pub use base::LifecycleMachine;
pub use builder::{ExLifecycleBuilder, LifecycleBuilder, MachineBuilder};
pub use extended::ExLifecycleMachine;

use core::{future::Future, hint};
use std::{sync::Arc, thread};

use futures::FutureExt;

use crate::{
    config::LifecycleSettings,
    controller::{Controller, ControllerFactory, ControllerFuture, ControllerHandle, ControllerSlot},
    cycle::LifecycleFutures,
    error::{ControllerOperation, GateKind, IllegalStateFactory, LifecycleError, LifecycleResult},
    event::{EventBus, LifecycleEvent, LifecycleEventKind},
    executor::TaskSpawner,
    gate::Gate,
    observability::outcome,
    promise::{Completer, Promise},
    state::{Closing, CycleWord, Epoch, Phase, PhaseSnapshot, Transition},
};

/// 在途的“启动类”操作：打开或导出。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Leg {
    Open,
    Export,
}

impl Leg {
    const fn in_flight(self) -> Phase {
        match self {
            Leg::Open => Phase::Opening,
            Leg::Export => Phase::Exporting,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Leg::Open => "open",
            Leg::Export => "export",
        }
    }

    const fn operation(self) -> ControllerOperation {
        match self {
            Leg::Open => ControllerOperation::Open,
            Leg::Export => ControllerOperation::Export,
        }
    }

    const fn start(self) -> LifecycleEventKind {
        match self {
            Leg::Open => LifecycleEventKind::StartOpen,
            Leg::Export => LifecycleEventKind::StartExport,
        }
    }

    const fn success(self) -> LifecycleEventKind {
        match self {
            Leg::Open => LifecycleEventKind::SuccessOpen,
            Leg::Export => LifecycleEventKind::SuccessExport,
        }
    }

    const fn failure(self) -> LifecycleEventKind {
        match self {
            Leg::Open => LifecycleEventKind::FailOpen,
            Leg::Export => LifecycleEventKind::FailExport,
        }
    }

    const fn illegal_state(self) -> LifecycleEventKind {
        match self {
            Leg::Open => LifecycleEventKind::FailOpenIllegalState,
            Leg::Export => LifecycleEventKind::FailExportIllegalState,
        }
    }
}

/// 赢得启动 CAS 后、交给异步主体的上下文。
pub(crate) struct Attempt<C: Controller> {
    leg: Leg,
    epoch: Epoch,
    controller: Option<Arc<C>>,
    completer: Completer<C::Output>,
}

/// 构造内核所需的全部协作者。
pub(crate) struct Parts<C> {
    pub(crate) spawner: Arc<dyn TaskSpawner>,
    pub(crate) factory: ControllerFactory<C>,
    pub(crate) illegal_state: IllegalStateFactory,
    pub(crate) events: EventBus,
    pub(crate) settings: LifecycleSettings,
}

/// 基础与扩展状态机共享的编排内核。
pub(crate) struct Core<W, C: Controller> {
    word: W,
    futures: LifecycleFutures<C::Output>,
    controller: ControllerSlot<C>,
    factory: ControllerFactory<C>,
    illegal_state: IllegalStateFactory,
    events: EventBus,
    settings: LifecycleSettings,
    spawner: Arc<dyn TaskSpawner>,
}

impl<W, C> Core<W, C>
where
    W: CycleWord,
    C: Controller,
{
    pub(crate) fn new(futures: LifecycleFutures<C::Output>, parts: Parts<C>) -> Self {
        Self {
            word: W::fresh(),
            futures,
            controller: ControllerSlot::empty(),
            factory: parts.factory,
            illegal_state: parts.illegal_state,
            events: parts.events,
            settings: parts.settings,
            spawner: parts.spawner,
        }
    }

    pub(crate) fn word(&self) -> &W {
        &self.word
    }

    pub(crate) fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub(crate) fn snapshot(&self) -> PhaseSnapshot {
        self.word.snapshot()
    }

    pub(crate) fn open<F>(self: &Arc<Self>, side_effect: F) -> Promise<C::Output>
    where
        F: FnOnce(),
    {
        let epoch = match self.word.try_opening() {
            Transition::Success(epoch) => epoch,
            Transition::Failed(seen) => {
                return self.join_published(Leg::Open.name(), seen, Phase::is_open, |futures| {
                    futures.current_open()
                });
            }
        };
        self.trace_phase(Phase::Opening, epoch);
        // 先发布再调用工厂：工厂 panic 时完成端随栈展开被丢弃，等待者得到 `Abandoned`。
        let (completer, promise) = Promise::pair(epoch);
        self.futures.publish_open(promise.clone());

        // 两阶段启动复用导出时创建的控制器，工厂每个周期只调用一次。
        let controller = if W::TWO_PHASE {
            self.controller.load()
        } else {
            let created = self.factory.create();
            self.controller.install(Arc::clone(&created));
            Some(created)
        };

        self.emit(Leg::Open.start(), None, controller.as_ref());
        side_effect();
        let gate = self.futures.new_before_open_gate();
        let attempt = Attempt {
            leg: Leg::Open,
            epoch,
            controller,
            completer,
        };
        let start = |controller: &C| controller.open();
        self.spawn(Arc::clone(self).drive(attempt, gate, start, W::try_opened));
        promise
    }

    /// 赢得 `Closed → Exporting` 之后的同步前置；由扩展状态机调用。
    pub(crate) fn begin_export<F, S>(
        self: &Arc<Self>,
        epoch: Epoch,
        side_effect: F,
        start: S,
        confirm: fn(&W) -> Transition,
    ) -> Promise<C::Output>
    where
        F: FnOnce(),
        S: FnOnce(&C) -> ControllerFuture<C::Output> + Send + 'static,
    {
        self.trace_phase(Phase::Exporting, epoch);
        let (completer, promise) = Promise::pair(epoch);
        self.futures.publish_export(promise.clone());
        let controller = self.factory.create();
        self.controller.install(Arc::clone(&controller));

        self.emit(Leg::Export.start(), None, Some(&controller));
        side_effect();
        let gate = self.futures.new_before_export_gate();
        let attempt = Attempt {
            leg: Leg::Export,
            epoch,
            controller: Some(controller),
            completer,
        };
        self.spawn(Arc::clone(self).drive(attempt, gate, start, confirm));
        promise
    }

    pub(crate) fn join_export(&self, seen: PhaseSnapshot) -> Promise<C::Output> {
        self.join_published(Leg::Export.name(), seen, Phase::is_export, |futures| {
            futures.current_export()
        })
    }

    /// 启动类操作的异步主体：闸门 → 控制器 → 确认迁移 → 事件 → 完成 Promise。
    async fn drive<S>(
        self: Arc<Self>,
        attempt: Attempt<C>,
        gate: Gate,
        start: S,
        confirm: fn(&W) -> Transition,
    ) where
        S: FnOnce(&C) -> ControllerFuture<C::Output> + Send + 'static,
    {
        let gated = gate.wait().await;
        if !self.still_current(attempt.leg, attempt.epoch) {
            return self.abort_illegal(attempt).await;
        }
        let Some(controller) = attempt.controller.clone() else {
            return self.abort_illegal(attempt).await;
        };
        if let Err(error) = gated {
            return self.fail_in_flight(attempt, controller, error).await;
        }

        let outcome = start(&*controller).await;
        if !self.still_current(attempt.leg, attempt.epoch) {
            return self.abort_illegal(attempt).await;
        }
        match outcome {
            Err(cause) => {
                let error = LifecycleError::controller(attempt.leg.operation(), cause);
                self.fail_in_flight(attempt, controller, error).await;
            }
            Ok(value) => match confirm(&self.word) {
                Transition::Success(epoch) => {
                    let settled = match attempt.leg {
                        Leg::Open => Phase::Opened,
                        Leg::Export => Phase::Exported,
                    };
                    self.trace_phase(settled, epoch);
                    self.trace_outcome(attempt.leg.name(), outcome::OK);
                    self.emit(attempt.leg.success(), None, Some(&controller));
                    attempt.completer.complete(Ok(value));
                }
                Transition::Failed(_) => self.abort_illegal(attempt).await,
            },
        }
    }

    /// 该次尝试是否仍是当前周期：槽位中的 Promise 与阶段都未被并发操作替换。
    fn still_current(&self, leg: Leg, epoch: Epoch) -> bool {
        let published = match leg {
            Leg::Open => self.futures.current_open(),
            Leg::Export => self.futures.current_export(),
        };
        let seen = self.word.snapshot();
        published.is_some_and(|promise| promise.epoch() == epoch)
            && seen.phase == leg.in_flight()
            && seen.epoch == epoch
    }

    /// 竞态失利：非优雅关闭本次创建的控制器并让出槽位，发布 `Fail*IllegalState` 并失败。
    ///
    /// 关闭方可能在工厂返回之前读取槽位而拿到 `None`，因此槽位由这里释放。
    async fn abort_illegal(&self, attempt: Attempt<C>) {
        let seen = self.word.snapshot();
        let error = self.illegal(attempt.leg.name(), seen);
        if let Some(controller) = &attempt.controller {
            let _ = self.close_controller(controller, false).await;
            self.controller.release(controller);
        }
        self.trace_outcome(attempt.leg.name(), outcome::ILLEGAL_STATE);
        self.emit(
            attempt.leg.illegal_state(),
            Some(error.clone()),
            attempt.controller.as_ref(),
        );
        attempt.completer.complete(Err(error));
    }

    /// 闸门或控制器失败后的回滚。
    ///
    /// 扩展状态机的打开失败回滚到 `Exported`；其余情况通过关闭路径回到 `Closed`
    /// （同样经过关闭后闸门），且在失败的 Promise 完成之前到达 `Closed`。
    async fn fail_in_flight(&self, attempt: Attempt<C>, controller: Arc<C>, error: LifecycleError) {
        let leg = attempt.leg;
        self.trace_outcome(leg.name(), outcome::FAILED);

        if W::TWO_PHASE && leg == Leg::Open {
            match self.word.rollback_open() {
                Transition::Success(rolled) => {
                    self.futures.retag_export(rolled);
                    self.trace_phase(Phase::Exported, rolled);
                    self.emit(leg.failure(), Some(error.clone()), Some(&controller));
                    attempt.completer.complete(Err(error));
                }
                Transition::Failed(_) => self.abort_illegal(attempt).await,
            }
            return;
        }

        match self.word.try_closing().epoch() {
            Some(close_epoch) => {
                let (close_completer, close_promise) = Promise::pair(close_epoch);
                self.futures.publish_close(close_promise);
                self.trace_phase(Phase::Closing, close_epoch);
                self.emit(LifecycleEventKind::StartClose, None, Some(&controller));
                let _ = self.close_controller(&controller, false).await;
                self.pass_after_close_gate().await;

                let previous = self.word.to_closed();
                self.trace_phase(Phase::Closed, previous.epoch);
                self.emit(leg.failure(), Some(error.clone()), Some(&controller));
                attempt.completer.complete(Err(error));

                self.emit(LifecycleEventKind::SuccessClose, None, Some(&controller));
                self.controller.release(&controller);
                close_completer.complete(Ok(()));
            }
            None => {
                // 并发的关闭已接管终止步骤，它会等待本次尝试的 Promise。
                let _ = self.close_controller(&controller, false).await;
                self.emit(leg.failure(), Some(error.clone()), Some(&controller));
                attempt.completer.complete(Err(error));
            }
        }
    }

    pub(crate) fn close<F>(self: &Arc<Self>, gracefully: bool, side_effect: F) -> Promise<()>
    where
        F: FnOnce(),
    {
        let (origin, epoch) = match self.word.try_closing() {
            Closing::FromOpening(epoch) => (Phase::Opening, epoch),
            Closing::FromOpened(epoch) => (Phase::Opened, epoch),
            Closing::FromExporting(epoch) => (Phase::Exporting, epoch),
            Closing::FromExported(epoch) => (Phase::Exported, epoch),
            Closing::Failed(seen) => {
                return self.join_published("close", seen, Phase::is_close, |futures| {
                    futures.current_close()
                });
            }
        };
        self.trace_phase(Phase::Closing, epoch);
        let (completer, promise) = Promise::pair(epoch);
        self.futures.publish_close(promise.clone());

        match origin {
            Phase::Opening | Phase::Exporting => {
                // 被打断的周期在关闭纪元之前一个纪元发布了 Promise。
                let in_flight = if origin == Phase::Opening {
                    self.wait_published(epoch.prev(), |futures| futures.current_open())
                } else {
                    self.wait_published(epoch.prev(), |futures| futures.current_export())
                };
                let controller = self.controller.load();
                if let Some(controller) = &controller {
                    controller.fire_close();
                }
                self.emit(LifecycleEventKind::StartClose, None, controller.as_ref());
                self.spawn(Arc::clone(self).close_after(in_flight, controller, completer));
            }
            _ => {
                let controller = self.controller.load();
                self.emit(LifecycleEventKind::StartClose, None, controller.as_ref());
                side_effect();
                let gate = if gracefully {
                    self.futures.new_before_close_gate()
                } else {
                    Gate::open(GateKind::BeforeClose)
                };
                let task = Arc::clone(self);
                self.spawn(task.close_gracefully(gracefully, controller, gate, completer));
            }
        }
        promise
    }

    async fn close_after(
        self: Arc<Self>,
        in_flight: Promise<C::Output>,
        controller: Option<Arc<C>>,
        completer: Completer<()>,
    ) {
        // 无论在途操作成败，只要它结束即可进入终止步骤。
        let _ = in_flight.await;
        self.pass_after_close_gate().await;
        self.finish_close(controller, Ok(()), completer);
    }

    async fn close_gracefully(
        self: Arc<Self>,
        gracefully: bool,
        controller: Option<Arc<C>>,
        gate: Gate,
        completer: Completer<()>,
    ) {
        if let Err(error) = gate.wait().await {
            tracing::warn!(
                lifecycle.label = %self.settings.label,
                error.code = error.code(),
                "before-close gate failed, closing anyway: {error}"
            );
        }
        self.futures.clear_pass();

        let result = match &controller {
            Some(controller) => self.close_controller(controller, gracefully).await,
            None => Ok(()),
        };

        self.pass_after_close_gate().await;
        self.finish_close(controller, result, completer);
    }

    /// 每条关闭路径在写入 `Closed` 之前都经过关闭后闸门；失败只记录。
    async fn pass_after_close_gate(&self) {
        let after = self.futures.new_after_close_gate();
        if let Err(error) = after.wait().await {
            tracing::warn!(
                lifecycle.label = %self.settings.label,
                error.code = error.code(),
                "after-close gate failed, ignored: {error}"
            );
        }
    }

    /// 终止步骤：写入 `Closed`，发布关闭事件，释放控制器，完成 Promise。
    fn finish_close(
        &self,
        controller: Option<Arc<C>>,
        result: LifecycleResult<()>,
        completer: Completer<()>,
    ) {
        let previous = self.word.to_closed();
        self.trace_phase(Phase::Closed, previous.epoch);
        match &result {
            Ok(()) => {
                self.trace_outcome("close", outcome::OK);
                self.emit(LifecycleEventKind::SuccessClose, None, controller.as_ref());
            }
            Err(error) => {
                self.trace_outcome("close", outcome::FAILED);
                self.emit(
                    LifecycleEventKind::FailClose,
                    Some(error.clone()),
                    controller.as_ref(),
                );
            }
        }
        if let Some(controller) = &controller {
            self.controller.release(controller);
        }
        completer.complete(result);
    }

    async fn close_controller(&self, controller: &Arc<C>, gracefully: bool) -> LifecycleResult<()> {
        controller.close(gracefully).await.map_err(|cause| {
            let error = LifecycleError::controller(ControllerOperation::Close, cause);
            tracing::warn!(
                lifecycle.label = %self.settings.label,
                error.code = error.code(),
                "controller close failed: {error}"
            );
            error
        })
    }

    pub(crate) fn pass(&self) -> bool {
        self.word.phase() == Phase::Closing && self.futures.pass()
    }

    pub(crate) fn when<P, F>(&self, predicate: P, f: F) -> bool
    where
        P: FnOnce(Phase) -> bool,
        F: FnOnce(&C),
    {
        match self.controller.load() {
            Some(controller) if predicate(self.word.phase()) => {
                f(&*controller);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn controller(&self) -> Option<ControllerHandle<C>> {
        let controller = self.controller.load()?;
        if self.word.phase().is_close() {
            return None;
        }
        Some(ControllerHandle::new(controller))
    }

    pub(crate) fn is_close(&self, handle: &ControllerHandle<C>) -> bool {
        self.word.phase().is_close() || !self.controller.holds(handle.arc())
    }

    fn spawn<T>(&self, task: T)
    where
        T: Future<Output = ()> + Send + 'static,
    {
        self.spawner.spawn_task(task.boxed());
    }

    fn emit(
        &self,
        kind: LifecycleEventKind,
        error: Option<LifecycleError>,
        controller: Option<&Arc<C>>,
    ) {
        let event = match error {
            Some(error) => LifecycleEvent::failed(kind, error),
            None => LifecycleEvent::new(kind),
        };
        let own = controller.and_then(|controller| controller.event_handler());
        self.events.publish(&event, own);
    }

    fn illegal(&self, operation: &str, seen: PhaseSnapshot) -> LifecycleError {
        self.illegal_state.make(format!(
            "{} cannot {operation} while {} (epoch {})",
            self.settings.label, seen.phase, seen.epoch
        ))
    }

    /// 竞争失败方等待赢家发布同纪元的 Promise；阶段离开 `family` 时返回失败的 Promise。
    fn join_published<T, L>(
        &self,
        operation: &str,
        mut seen: PhaseSnapshot,
        family: fn(Phase) -> bool,
        load: L,
    ) -> Promise<T>
    where
        T: Clone + Send + Sync + 'static,
        L: Fn(&LifecycleFutures<C::Output>) -> Option<Promise<T>>,
    {
        let mut round = 0;
        loop {
            if !family(seen.phase) {
                tracing::debug!(
                    lifecycle.label = %self.settings.label,
                    lifecycle.phase = seen.phase.as_str(),
                    lifecycle.epoch = seen.epoch.get(),
                    "{operation} rejected"
                );
                return Promise::settled(seen.epoch, Err(self.illegal(operation, seen)));
            }
            let current = load(&self.futures).filter(|promise| promise.epoch() == seen.epoch);
            if let Some(promise) = current {
                return promise;
            }
            self.backoff(&mut round);
            seen = self.word.snapshot();
        }
    }

    /// 等待指定纪元的 Promise 出现；调用方已持有关闭权，赢家必然会发布。
    fn wait_published<L>(&self, epoch: Epoch, load: L) -> Promise<C::Output>
    where
        L: Fn(&LifecycleFutures<C::Output>) -> Option<Promise<C::Output>>,
    {
        let mut round = 0;
        loop {
            let current = load(&self.futures).filter(|promise| promise.epoch() == epoch);
            if let Some(promise) = current {
                return promise;
            }
            self.backoff(&mut round);
        }
    }

    fn backoff(&self, round: &mut u32) {
        if *round < self.settings.spin_limit {
            hint::spin_loop();
        } else if self.settings.park_micros == 0 {
            thread::yield_now();
        } else {
            thread::sleep(self.settings.park_interval());
        }
        *round = round.saturating_add(1);
    }

    fn trace_phase(&self, phase: Phase, epoch: Epoch) {
        tracing::debug!(
            lifecycle.label = %self.settings.label,
            lifecycle.phase = phase.as_str(),
            lifecycle.epoch = epoch.get(),
            "lifecycle transition"
        );
    }

    fn trace_outcome(&self, operation: &str, result: &'static str) {
        tracing::debug!(
            lifecycle.label = %self.settings.label,
            lifecycle.outcome = result,
            "{operation} finished"
        );
    }
}
