use core::{fmt, marker::PhantomData};
use std::sync::Arc;

use crate::{
    config::LifecycleSettings,
    controller::{Controller, ControllerFactory, ExportController},
    cycle::{GateSuppliers, LifecycleFutures},
    error::{ConfigError, IllegalStateFactory},
    event::{EventBus, LifecycleEventHandler},
    executor::TaskSpawner,
    gate::GateSupplier,
    state::{ExStateWord, StateWord},
};

use super::{Core, ExLifecycleMachine, LifecycleMachine, Parts};

/// 基础状态机的构造器。
pub type LifecycleBuilder<C> = MachineBuilder<StateWord, C>;

/// 两阶段启动状态机的构造器。
pub type ExLifecycleBuilder<C> = MachineBuilder<ExStateWord, C>;

/// 状态机构造器。
///
/// 类型参数 `W` 只标记目标状态机的共享字变体；`before_export` 仅在扩展变体上可用。
pub struct MachineBuilder<W, C> {
    spawner: Arc<dyn TaskSpawner>,
    factory: ControllerFactory<C>,
    illegal_state: IllegalStateFactory,
    gates: GateSuppliers,
    handlers: Vec<Arc<dyn LifecycleEventHandler>>,
    settings: LifecycleSettings,
    _word: PhantomData<fn() -> W>,
}

impl<W, C> MachineBuilder<W, C> {
    pub(crate) fn new(spawner: Arc<dyn TaskSpawner>, factory: ControllerFactory<C>) -> Self {
        Self {
            spawner,
            factory,
            illegal_state: IllegalStateFactory::default(),
            gates: GateSuppliers::default(),
            handlers: Vec::new(),
            settings: LifecycleSettings::default(),
            _word: PhantomData,
        }
    }

    /// 自定义非法状态错误的构造方式。
    pub fn illegal_state(mut self, factory: IllegalStateFactory) -> Self {
        self.illegal_state = factory;
        self
    }

    pub fn before_open(mut self, supplier: GateSupplier) -> Self {
        self.gates.before_open = Some(supplier);
        self
    }

    /// 优雅关闭时等待的闸门，可被 `pass()` 提前放行。
    pub fn before_close(mut self, supplier: GateSupplier) -> Self {
        self.gates.before_close = Some(supplier);
        self
    }

    /// 控制器关闭后等待的闸门；其失败只记录日志，不影响关闭结果。
    pub fn after_close(mut self, supplier: GateSupplier) -> Self {
        self.gates.after_close = Some(supplier);
        self
    }

    /// 追加事件处理器，按注册顺序通知。
    pub fn handler<H>(mut self, handler: H) -> Self
    where
        H: LifecycleEventHandler + 'static,
    {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn settings(mut self, settings: LifecycleSettings) -> Self {
        self.settings = settings;
        self
    }

    fn parts(self) -> Result<(GateSuppliers, Parts<C>), ConfigError> {
        self.settings.validate()?;
        let mut events = EventBus::new(self.settings.label.as_str());
        for handler in self.handlers {
            events.subscribe(handler);
        }
        Ok((
            self.gates,
            Parts {
                spawner: self.spawner,
                factory: self.factory,
                illegal_state: self.illegal_state,
                events,
                settings: self.settings,
            },
        ))
    }
}

impl<C: Controller> MachineBuilder<StateWord, C> {
    /// 校验配置并构造状态机。
    pub fn build(self) -> Result<LifecycleMachine<C>, ConfigError> {
        let (gates, parts) = self.parts()?;
        Ok(LifecycleMachine::from_core(Core::new(
            LifecycleFutures::new(gates),
            parts,
        )))
    }
}

impl<C: ExportController> MachineBuilder<ExStateWord, C> {
    pub fn before_export(mut self, supplier: GateSupplier) -> Self {
        self.gates.before_export = Some(supplier);
        self
    }

    /// 校验配置并构造状态机。
    pub fn build(self) -> Result<ExLifecycleMachine<C>, ConfigError> {
        let (gates, parts) = self.parts()?;
        Ok(ExLifecycleMachine::from_core(Core::new(
            LifecycleFutures::new(gates),
            parts,
        )))
    }
}

impl<W, C> fmt::Debug for MachineBuilder<W, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineBuilder")
            .field("gates", &self.gates)
            .field("handlers", &self.handlers.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
