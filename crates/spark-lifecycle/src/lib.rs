#![deny(unsafe_code)]

//! # spark-lifecycle
//!
//! ## 定位与职责（Why）
//! - RPC 端点（consumer/provider）生命周期的控制内核：把端点带过
//!   `closed → (exporting →) opening → opened → closing → closed`，每个周期恰好一次；
//! - 任意多个线程可以并发调用 `open`/`close`/`export`，只有赢得 CAS 的一方执行真实工作，
//!   其余调用方共享同一个 Promise；
//! - 打开与关闭相互竞争时，由内核负责排序与回滚，外围端点无需自行加锁。
//!
//! ## 架构嵌入（Where）
//! - `state`：阶段枚举、查询/迁移契约，以及单字编码阶段与纪元的 [`StateWord`]/[`ExStateWord`]；
//! - `promise`、`gate`、`cycle`：多方共享的 Promise、闸门与单个周期的簿记；
//! - `controller`：外围端点实现的 [`Controller`]/[`ExportController`] 契约；
//! - `event`：[`LifecycleEvent`] 与同步分发；
//! - `machine`：编排器 [`LifecycleMachine`]、[`ExLifecycleMachine`] 及其构造器；
//! - `executor`、`config`、`observability`、`error`：任务派发、运行参数、日志键名与错误域。
//!
//! ## Feature 策略（Trade-offs）
//! - `thread-pool`（默认）：为 `futures::executor::ThreadPool` 实现 [`TaskSpawner`]；
//! - `runtime-tokio`：提供 `TokioSpawner`；
//! - `config-toml`：允许从 TOML 片段读取 [`LifecycleSettings`]。
//!
//! ## 快速上手（How）
//! ```no_run
//! use futures::{executor::{block_on, ThreadPool}, future::{self, FutureExt}};
//! use spark_lifecycle::{Controller, ControllerFactory, ControllerFuture, LifecycleMachine, State};
//!
//! struct Endpoint;
//!
//! impl Controller for Endpoint {
//!     type Output = ();
//!
//!     fn open(&self) -> ControllerFuture<()> {
//!         future::ok(()).boxed()
//!     }
//!
//!     fn close(&self, _gracefully: bool) -> ControllerFuture<()> {
//!         future::ok(()).boxed()
//!     }
//! }
//!
//! let pool = ThreadPool::new().expect("thread pool");
//! let machine = LifecycleMachine::builder(pool, ControllerFactory::new(|| Endpoint))
//!     .build()
//!     .expect("default settings are valid");
//! block_on(machine.open()).expect("open");
//! assert!(machine.is_opened());
//! block_on(machine.close(true)).expect("close");
//! ```

pub mod config;
pub mod controller;
mod cycle;
pub mod error;
pub mod event;
pub mod executor;
pub mod gate;
pub mod machine;
pub mod observability;
pub mod promise;
pub mod state;

pub use config::LifecycleSettings;
pub use controller::{
    Controller, ControllerFactory, ControllerFuture, ControllerHandle, ExportController,
};
pub use error::{
    BoxError, ConfigError, ControllerOperation, GateKind, IllegalStateFactory, LifecycleError,
    LifecycleResult,
};
pub use event::{
    EventBus, LifecycleEvent, LifecycleEventHandler, LifecycleEventKind, TracingEventHandler,
};
#[cfg(feature = "runtime-tokio")]
pub use executor::TokioSpawner;
pub use executor::TaskSpawner;
pub use gate::{GateFuture, GateSupplier, PassSwitch};
pub use machine::{
    ExLifecycleBuilder, ExLifecycleMachine, LifecycleBuilder, LifecycleMachine, MachineBuilder,
};
pub use promise::Promise;
pub use state::{
    Closing, Epoch, ExState, ExStateTransition, ExStateWord, Phase, PhaseSnapshot, State,
    StateTransition, StateWord, Transition,
};
