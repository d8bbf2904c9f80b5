//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 汇总生命周期内核对外暴露的全部失败语义：竞态导致的非法状态、控制器异步操作失败、
//!   闸门（Gate）失败以及任务被执行器丢弃；
//! - 每个失败都以失败的 Promise 交给原始调用方，并以 `Fail*` 事件交给处理器，不做静默吞没。
//!
//! ## 设计要求（What）
//! - [`LifecycleError`] 必须可 `Clone`：同一个 Promise 的结果会分发给所有并发调用方，
//!   因此底层原因统一以 `Arc` 持有；
//! - 每个变体对应一个稳定错误码（[`LifecycleError::code`]），供日志与告警聚合使用。

use std::{error::Error as StdError, fmt, sync::Arc};

use thiserror::Error;

/// 控制器与闸门返回的装箱错误。
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// 可在多个调用方之间共享的错误原因。
pub type ErrorCause = Arc<dyn StdError + Send + Sync + 'static>;

/// 生命周期操作的结果别名。
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// 稳定错误码。
pub mod codes {
    /// 并发竞态使在途操作的前提失效。
    pub const ILLEGAL_STATE: &str = "lifecycle.illegal_state";
    /// 控制器的异步操作失败。
    pub const CONTROLLER: &str = "lifecycle.controller";
    /// 闸门 Future 失败。
    pub const GATE: &str = "lifecycle.gate";
    /// 承载结果的任务在完成前被丢弃。
    pub const ABANDONED: &str = "lifecycle.abandoned";
}

/// 控制器操作名，用于错误上下文。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControllerOperation {
    Open,
    Export,
    Close,
}

impl fmt::Display for ControllerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ControllerOperation::Open => "open",
            ControllerOperation::Export => "export",
            ControllerOperation::Close => "close",
        })
    }
}

/// 闸门种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GateKind {
    BeforeOpen,
    BeforeClose,
    AfterClose,
    BeforeExport,
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GateKind::BeforeOpen => "before-open",
            GateKind::BeforeClose => "before-close",
            GateKind::AfterClose => "after-close",
            GateKind::BeforeExport => "before-export",
        })
    }
}

/// 生命周期内核错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：区分“竞态失利”（[`LifecycleError::IllegalState`]）与“真实失败”
///   （[`LifecycleError::Controller`]、[`LifecycleError::Gate`]），调用方可以据此决定是否重试；
/// - **契约 (What)**：内核从不自动重试；失败解决后阶段必然回到稳定终态（`Closed`，或扩展
///   状态机回滚后的 `Exported`），调用方可再次发起 `open`/`close`；
/// - **设计权衡 (Trade-offs)**：原因以 `Arc<dyn Error>` 保存，换取结果可克隆分发。
#[derive(Clone, Debug, Error)]
pub enum LifecycleError {
    /// 调用方假设的前提（例如“我仍是当前的打开尝试”）已被并发的关闭/打开推翻。
    #[error("illegal lifecycle state: {cause}")]
    IllegalState { cause: ErrorCause },

    /// 控制器的异步操作失败。
    #[error("controller {operation} failed: {cause}")]
    Controller {
        operation: ControllerOperation,
        cause: ErrorCause,
    },

    /// 闸门 Future 失败。
    #[error("{gate} gate failed: {cause}")]
    Gate { gate: GateKind, cause: ErrorCause },

    /// 承载结果的任务在写入结果前被丢弃（通常是执行器已关闭）。
    #[error("lifecycle task was dropped before completing its promise")]
    Abandoned,
}

impl LifecycleError {
    /// 以控制器错误构造。
    pub fn controller(operation: ControllerOperation, cause: BoxError) -> Self {
        Self::Controller {
            operation,
            cause: Arc::from(cause),
        }
    }

    /// 以闸门错误构造。
    pub fn gate(gate: GateKind, cause: BoxError) -> Self {
        Self::Gate {
            gate,
            cause: Arc::from(cause),
        }
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            LifecycleError::IllegalState { .. } => codes::ILLEGAL_STATE,
            LifecycleError::Controller { .. } => codes::CONTROLLER,
            LifecycleError::Gate { .. } => codes::GATE,
            LifecycleError::Abandoned => codes::ABANDONED,
        }
    }

    /// 是否为竞态失利导致的非法状态。
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, LifecycleError::IllegalState { .. })
    }

    /// 底层原因（若有）。
    pub fn cause(&self) -> Option<&ErrorCause> {
        match self {
            LifecycleError::IllegalState { cause }
            | LifecycleError::Controller { cause, .. }
            | LifecycleError::Gate { cause, .. } => Some(cause),
            LifecycleError::Abandoned => None,
        }
    }
}

/// 默认的非法状态原因：仅携带一条消息。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct IllegalStateMessage {
    message: String,
}

impl IllegalStateMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// 非法状态错误构造器（`String -> Error`）。
///
/// 外围端点可以借此把竞态失利翻译成自己的领域错误（例如“consumer 已关闭”）。
#[derive(Clone)]
pub struct IllegalStateFactory {
    make: Arc<dyn Fn(String) -> BoxError + Send + Sync>,
}

impl IllegalStateFactory {
    /// 使用自定义构造函数。
    pub fn new<F>(make: F) -> Self
    where
        F: Fn(String) -> BoxError + Send + Sync + 'static,
    {
        Self {
            make: Arc::new(make),
        }
    }

    /// 由消息生成 [`LifecycleError::IllegalState`]。
    pub fn make(&self, message: String) -> LifecycleError {
        LifecycleError::IllegalState {
            cause: Arc::from((self.make)(message)),
        }
    }
}

impl Default for IllegalStateFactory {
    fn default() -> Self {
        Self::new(|message| Box::new(IllegalStateMessage::new(message)))
    }
}

impl fmt::Debug for IllegalStateFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IllegalStateFactory").finish_non_exhaustive()
    }
}

/// 配置加载与校验错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置值违反约束。
    #[error("invalid lifecycle settings: {0}")]
    Invalid(String),

    /// TOML 解析失败。
    #[cfg(feature = "config-toml")]
    #[error("failed to parse lifecycle settings: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("endpoint `{0}` is closed")]
    struct EndpointClosed(String);

    #[test]
    fn codes_are_stable_per_variant() {
        let illegal = IllegalStateFactory::default().make("raced".into());
        assert_eq!(illegal.code(), codes::ILLEGAL_STATE);
        assert!(illegal.is_illegal_state());

        let controller = LifecycleError::controller(ControllerOperation::Open, "refused".into());
        assert_eq!(controller.code(), codes::CONTROLLER);
        assert_eq!(controller.to_string(), "controller open failed: refused");

        let gate = LifecycleError::gate(GateKind::BeforeClose, "drain aborted".into());
        assert_eq!(gate.code(), codes::GATE);
        assert_eq!(gate.to_string(), "before-close gate failed: drain aborted");

        assert_eq!(LifecycleError::Abandoned.code(), codes::ABANDONED);
        assert!(LifecycleError::Abandoned.cause().is_none());
    }

    #[test]
    fn custom_factory_produces_domain_cause() {
        let factory =
            IllegalStateFactory::new(|message| Box::new(EndpointClosed(message)) as BoxError);
        let error = factory.make("order-service".into());
        assert_eq!(
            error.to_string(),
            "illegal lifecycle state: endpoint `order-service` is closed"
        );
        let cause = error.cause().expect("非法状态必须携带原因");
        assert!(cause.downcast_ref::<EndpointClosed>().is_some());
    }

    #[test]
    fn errors_clone_share_the_same_cause() {
        let error = LifecycleError::controller(ControllerOperation::Close, "io".into());
        let copy = error.clone();
        match (error.cause(), copy.cause()) {
            (Some(left), Some(right)) => assert!(Arc::ptr_eq(left, right)),
            _ => panic!("克隆后原因必须保留"),
        }
    }
}
