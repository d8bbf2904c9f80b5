//! 可观测性键名：生命周期日志统一使用的结构化字段。
//!
//! `tracing` 宏的字段名在编译期展开，因此宏调用处直接书写同名的点分标识符；
//! 此处的常量供日志采集规则与测试引用，两处保持一致。

/// 日志字段键名。
pub mod keys {
    #[doc = "类型：日志字段。"]
    #[doc = ""]
    #[doc = "端点标签，来自 `LifecycleSettings::label`。"]
    pub const LABEL: &str = "lifecycle.label";

    #[doc = "类型：日志字段。"]
    #[doc = ""]
    #[doc = "迁移发生时的周期纪元。"]
    pub const EPOCH: &str = "lifecycle.epoch";

    #[doc = "类型：日志字段。"]
    #[doc = ""]
    #[doc = "迁移后（或观测到）的阶段名称。"]
    pub const PHASE: &str = "lifecycle.phase";

    #[doc = "类型：日志字段。"]
    #[doc = ""]
    #[doc = "发布的事件种类。"]
    pub const EVENT: &str = "lifecycle.event";

    #[doc = "类型：日志字段。"]
    #[doc = ""]
    #[doc = "序列结束时的结果：`ok`、`failed` 或 `illegal-state`。"]
    pub const OUTCOME: &str = "lifecycle.outcome";

    #[doc = "类型：日志字段。"]
    #[doc = ""]
    #[doc = "稳定错误码，见 `LifecycleError::code`。"]
    pub const ERROR_CODE: &str = "error.code";

    /// 全部键名，便于采集规则一次性登记。
    pub const ALL: [&str; 6] = [LABEL, EPOCH, PHASE, EVENT, OUTCOME, ERROR_CODE];
}

/// 序列结束时写入 [`keys::OUTCOME`] 的取值。
pub(crate) mod outcome {
    pub const OK: &str = "ok";
    pub const FAILED: &str = "failed";
    pub const ILLEGAL_STATE: &str = "illegal-state";
}
