//! 生命周期事件与同步分发。
//!
//! ## 设计背景（Why）
//! - 外围端点需要在阶段变化时执行附加逻辑（注册中心上报、指标、告警），事件是唯一的观察口；
//! - 事件在对应 Promise 完成之前发布，因此处理器总能先于依赖方看到阶段变化。
//!
//! ## 契约说明（What）
//! - [`EventBus`] 按注册顺序同步通知配置的处理器，随后通知当前周期的控制器（若其暴露处理器）；
//! - 每个事件同时写入一条 `tracing` 调试日志，字段名见 [`crate::observability::keys`]；
//! - 处理器在发布线程上执行，应保持轻量，不得阻塞。

use core::fmt;
use std::sync::Arc;

use crate::error::LifecycleError;

/// 事件种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleEventKind {
    StartOpen,
    SuccessOpen,
    FailOpen,
    /// 打开流程因竞态失利而中止。
    FailOpenIllegalState,
    StartClose,
    SuccessClose,
    FailClose,
    StartExport,
    SuccessExport,
    FailExport,
    /// 导出流程因竞态失利而中止。
    FailExportIllegalState,
}

impl LifecycleEventKind {
    /// 稳定的日志名称。
    pub const fn as_str(self) -> &'static str {
        match self {
            LifecycleEventKind::StartOpen => "start-open",
            LifecycleEventKind::SuccessOpen => "success-open",
            LifecycleEventKind::FailOpen => "fail-open",
            LifecycleEventKind::FailOpenIllegalState => "fail-open-illegal-state",
            LifecycleEventKind::StartClose => "start-close",
            LifecycleEventKind::SuccessClose => "success-close",
            LifecycleEventKind::FailClose => "fail-close",
            LifecycleEventKind::StartExport => "start-export",
            LifecycleEventKind::SuccessExport => "success-export",
            LifecycleEventKind::FailExport => "fail-export",
            LifecycleEventKind::FailExportIllegalState => "fail-export-illegal-state",
        }
    }

    /// 是否为失败类事件。
    pub const fn is_failure(self) -> bool {
        matches!(
            self,
            LifecycleEventKind::FailOpen
                | LifecycleEventKind::FailOpenIllegalState
                | LifecycleEventKind::FailClose
                | LifecycleEventKind::FailExport
                | LifecycleEventKind::FailExportIllegalState
        )
    }
}

impl fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 不可变的事件记录：种类 + 可选错误。
#[derive(Clone, Debug)]
pub struct LifecycleEvent {
    kind: LifecycleEventKind,
    error: Option<LifecycleError>,
}

impl LifecycleEvent {
    pub fn new(kind: LifecycleEventKind) -> Self {
        Self { kind, error: None }
    }

    pub fn failed(kind: LifecycleEventKind, error: LifecycleError) -> Self {
        Self {
            kind,
            error: Some(error),
        }
    }

    pub fn kind(&self) -> LifecycleEventKind {
        self.kind
    }

    pub fn error(&self) -> Option<&LifecycleError> {
        self.error.as_ref()
    }
}

/// 生命周期事件处理器。
pub trait LifecycleEventHandler: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent);
}

impl<F> LifecycleEventHandler for F
where
    F: Fn(&LifecycleEvent) + Send + Sync,
{
    fn on_event(&self, event: &LifecycleEvent) {
        self(event)
    }
}

/// 有序的同步订阅者列表。
#[derive(Clone, Default)]
pub struct EventBus {
    label: Arc<str>,
    handlers: Vec<Arc<dyn LifecycleEventHandler>>,
}

impl EventBus {
    pub fn new(label: impl Into<Arc<str>>) -> Self {
        Self {
            label: label.into(),
            handlers: Vec::new(),
        }
    }

    /// 追加处理器，通知顺序即注册顺序。
    pub fn subscribe(&mut self, handler: Arc<dyn LifecycleEventHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// 发布事件：先配置的处理器，再控制器自身的处理器。
    pub fn publish(&self, event: &LifecycleEvent, controller: Option<&dyn LifecycleEventHandler>) {
        match event.error() {
            Some(error) => tracing::debug!(
                lifecycle.label = %self.label,
                lifecycle.event = event.kind().as_str(),
                error.code = error.code(),
                "publishing lifecycle event"
            ),
            None => tracing::debug!(
                lifecycle.label = %self.label,
                lifecycle.event = event.kind().as_str(),
                "publishing lifecycle event"
            ),
        }
        for handler in &self.handlers {
            handler.on_event(event);
        }
        if let Some(handler) = controller {
            handler.on_event(event);
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("label", &self.label)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// 把每个事件写成一条结构化日志：成功类 INFO，携带错误时 WARN。
#[derive(Clone, Debug)]
pub struct TracingEventHandler {
    label: Arc<str>,
}

impl TracingEventHandler {
    pub fn new(label: impl Into<Arc<str>>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl LifecycleEventHandler for TracingEventHandler {
    fn on_event(&self, event: &LifecycleEvent) {
        match event.error() {
            Some(error) => tracing::warn!(
                lifecycle.label = %self.label,
                lifecycle.event = event.kind().as_str(),
                error.code = error.code(),
                "lifecycle event failed: {error}"
            ),
            None => tracing::info!(
                lifecycle.label = %self.label,
                lifecycle.event = event.kind().as_str(),
                "lifecycle event"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::IllegalStateFactory, observability::keys};
    use std::sync::Mutex;
    use tracing_test::traced_test;

    struct Recorder {
        tag: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl LifecycleEventHandler for Recorder {
        fn on_event(&self, event: &LifecycleEvent) {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(format!("{}:{}", self.tag, event.kind()));
            }
        }
    }

    #[test]
    fn handlers_run_in_registration_order_then_controller() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new("orders");
        bus.subscribe(Arc::new(Recorder {
            tag: "first",
            seen: Arc::clone(&seen),
        }));
        bus.subscribe(Arc::new(Recorder {
            tag: "second",
            seen: Arc::clone(&seen),
        }));
        let controller = Recorder {
            tag: "controller",
            seen: Arc::clone(&seen),
        };

        bus.publish(
            &LifecycleEvent::new(LifecycleEventKind::StartOpen),
            Some(&controller),
        );

        let seen = seen.lock().expect("锁不应中毒").clone();
        assert_eq!(
            seen,
            ["first:start-open", "second:start-open", "controller:start-open"]
        );
    }

    #[test]
    fn closures_are_handlers() {
        let hits = Arc::new(Mutex::new(0_u32));
        let counter = Arc::clone(&hits);
        let mut bus = EventBus::new("orders");
        bus.subscribe(Arc::new(move |event: &LifecycleEvent| {
            if event.kind().is_failure() {
                *counter.lock().expect("锁不应中毒") += 1;
            }
        }));
        bus.publish(&LifecycleEvent::new(LifecycleEventKind::SuccessOpen), None);
        let error = IllegalStateFactory::default().make("raced".into());
        bus.publish(
            &LifecycleEvent::failed(LifecycleEventKind::FailOpenIllegalState, error),
            None,
        );
        assert_eq!(*hits.lock().expect("锁不应中毒"), 1);
    }

    #[traced_test]
    #[test]
    fn tracing_handler_logs_with_stable_keys() {
        let handler = TracingEventHandler::new("orders");
        handler.on_event(&LifecycleEvent::new(LifecycleEventKind::SuccessClose));
        handler.on_event(&LifecycleEvent::failed(
            LifecycleEventKind::FailClose,
            LifecycleError::Abandoned,
        ));

        assert!(logs_contain(keys::EVENT));
        assert!(logs_contain("success-close"));
        assert!(logs_contain(keys::ERROR_CODE));
        assert!(logs_contain("lifecycle.abandoned"));
    }
}
