//! 单个生命周期周期的 Promise 与闸门簿记。
//!
//! ## 设计背景（Why）
//! - 同一周期内的并发调用方需要找到“当前” Promise：`open`/`export`/`close` 各占一个槽位，
//!   每次赢得 CAS 的线程发布新 Promise 覆盖旧值，旧周期的 Promise 永不复用；
//! - 闸门（before-open、before-close、after-close、before-export）由外围端点的供给函数
//!   在每个周期重新生成，本模块只负责调用供给函数并为关闭前闸门挂上放行开关。
//!
//! ## 契约说明（What）
//! - 槽位以 `ArcSwapOption` 保存，读取无锁；Promise 自带纪元，读取方自行比对；
//! - 新建时 `close` 槽位即持有纪元 0 的已成功 Promise，从未打开过的状态机上 `close()` 立即完成。

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::{
    error::GateKind,
    gate::{Gate, GateSupplier, PassSwitch},
    promise::Promise,
    state::Epoch,
};

/// 外围端点提供的闸门供给函数集合；缺省项表示“无闸门”。
#[derive(Clone, Debug, Default)]
pub struct GateSuppliers {
    pub before_open: Option<GateSupplier>,
    pub before_close: Option<GateSupplier>,
    pub after_close: Option<GateSupplier>,
    pub before_export: Option<GateSupplier>,
}

/// 生命周期 Promise 槽位与闸门工厂。
pub(crate) struct LifecycleFutures<T> {
    open: ArcSwapOption<Promise<T>>,
    export: ArcSwapOption<Promise<T>>,
    close: ArcSwapOption<Promise<()>>,
    before_close_pass: ArcSwapOption<PassSwitch>,
    gates: GateSuppliers,
}

impl<T> LifecycleFutures<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(gates: GateSuppliers) -> Self {
        Self {
            open: ArcSwapOption::const_empty(),
            export: ArcSwapOption::const_empty(),
            close: ArcSwapOption::from_pointee(Promise::settled(Epoch::ZERO, Ok(()))),
            before_close_pass: ArcSwapOption::const_empty(),
            gates,
        }
    }

    pub(crate) fn current_open(&self) -> Option<Promise<T>> {
        self.open.load_full().map(|promise| Promise::clone(&promise))
    }

    pub(crate) fn current_export(&self) -> Option<Promise<T>> {
        self.export.load_full().map(|promise| Promise::clone(&promise))
    }

    pub(crate) fn current_close(&self) -> Option<Promise<()>> {
        self.close.load_full().map(|promise| Promise::clone(&promise))
    }

    pub(crate) fn publish_open(&self, promise: Promise<T>) {
        self.open.store(Some(Arc::new(promise)));
    }

    pub(crate) fn publish_export(&self, promise: Promise<T>) {
        self.export.store(Some(Arc::new(promise)));
    }

    pub(crate) fn publish_close(&self, promise: Promise<()>) {
        self.close.store(Some(Arc::new(promise)));
    }

    /// 回滚到 `Exported` 后，以回滚纪元重新发布导出 Promise。
    pub(crate) fn retag_export(&self, epoch: Epoch) -> bool {
        match self.current_export() {
            Some(promise) => {
                self.publish_export(promise.retag(epoch));
                true
            }
            None => false,
        }
    }

    pub(crate) fn new_before_open_gate(&self) -> Gate {
        Gate::supply(GateKind::BeforeOpen, self.gates.before_open.as_ref())
    }

    pub(crate) fn new_before_export_gate(&self) -> Gate {
        Gate::supply(GateKind::BeforeExport, self.gates.before_export.as_ref())
    }

    /// 生成关闭前闸门并登记放行开关，供 `pass()` 使用。
    pub(crate) fn new_before_close_gate(&self) -> Gate {
        let gate = Gate::supply(GateKind::BeforeClose, self.gates.before_close.as_ref());
        if gate.is_open() {
            return gate;
        }
        let switch = Arc::new(PassSwitch::new());
        self.before_close_pass.store(Some(Arc::clone(&switch)));
        gate.with_pass(switch)
    }

    pub(crate) fn new_after_close_gate(&self) -> Gate {
        Gate::supply(GateKind::AfterClose, self.gates.after_close.as_ref())
    }

    /// 放行当前的关闭前闸门；没有待放行的闸门时返回 `false`。
    pub(crate) fn pass(&self) -> bool {
        self.before_close_pass
            .load_full()
            .is_some_and(|switch| switch.fire())
    }

    pub(crate) fn clear_pass(&self) {
        self.before_close_pass.store(None);
    }
}
