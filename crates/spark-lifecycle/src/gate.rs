//! 生命周期闸门（Gate）。
//!
//! 闸门是某一步骤继续之前必须落定的 Future，由外围端点以供给函数（[`GateSupplier`]）提供；
//! 供给函数返回 `None` 表示“无闸门，立即继续”。关闭前闸门可被 [`PassSwitch`] 提前放行，
//! 用于截断已经不值得等待的排空期。

use core::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use futures::{
    FutureExt,
    future::{self, BoxFuture, Either},
    task::AtomicWaker,
};

use crate::error::{BoxError, GateKind, LifecycleError, LifecycleResult};

/// 闸门 Future：成功表示放行，失败携带原因。
pub type GateFuture = BoxFuture<'static, Result<(), BoxError>>;

/// 闸门供给函数，每个周期调用一次以生成新的闸门。
#[derive(Clone)]
pub struct GateSupplier {
    supply: Arc<dyn Fn() -> Option<GateFuture> + Send + Sync>,
}

impl GateSupplier {
    pub fn new<F>(supply: F) -> Self
    where
        F: Fn() -> Option<GateFuture> + Send + Sync + 'static,
    {
        Self {
            supply: Arc::new(supply),
        }
    }

    /// 由返回 Future 的闭包构造，省去 `Some(Box::pin(..))` 样板。
    pub fn from_fn<F, Fut>(supply: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self::new(move || Some(supply().boxed()))
    }

    fn supply(&self) -> Option<GateFuture> {
        (self.supply)()
    }
}

impl fmt::Debug for GateSupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateSupplier").finish_non_exhaustive()
    }
}

/// 一次性放行开关。
///
/// `fire` 之后，绑定该开关的闸门立即视为放行，不再等待原 Future。
#[derive(Default)]
pub struct PassSwitch {
    fired: AtomicBool,
    waker: AtomicWaker,
}

impl PassSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// 触发放行；返回本次调用是否首次触发。
    pub fn fire(&self) -> bool {
        let first = self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.waker.wake();
        }
        first
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    fn signal(self: &Arc<Self>) -> PassSignal {
        PassSignal {
            switch: Arc::clone(self),
        }
    }
}

impl fmt::Debug for PassSwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassSwitch")
            .field("fired", &self.is_fired())
            .finish()
    }
}

struct PassSignal {
    switch: Arc<PassSwitch>,
}

impl Future for PassSignal {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.switch.is_fired() {
            return Poll::Ready(());
        }
        self.switch.waker.register(cx.waker());
        // 注册与 `fire` 之间可能交错，注册后需复查。
        if self.switch.is_fired() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// 某一周期内生成的闸门实例。
pub struct Gate {
    kind: GateKind,
    future: Option<GateFuture>,
    pass: Option<Arc<PassSwitch>>,
}

impl Gate {
    /// 通过供给函数生成闸门；未配置供给函数或供给函数返回 `None` 时得到已放行的闸门。
    pub fn supply(kind: GateKind, supplier: Option<&GateSupplier>) -> Self {
        Self {
            kind,
            future: supplier.and_then(GateSupplier::supply),
            pass: None,
        }
    }

    /// 已放行的闸门。
    pub fn open(kind: GateKind) -> Self {
        Self {
            kind,
            future: None,
            pass: None,
        }
    }

    /// 绑定放行开关。
    pub fn with_pass(mut self, pass: Arc<PassSwitch>) -> Self {
        self.pass = Some(pass);
        self
    }

    pub fn kind(&self) -> GateKind {
        self.kind
    }

    /// 是否无需等待。
    pub fn is_open(&self) -> bool {
        self.future.is_none()
    }

    /// 等待闸门落定。
    pub async fn wait(self) -> LifecycleResult<()> {
        let Some(future) = self.future else {
            return Ok(());
        };
        let outcome = match self.pass {
            Some(pass) => match future::select(future, pass.signal()).await {
                Either::Left((outcome, _)) => outcome,
                Either::Right(((), _)) => Ok(()),
            },
            None => future.await,
        };
        outcome.map_err(|cause| LifecycleError::gate(self.kind, cause))
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("kind", &self.kind)
            .field("open", &self.is_open())
            .field("passable", &self.pass.is_some())
            .finish()
    }
}
