//! 集成测试共用的脚本化控制器、事件记录器与手动闸门。
#![allow(dead_code)]

use std::{
    future::Future,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use futures::{
    FutureExt,
    channel::oneshot,
    executor::ThreadPool,
    future::{self, Shared},
};
use spark_lifecycle::{
    BoxError, Controller, ControllerFactory, ControllerFuture, ExportController, GateSupplier,
    LifecycleEvent, LifecycleEventHandler, LifecycleEventKind,
};

/// 测试用线程池。
pub fn pool() -> ThreadPool {
    ThreadPool::builder()
        .pool_size(4)
        .name_prefix("lifecycle-test-")
        .create()
        .expect("线程池创建失败")
}

/// 手动释放的栅栏：释放前所有等待方挂起。
pub struct Latch {
    sender: Mutex<Option<oneshot::Sender<()>>>,
    receiver: Shared<oneshot::Receiver<()>>,
}

impl Latch {
    pub fn new() -> Arc<Self> {
        let (sender, receiver) = oneshot::channel();
        Arc::new(Self {
            sender: Mutex::new(Some(sender)),
            receiver: receiver.shared(),
        })
    }

    pub fn release(&self) {
        if let Some(sender) = self.sender.lock().expect("锁不应中毒").take() {
            let _ = sender.send(());
        }
    }

    pub fn wait(&self) -> impl Future<Output = ()> + Send + use<> {
        self.receiver.clone().map(|_| ())
    }

    /// 以该栅栏作为闸门：释放后闸门成功。
    pub fn gate(self: &Arc<Self>) -> GateSupplier {
        let latch = Arc::clone(self);
        GateSupplier::from_fn(move || {
            let wait = latch.wait();
            async move {
                wait.await;
                Ok(())
            }
        })
    }
}

/// 立即失败的闸门。
pub fn failing_gate(message: &'static str) -> GateSupplier {
    GateSupplier::from_fn(move || future::err::<(), BoxError>(message.into()))
}

/// 控制器行为脚本与调用计数。
#[derive(Default)]
pub struct Script {
    pub created: AtomicUsize,
    pub opens: AtomicUsize,
    pub exports: AtomicUsize,
    pub fire_closes: AtomicUsize,
    pub fail_open: AtomicBool,
    pub fail_export: AtomicBool,
    pub fail_close: AtomicBool,
    /// 下一次工厂调用 panic，随后自动复位。
    pub panic_on_create: AtomicBool,
    closes: Mutex<Vec<bool>>,
    hold_open: Mutex<Option<Arc<Latch>>>,
    seen: Mutex<Vec<LifecycleEventKind>>,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// 每次 `Controller::close` 收到的 `gracefully` 参数。
    pub fn closes(&self) -> Vec<bool> {
        self.closes.lock().expect("锁不应中毒").clone()
    }

    /// 让之后的 `open()` 挂起直到栅栏释放。
    pub fn hold_open(&self, latch: &Arc<Latch>) {
        *self.hold_open.lock().expect("锁不应中毒") = Some(Arc::clone(latch));
    }

    /// 控制器作为事件处理器收到的事件。
    pub fn seen(&self) -> Vec<LifecycleEventKind> {
        self.seen.lock().expect("锁不应中毒").clone()
    }

    pub fn factory(self: &Arc<Self>) -> ControllerFactory<ScriptedController> {
        let script = Arc::clone(self);
        ControllerFactory::new(move || {
            if script.panic_on_create.swap(false, Ordering::SeqCst) {
                panic!("controller factory exploded");
            }
            let id = script.created.fetch_add(1, Ordering::SeqCst) + 1;
            ScriptedController {
                id,
                script: Arc::clone(&script),
            }
        })
    }
}

/// 按 [`Script`] 脚本行动的控制器；打开/导出成功时产出自身编号。
pub struct ScriptedController {
    pub id: usize,
    script: Arc<Script>,
}

impl Controller for ScriptedController {
    type Output = usize;

    fn open(&self) -> ControllerFuture<usize> {
        self.script.opens.fetch_add(1, Ordering::SeqCst);
        let hold = self
            .script
            .hold_open
            .lock()
            .expect("锁不应中毒")
            .as_ref()
            .map(|latch| latch.wait());
        let fail = self.script.fail_open.load(Ordering::SeqCst);
        let id = self.id;
        async move {
            if let Some(hold) = hold {
                hold.await;
            }
            if fail {
                Err::<usize, BoxError>("open refused".into())
            } else {
                Ok(id)
            }
        }
        .boxed()
    }

    fn close(&self, gracefully: bool) -> ControllerFuture<()> {
        self.script
            .closes
            .lock()
            .expect("锁不应中毒")
            .push(gracefully);
        if self.script.fail_close.load(Ordering::SeqCst) {
            future::err::<(), BoxError>("close refused".into()).boxed()
        } else {
            future::ok(()).boxed()
        }
    }

    fn fire_close(&self) {
        self.script.fire_closes.fetch_add(1, Ordering::SeqCst);
    }

    fn event_handler(&self) -> Option<&dyn LifecycleEventHandler> {
        Some(self)
    }
}

impl ExportController for ScriptedController {
    fn export(&self) -> ControllerFuture<usize> {
        self.script.exports.fetch_add(1, Ordering::SeqCst);
        let result: Result<usize, BoxError> = if self.script.fail_export.load(Ordering::SeqCst) {
            Err("export refused".into())
        } else {
            Ok(self.id)
        };
        future::ready(result).boxed()
    }
}

impl LifecycleEventHandler for ScriptedController {
    fn on_event(&self, event: &LifecycleEvent) {
        self.script
            .seen
            .lock()
            .expect("锁不应中毒")
            .push(event.kind());
    }
}

/// 按顺序记录事件种类的处理器。
#[derive(Clone, Default)]
pub struct EventLog {
    kinds: Arc<Mutex<Vec<LifecycleEventKind>>>,
}

impl EventLog {
    pub fn kinds(&self) -> Vec<LifecycleEventKind> {
        self.kinds.lock().expect("锁不应中毒").clone()
    }

    pub fn count(&self, kind: LifecycleEventKind) -> usize {
        self.kinds().iter().filter(|seen| **seen == kind).count()
    }
}

impl LifecycleEventHandler for EventLog {
    fn on_event(&self, event: &LifecycleEvent) {
        self.kinds
            .lock()
            .expect("锁不应中毒")
            .push(event.kind());
    }
}

/// 轮询等待条件成立，超时视为失败。
pub fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "等待超时：{what}");
        thread::sleep(Duration::from_millis(1));
    }
}
