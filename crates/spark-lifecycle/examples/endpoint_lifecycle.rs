//! 一个服务提供方端点的完整生命周期：导出 → 打开 → 优雅关闭。
//!
//! 运行：`RUST_LOG=debug cargo run -p spark-lifecycle --example endpoint_lifecycle`
//!
//! - 导出阶段模拟注册中心登记，打开阶段模拟开始接收流量；
//! - 关闭前闸门模拟“等待在途请求排空”，主线程调用 `pass()` 提前放行；
//! - `TracingEventHandler` 把生命周期事件写成结构化日志。

use std::{
    error::Error,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use futures::{
    executor::{ThreadPool, block_on},
    future::{self, FutureExt},
};
use spark_lifecycle::{
    BoxError, Controller, ControllerFactory, ControllerFuture, ExLifecycleMachine,
    ExportController, GateSupplier, LifecycleSettings, State, TracingEventHandler,
};
use tracing_subscriber::EnvFilter;

/// 端点地址与登记次数。
struct Provider {
    address: &'static str,
    registrations: Arc<AtomicUsize>,
}

impl Controller for Provider {
    type Output = &'static str;

    fn open(&self) -> ControllerFuture<&'static str> {
        tracing::info!(address = self.address, "accepting traffic");
        future::ok(self.address).boxed()
    }

    fn close(&self, gracefully: bool) -> ControllerFuture<()> {
        tracing::info!(address = self.address, gracefully, "provider closed");
        future::ok(()).boxed()
    }

    fn fire_close(&self) {
        tracing::info!(address = self.address, "close requested while starting");
    }
}

impl ExportController for Provider {
    fn export(&self) -> ControllerFuture<&'static str> {
        let count = self.registrations.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(address = self.address, count, "registered with the directory");
        future::ok(self.address).boxed()
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = LifecycleSettings::labeled("provider.orders");
    let registrations = Arc::new(AtomicUsize::new(0));
    let factory = {
        let registrations = Arc::clone(&registrations);
        ControllerFactory::new(move || Provider {
            address: "127.0.0.1:7001",
            registrations: Arc::clone(&registrations),
        })
    };
    // 模拟排空在途请求：最长等待一分钟，通常由 `pass()` 提前结束。
    let drain = GateSupplier::from_fn(|| async {
        sleep_on_thread(Duration::from_secs(60)).await;
        Ok::<(), BoxError>(())
    });

    let machine = ExLifecycleMachine::builder(ThreadPool::new()?, factory)
        .settings(settings.clone())
        .handler(TracingEventHandler::new(settings.label.as_str()))
        .before_close(drain)
        .build()?;

    let address = block_on(machine.export())?;
    tracing::info!(address, phase = %machine.phase(), "exported");
    block_on(machine.open())?;
    tracing::info!(phase = %machine.phase(), "opened");

    let closing = machine.close(true);
    while !machine.pass() {
        thread::yield_now();
    }
    block_on(closing)?;
    tracing::info!(
        phase = %machine.phase(),
        registrations = registrations.load(Ordering::SeqCst),
        "closed"
    );
    Ok(())
}

/// 在独立线程上休眠的简易定时器，避免示例依赖具体异步运行时。
async fn sleep_on_thread(duration: Duration) {
    let (sender, receiver) = futures::channel::oneshot::channel::<()>();
    thread::spawn(move || {
        thread::sleep(duration);
        let _ = sender.send(());
    });
    let _ = receiver.await;
}
