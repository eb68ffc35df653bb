use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::sync::{Processor, Scanner};

/// Handle over the two worker loops. Dropping it does not stop them; call
/// `shutdown` to stop cleanly.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Suppress new ticks and block until any in-flight tick returns.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("Ticker task ended abnormally: {}", e);
            }
        }
    }
}

pub fn start_scheduler(
    scanner: Arc<Scanner>,
    processor: Arc<Processor>,
    scanner_interval: Duration,
    processor_interval: Duration,
) -> SchedulerHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handles = vec![
        spawn_ticker("scanner", scanner_interval, shutdown_rx.clone(), move || {
            let scanner = scanner.clone();
            async move { scanner.tick().await }
        }),
        spawn_ticker(
            "processor",
            processor_interval,
            shutdown_rx,
            move || {
                let processor = processor.clone();
                async move { processor.tick().await }
            },
        ),
    ];

    SchedulerHandle {
        shutdown_tx,
        handles,
    }
}

/// One worker loop: wait the interval, then run the task to completion. The
/// next wait starts only after the previous tick finishes, so a ticker can
/// never overlap itself.
pub fn spawn_ticker<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    task: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tracing::info!("{} ticker started, running every {:?}", name, interval);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            task().await;
        }
        tracing::info!("{} ticker stopped", name);
    })
}
