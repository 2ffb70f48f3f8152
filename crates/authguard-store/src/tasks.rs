//! Background task bookkeeping.

use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Set of background loops sharing one shutdown signal.
///
/// Loops receive a `watch::Receiver<bool>` that flips to `true` on
/// [`BackgroundTasks::shutdown`]; shutdown then awaits every tracked task.
pub struct BackgroundTasks {
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Receiver that observes the shutdown signal.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Whether shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Spawns and tracks a task. Returns `false` once shutdown has started.
    pub fn spawn<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_shutting_down() {
            return false;
        }
        self.track(tokio::spawn(task));
        true
    }

    /// Tracks a task spawned elsewhere.
    pub fn track(&self, handle: JoinHandle<()>) {
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Number of tracked tasks that are still running.
    pub fn active(&self) -> usize {
        self.handles
            .lock()
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Signals shutdown and waits for every tracked task to finish.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        loop {
            let pending: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
            if pending.is_empty() {
                break;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        tracing::error!(error = %e, "background task panicked");
                    }
                }
            }
        }
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once the shutdown flag is set or its sender is gone.
pub(crate) async fn shutdown_requested(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|stop| *stop).await;
}
