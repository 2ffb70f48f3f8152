//! Fallback controller owning the active backend.
//!
//! ## Modes
//!
//! - **Distributed**: chosen at startup when a remote store URL is configured
//! - **Local**: chosen at startup otherwise, or after demotion
//!
//! ## Demotion
//!
//! The controller watches the distributed backend's connection state. Once it
//! reaches `Failed` the active backend is swapped for a fresh local backend and
//! its sweep loop is started. Demotion is one-way: a demoted process stays
//! local until restart. Entries written to the remote before demotion are not
//! copied over, so revocations and attempt counters start empty locally.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{OnceCell, watch};

use crate::backend::{
    BackendMode, ConnectionState, DistributedBackend, KvTtlStore, LocalBackend, RedisConnection,
    RemoteConnection, StoreBackend,
};
use crate::clock::SharedClock;
use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::tasks::{BackgroundTasks, shutdown_requested};

/// Owns exactly one active backend and falls back to local on failure.
///
/// Cloning is cheap and yields a handle to the same controller. Every store
/// operation runs the startup sequence first, so explicit [`start`] is
/// optional; concurrent first callers share one connect.
///
/// [`start`]: FallbackController::start
#[derive(Clone)]
pub struct FallbackController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    active: ArcSwap<StoreBackend>,
    mode: watch::Sender<BackendMode>,
    clock: SharedClock,
    sweep_interval: Duration,
    started: OnceCell<()>,
    demoted: AtomicBool,
    tasks: Arc<BackgroundTasks>,
}

impl FallbackController {
    /// Creates a controller from configuration.
    ///
    /// With no `remote_store_url` the controller runs locally. An unusable URL
    /// is logged and also yields a local controller.
    pub fn from_config(config: &StoreConfig, clock: SharedClock) -> Self {
        let Some(url) = config.remote_store_url.as_deref() else {
            tracing::info!("Remote store not configured, using local store only");
            return Self::local(clock, config.sweep_interval());
        };

        match RedisConnection::new(url, config) {
            Ok(conn) => Self::with_remote(Arc::new(conn), config, clock),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Failed to set up remote store. Falling back to local store."
                );
                Self::local(clock, config.sweep_interval())
            }
        }
    }

    /// Creates a controller that runs on the local backend.
    pub fn local(clock: SharedClock, sweep_interval: Duration) -> Self {
        let local = LocalBackend::new(clock.clone(), sweep_interval);
        Self::build(
            StoreBackend::Local(local),
            clock,
            sweep_interval,
            Arc::new(BackgroundTasks::new()),
        )
    }

    /// Creates a controller that starts on the given remote connection.
    pub fn with_remote(
        remote: Arc<dyn RemoteConnection>,
        config: &StoreConfig,
        clock: SharedClock,
    ) -> Self {
        let tasks = Arc::new(BackgroundTasks::new());
        let distributed = DistributedBackend::new(remote, config.reconnect.clone(), tasks.clone());
        Self::build(
            StoreBackend::Distributed(distributed),
            clock,
            config.sweep_interval(),
            tasks,
        )
    }

    fn build(
        backend: StoreBackend,
        clock: SharedClock,
        sweep_interval: Duration,
        tasks: Arc<BackgroundTasks>,
    ) -> Self {
        let (mode, _) = watch::channel(backend.mode());
        Self {
            inner: Arc::new(ControllerInner {
                active: ArcSwap::from_pointee(backend),
                mode,
                clock,
                sweep_interval,
                started: OnceCell::new(),
                demoted: AtomicBool::new(false),
                tasks,
            }),
        }
    }

    /// Runs the startup sequence once: connect the distributed backend, or
    /// start the local sweep.
    pub async fn start(&self) {
        self.inner
            .started
            .get_or_init(|| async {
                let backend = self.inner.active.load_full();
                match backend.as_ref() {
                    StoreBackend::Local(local) => {
                        self.inner.start_sweep(local);
                        tracing::info!(
                            sweep_interval_secs = self.inner.sweep_interval.as_secs(),
                            "Using local store"
                        );
                    }
                    StoreBackend::Distributed(distributed) => {
                        self.watch_for_failure(distributed);
                        distributed.connect().await;
                    }
                }
            })
            .await;
    }

    fn watch_for_failure(&self, distributed: &DistributedBackend) {
        let controller: Weak<ControllerInner> = Arc::downgrade(&self.inner);
        let mut states = distributed.subscribe();
        let mut shutdown = self.inner.tasks.shutdown_signal();

        self.inner.tasks.spawn(async move {
            tokio::select! {
                result = states.wait_for(|s| *s == ConnectionState::Failed) => {
                    let failed = result.is_ok();
                    drop(result);
                    if failed {
                        if let Some(inner) = controller.upgrade() {
                            inner.demote("remote store reconnect attempts exhausted");
                        }
                    }
                }
                _ = shutdown_requested(&mut shutdown) => {}
            }
        });
    }

    pub fn mode(&self) -> BackendMode {
        *self.inner.mode.borrow()
    }

    /// Receiver for backend mode changes.
    pub fn subscribe_mode(&self) -> watch::Receiver<BackendMode> {
        self.inner.mode.subscribe()
    }

    /// `"distributed"` or `"local"`.
    pub fn backend_kind(&self) -> &'static str {
        self.mode().as_str()
    }

    /// The currently active backend.
    pub fn backend(&self) -> Arc<StoreBackend> {
        self.inner.active.load_full()
    }

    /// Swaps to the local backend immediately.
    pub fn demote(&self, reason: &str) {
        self.inner.demote(reason);
    }

    /// Number of background loops still running.
    pub fn background_tasks(&self) -> usize {
        self.inner.tasks.active()
    }

    /// Cancels every background loop and waits for them to stop.
    pub async fn shutdown(&self) {
        tracing::debug!(mode = %self.mode(), "Shutting down store background tasks");
        self.inner.tasks.shutdown().await;
    }
}

impl ControllerInner {
    fn start_sweep(&self, local: &LocalBackend) {
        if let Some(handle) = local.start_sweep(self.tasks.shutdown_signal()) {
            self.tasks.track(handle);
        }
    }

    fn demote(&self, reason: &str) {
        if self.demoted.swap(true, Ordering::AcqRel) {
            return;
        }

        let local = LocalBackend::new(self.clock.clone(), self.sweep_interval);
        if !self.tasks.is_shutting_down() {
            self.start_sweep(&local);
        }
        self.active.store(Arc::new(StoreBackend::Local(local)));
        self.mode.send_replace(BackendMode::Local);

        metrics::counter!("authguard_backend_demotions_total").increment(1);
        tracing::error!(reason, "Demoted to local store; state is no longer shared across instances");
    }
}

#[async_trait]
impl KvTtlStore for FallbackController {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.start().await;
        self.backend().get(key).await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.start().await;
        self.backend().set_with_ttl(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.start().await;
        self.backend().delete(key).await
    }

    async fn list_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.start().await;
        self.backend().list_keys_by_prefix(prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ReconnectConfig;
    use crate::testing::FakeRemote;

    fn remote_config() -> StoreConfig {
        StoreConfig {
            remote_store_url: Some("redis://fake".to_string()),
            reconnect: ReconnectConfig {
                max_attempts: 10,
                initial_backoff_ms: 100,
                max_backoff_ms: 2_000,
            },
            ..StoreConfig::default()
        }
    }

    #[tokio::test]
    async fn test_local_when_no_remote_configured() {
        let clock = ManualClock::starting_now();
        let controller = FallbackController::from_config(&StoreConfig::default(), clock.shared());

        assert_eq!(controller.mode(), BackendMode::Local);
        assert_eq!(controller.backend_kind(), "local");

        controller
            .set_with_ttl("k", "v", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(controller.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(controller.background_tasks(), 1);

        controller.shutdown().await;
        assert_eq!(controller.background_tasks(), 0);
    }

    #[tokio::test]
    async fn test_distributed_when_remote_healthy() {
        let clock = ManualClock::starting_now();
        let remote = FakeRemote::new(clock.shared());
        let controller =
            FallbackController::with_remote(Arc::new(remote.clone()), &remote_config(), clock.shared());

        controller
            .set_with_ttl("k", "v", Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(controller.mode(), BackendMode::Distributed);
        assert_eq!(remote.len(), 1);
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_demotes_after_eleven_failed_connects() {
        let clock = ManualClock::starting_now();
        let remote = FakeRemote::unreachable(clock.shared());
        let controller =
            FallbackController::with_remote(Arc::new(remote.clone()), &remote_config(), clock.shared());
        let mut mode = controller.subscribe_mode();

        controller.start().await;
        mode.wait_for(|m| *m == BackendMode::Local).await.unwrap();

        assert_eq!(remote.ping_count(), 11);
        assert_eq!(controller.backend_kind(), "local");

        // Write right after demotion lands in the local backend
        controller
            .set_with_ttl("after", "1", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(controller.get("after").await.unwrap().as_deref(), Some("1"));
        assert!(remote.is_empty());

        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_first_use_connects_once() {
        let clock = ManualClock::starting_now();
        let remote = FakeRemote::new(clock.shared());
        let controller =
            FallbackController::with_remote(Arc::new(remote.clone()), &remote_config(), clock.shared());

        let mut handles = Vec::new();
        for i in 0..8 {
            let controller = controller.clone();
            handles.push(tokio::spawn(async move {
                controller
                    .set_with_ttl(&format!("k{i}"), "v", Duration::from_secs(10))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(remote.ping_count(), 1);
        assert_eq!(remote.len(), 8);
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_demote_is_idempotent_and_starts_one_sweep() {
        let clock = ManualClock::starting_now();
        let remote = FakeRemote::new(clock.shared());
        let controller =
            FallbackController::with_remote(Arc::new(remote), &remote_config(), clock.shared());
        controller.start().await;

        controller.demote("test");
        let first = controller.backend();
        controller.demote("test again");
        let second = controller.backend();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(controller.mode(), BackendMode::Local);
        match first.as_ref() {
            StoreBackend::Local(local) => assert!(local.is_sweeping()),
            StoreBackend::Distributed(_) => panic!("expected local backend"),
        }

        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_url_falls_back_to_local() {
        let clock = ManualClock::starting_now();
        let config = StoreConfig {
            remote_store_url: Some("not a url".to_string()),
            ..StoreConfig::default()
        };
        let controller = FallbackController::from_config(&config, clock.shared());

        assert_eq!(controller.mode(), BackendMode::Local);
    }
}
