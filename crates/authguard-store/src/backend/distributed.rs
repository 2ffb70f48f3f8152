//! Distributed backend over a shared remote cache.
//!
//! ## Connection lifecycle
//!
//! ```text
//! Connecting ──ping ok──▶ Healthy ◀──ping ok── Reconnecting
//!     │                     │                     │
//!     └──ping failed──▶ Reconnecting ◀──conn err──┘
//!                            │
//!                   max attempts exhausted
//!                            ▼
//!                         Failed
//! ```
//!
//! `Failed` is terminal. The fallback controller watches for it and swaps in
//! the local backend.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::watch;

use super::remote::RemoteConnection;
use super::{KvTtlStore, ensure_ttl, ttl_secs};
use crate::config::ReconnectConfig;
use crate::error::{StoreError, StoreResult};
use crate::tasks::{BackgroundTasks, shutdown_requested};

/// Connection state of the distributed backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial connect has not completed yet.
    Connecting,
    /// Remote reachable; operations go to the network.
    Healthy,
    /// Connection lost; the reconnect loop is running.
    Reconnecting,
    /// Reconnect attempts exhausted. Terminal.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Healthy => "healthy",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend that stores entries in a remote cache shared by all instances.
///
/// Expiry is enforced by the remote (`SETEX`). While the connection is not
/// healthy every operation fails fast with a connection error instead of
/// waiting on the network.
#[derive(Clone)]
pub struct DistributedBackend {
    inner: Arc<DistributedInner>,
}

struct DistributedInner {
    remote: Arc<dyn RemoteConnection>,
    policy: ReconnectConfig,
    state: watch::Sender<ConnectionState>,
    reconnecting: AtomicBool,
    connect_attempts: AtomicU32,
    tasks: Arc<BackgroundTasks>,
}

impl DistributedBackend {
    pub fn new(
        remote: Arc<dyn RemoteConnection>,
        policy: ReconnectConfig,
        tasks: Arc<BackgroundTasks>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            inner: Arc::new(DistributedInner {
                remote,
                policy,
                state,
                reconnecting: AtomicBool::new(false),
                connect_attempts: AtomicU32::new(0),
                tasks,
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver for connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Total connect attempts so far, the initial one included.
    pub fn connect_attempts(&self) -> u32 {
        self.inner.connect_attempts.load(Ordering::Relaxed)
    }

    pub fn endpoint(&self) -> String {
        self.inner.remote.endpoint()
    }

    /// Runs the initial connect.
    ///
    /// On failure the reconnect loop is started in the background and this
    /// returns immediately with [`ConnectionState::Reconnecting`].
    pub async fn connect(&self) -> ConnectionState {
        let endpoint = self.endpoint();
        tracing::info!(endpoint = %endpoint, "Connecting to remote store");

        self.inner.connect_attempts.fetch_add(1, Ordering::Relaxed);
        match self.inner.remote.ping().await {
            Ok(()) => {
                self.inner.state.send_replace(ConnectionState::Healthy);
                tracing::info!(endpoint = %endpoint, "Connected to remote store");
            }
            Err(e) => {
                tracing::warn!(
                    endpoint = %endpoint,
                    error = %e,
                    "Initial connect to remote store failed"
                );
                self.begin_reconnect();
            }
        }

        self.state()
    }

    /// Starts the reconnect loop unless one is already running or the
    /// backend has failed permanently.
    fn begin_reconnect(&self) {
        if self.state() == ConnectionState::Failed {
            return;
        }
        if self
            .inner
            .reconnecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        self.inner.state.send_replace(ConnectionState::Reconnecting);

        let backend = self.clone();
        let shutdown = self.inner.tasks.shutdown_signal();
        if !self.inner.tasks.spawn(backend.reconnect_loop(shutdown)) {
            self.inner.reconnecting.store(false, Ordering::Release);
        }
    }

    async fn reconnect_loop(self, mut shutdown: watch::Receiver<bool>) {
        let policy = &self.inner.policy;
        let mut backoff = policy.initial_backoff();

        for attempt in 1..=policy.max_attempts {
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown_requested(&mut shutdown) => {
                    tracing::debug!("reconnect loop cancelled");
                    self.inner.reconnecting.store(false, Ordering::Release);
                    return;
                }
            }

            self.inner.connect_attempts.fetch_add(1, Ordering::Relaxed);
            match self.inner.remote.ping().await {
                Ok(()) => {
                    self.inner.reconnecting.store(false, Ordering::Release);
                    self.inner.state.send_replace(ConnectionState::Healthy);
                    tracing::info!(attempt, "Reconnected to remote store");
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Remote store reconnect attempt failed"
                    );
                }
            }

            backoff = policy.next_backoff(backoff);
        }

        tracing::error!(
            attempts = self.connect_attempts(),
            endpoint = %self.endpoint(),
            "Remote store unreachable, giving up"
        );
        self.inner.state.send_replace(ConnectionState::Failed);
    }

    fn ensure_healthy(&self) -> StoreResult<()> {
        match self.state() {
            ConnectionState::Healthy => Ok(()),
            state => Err(StoreError::connection(format!("remote store is {state}"))),
        }
    }

    /// Passes `result` through, starting reconnection on connection errors.
    fn observe<T>(&self, result: StoreResult<T>) -> StoreResult<T> {
        if let Err(e) = &result {
            if e.is_connection() {
                tracing::warn!(error = %e, "Remote store connection lost");
                self.begin_reconnect();
            }
        }
        result
    }
}

#[async_trait]
impl KvTtlStore for DistributedBackend {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.ensure_healthy()?;
        let result = self.inner.remote.get(key).await;
        self.observe(result)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        ensure_ttl(ttl)?;
        self.ensure_healthy()?;
        let result = self.inner.remote.set_ex(key, value, ttl_secs(ttl)).await;
        self.observe(result)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.ensure_healthy()?;
        let result = self.inner.remote.del(key).await;
        self.observe(result)
    }

    async fn list_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.ensure_healthy()?;
        let result = self.inner.remote.scan_prefix(prefix).await;
        self.observe(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::FakeRemote;

    fn policy() -> ReconnectConfig {
        ReconnectConfig {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        }
    }

    fn backend(remote: &FakeRemote) -> (DistributedBackend, Arc<BackgroundTasks>) {
        let tasks = Arc::new(BackgroundTasks::new());
        let backend = DistributedBackend::new(Arc::new(remote.clone()), policy(), tasks.clone());
        (backend, tasks)
    }

    #[tokio::test]
    async fn test_connect_healthy() {
        let remote = FakeRemote::new(ManualClock::starting_now().shared());
        let (backend, _tasks) = backend(&remote);

        assert_eq!(backend.connect().await, ConnectionState::Healthy);

        backend
            .set_with_ttl("k", "v", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(remote.last_ttl_secs("k"), Some(60));
    }

    #[tokio::test]
    async fn test_operations_fail_fast_before_connect() {
        let remote = FakeRemote::new(ManualClock::starting_now().shared());
        let (backend, _tasks) = backend(&remote);

        let err = backend.get("k").await.unwrap_err();
        assert!(err.is_connection());
        assert_eq!(remote.operation_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let remote = FakeRemote::new(ManualClock::starting_now().shared());
        remote.set_reachable(false);
        let (backend, _tasks) = backend(&remote);
        let mut states = backend.subscribe();

        assert_eq!(backend.connect().await, ConnectionState::Reconnecting);

        states
            .wait_for(|s| *s == ConnectionState::Failed)
            .await
            .unwrap();

        // Initial attempt plus ten retries
        assert_eq!(backend.connect_attempts(), 11);
        assert_eq!(remote.ping_count(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_when_remote_returns() {
        let remote = FakeRemote::new(ManualClock::starting_now().shared());
        remote.set_reachable(false);
        let (backend, _tasks) = backend(&remote);
        let mut states = backend.subscribe();

        backend.connect().await;
        tokio::time::sleep(Duration::from_millis(350)).await;
        remote.set_reachable(true);

        states
            .wait_for(|s| *s == ConnectionState::Healthy)
            .await
            .unwrap();
        assert!(backend.connect_attempts() < 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_error_starts_single_reconnect_loop() {
        let remote = FakeRemote::new(ManualClock::starting_now().shared());
        let (backend, tasks) = backend(&remote);
        backend.connect().await;

        remote.set_reachable(false);
        assert!(backend.get("a").await.unwrap_err().is_connection());
        // Now reconnecting, so this one fails fast without reaching the remote
        assert!(backend.get("b").await.unwrap_err().is_connection());

        assert_eq!(backend.state(), ConnectionState::Reconnecting);
        assert_eq!(tasks.active(), 1);

        tasks.shutdown().await;
        assert_eq!(tasks.active(), 0);
    }

    #[tokio::test]
    async fn test_operation_error_keeps_connection_healthy() {
        let remote = FakeRemote::new(ManualClock::starting_now().shared());
        let (backend, _tasks) = backend(&remote);
        backend.connect().await;

        remote.fail_next_operation();
        let err = backend.get("k").await.unwrap_err();

        assert!(!err.is_connection());
        assert_eq!(backend.state(), ConnectionState::Healthy);
        assert!(backend.get("k").await.is_ok());
    }
}
