//! In-process backend with TTL support.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::{KvTtlStore, ensure_ttl, expires_at};
use crate::clock::SharedClock;
use crate::error::StoreResult;
use crate::tasks::shutdown_requested;

/// A stored value with its absolute expiry.
#[derive(Clone, Debug)]
struct LocalEntry {
    value: String,
    expires_at: OffsetDateTime,
}

impl LocalEntry {
    fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}

/// Local in-memory backend using DashMap.
///
/// Entries do not expire on their own: reads check expiry lazily, and a
/// background sweep started with [`LocalBackend::start_sweep`] removes
/// expired entries on a fixed interval.
#[derive(Clone)]
pub struct LocalBackend {
    inner: Arc<LocalInner>,
}

struct LocalInner {
    entries: DashMap<String, LocalEntry>,
    clock: SharedClock,
    sweep_interval: Duration,
    sweep_started: AtomicBool,
}

impl LocalBackend {
    pub fn new(clock: SharedClock, sweep_interval: Duration) -> Self {
        Self {
            inner: Arc::new(LocalInner {
                entries: DashMap::new(),
                clock,
                sweep_interval,
                sweep_started: AtomicBool::new(false),
            }),
        }
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn sweep_interval(&self) -> Duration {
        self.inner.sweep_interval
    }

    /// Removes every expired entry. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.inner.clock.now();
        let mut removed = 0;

        self.inner.entries.retain(|_, entry| {
            if entry.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });

        removed
    }

    /// Starts the periodic sweep.
    ///
    /// Only the first call spawns a loop; later calls return `None`. The loop
    /// exits when `shutdown` flips to `true`.
    pub fn start_sweep(&self, mut shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if self
            .inner
            .sweep_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let backend = self.clone();
        Some(tokio::spawn(async move {
            let period = backend.inner.sweep_interval;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::debug!(interval_secs = period.as_secs(), "local store sweep started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = backend.sweep_expired();
                        if removed > 0 {
                            tracing::debug!(removed, remaining = backend.len(), "swept expired entries");
                        }
                    }
                    _ = shutdown_requested(&mut shutdown) => {
                        tracing::debug!("local store sweep stopped");
                        break;
                    }
                }
            }
        }))
    }

    /// Whether the sweep loop has been started.
    pub fn is_sweeping(&self) -> bool {
        self.inner.sweep_started.load(Ordering::Acquire)
    }
}

#[async_trait]
impl KvTtlStore for LocalBackend {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = self.inner.clock.now();

        if let Some(entry) = self.inner.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
            // Expired but not swept yet
            drop(entry);
            self.inner
                .entries
                .remove_if(key, |_, entry| entry.is_expired(now));
        }

        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        ensure_ttl(ttl)?;
        let entry = LocalEntry {
            value: value.to_string(),
            expires_at: expires_at(self.inner.clock.now(), ttl)?,
        };
        self.inner.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.entries.remove(key);
        Ok(())
    }

    async fn list_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let now = self.inner.clock.now();
        Ok(self
            .inner
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && !entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn backend(clock: &ManualClock) -> LocalBackend {
        LocalBackend::new(clock.shared(), Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let clock = ManualClock::starting_now();
        let store = backend(&clock);

        store
            .set_with_ttl("k", "v", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_reads_absent_before_sweep() {
        let clock = ManualClock::starting_now();
        let store = backend(&clock);

        store
            .set_with_ttl("k", "v", Duration::from_secs(60))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(60));

        assert!(store.get("k").await.unwrap().is_none());
        // Lazy check also drops the entry
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_resets_expiry() {
        let clock = ManualClock::starting_now();
        let store = backend(&clock);

        store.set_with_ttl("k", "a", Duration::from_secs(10)).await.unwrap();
        clock.advance(Duration::from_secs(8));
        store.set_with_ttl("k", "b", Duration::from_secs(10)).await.unwrap();
        clock.advance(Duration::from_secs(8));

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_delete_missing_key_succeeds() {
        let clock = ManualClock::starting_now();
        let store = backend(&clock);

        assert!(store.delete("missing").await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let clock = ManualClock::starting_now();
        let store = backend(&clock);

        let err = store.set_with_ttl("k", "v", Duration::ZERO).await.unwrap_err();
        assert!(!err.is_connection());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_rejected() {
        let clock = ManualClock::starting_now();
        let store = backend(&clock);

        let err = store
            .set_with_ttl("k", "v", Duration::from_secs(1_000_000_000_000))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ttl out of range"));
        assert!(store.set_with_ttl("k", "v", Duration::MAX).await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_list_keys_by_prefix_skips_expired() {
        let clock = ManualClock::starting_now();
        let store = backend(&clock);

        store.set_with_ttl("a:1", "x", Duration::from_secs(10)).await.unwrap();
        store.set_with_ttl("a:2", "x", Duration::from_secs(100)).await.unwrap();
        store.set_with_ttl("b:1", "x", Duration::from_secs(100)).await.unwrap();
        clock.advance(Duration::from_secs(20));

        let keys = store.list_keys_by_prefix("a:").await.unwrap();
        assert_eq!(keys, vec!["a:2".to_string()]);
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let clock = ManualClock::starting_now();
        let store = backend(&clock);

        for i in 0..5 {
            store
                .set_with_ttl(&format!("short:{i}"), "x", Duration::from_secs(5))
                .await
                .unwrap();
        }
        store.set_with_ttl("long", "x", Duration::from_secs(500)).await.unwrap();
        clock.advance(Duration::from_secs(6));

        assert_eq!(store.sweep_expired(), 5);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_loop_removes_expired_entries() {
        let clock = ManualClock::starting_now();
        let store = LocalBackend::new(clock.shared(), Duration::from_secs(300));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = store.start_sweep(shutdown_rx).unwrap();

        store.set_with_ttl("k", "v", Duration::from_secs(10)).await.unwrap();
        clock.advance(Duration::from_secs(11));
        assert_eq!(store.len(), 1);

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(store.len(), 0);

        shutdown_tx.send_replace(true);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_starts_once() {
        let clock = ManualClock::starting_now();
        let store = backend(&clock);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let first = store.start_sweep(shutdown_rx.clone());
        let second = store.start_sweep(shutdown_rx);

        assert!(first.is_some());
        assert!(second.is_none());
        assert!(store.is_sweeping());

        shutdown_tx.send_replace(true);
        first.unwrap().await.unwrap();
    }
}
