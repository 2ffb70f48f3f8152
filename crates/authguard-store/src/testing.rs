//! In-memory stand-in for a remote cache.
//!
//! Enabled for this crate's unit tests and, through the `testing` feature,
//! for tests in dependent crates.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use time::OffsetDateTime;

use crate::backend::RemoteConnection;
use crate::clock::SharedClock;
use crate::error::{StoreError, StoreResult};

/// Fake remote cache with switchable reachability.
///
/// Expiry follows the injected clock, like a real remote would follow wall
/// time. Clones share state.
#[derive(Clone)]
pub struct FakeRemote {
    inner: Arc<FakeInner>,
}

struct FakeInner {
    entries: DashMap<String, (String, OffsetDateTime, u64)>,
    clock: SharedClock,
    reachable: AtomicBool,
    fail_next: AtomicBool,
    pings: AtomicU32,
    operations: AtomicU32,
}

impl FakeRemote {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(FakeInner {
                entries: DashMap::new(),
                clock,
                reachable: AtomicBool::new(true),
                fail_next: AtomicBool::new(false),
                pings: AtomicU32::new(0),
                operations: AtomicU32::new(0),
            }),
        }
    }

    /// A remote that refuses every connection.
    pub fn unreachable(clock: SharedClock) -> Self {
        let remote = Self::new(clock);
        remote.set_reachable(false);
        remote
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Makes the next data operation fail with an operation error.
    pub fn fail_next_operation(&self) {
        self.inner.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn ping_count(&self) -> u32 {
        self.inner.pings.load(Ordering::SeqCst)
    }

    /// Data operations that reached the fake (pings excluded).
    pub fn operation_count(&self) -> u32 {
        self.inner.operations.load(Ordering::SeqCst)
    }

    /// TTL in seconds passed with the last write of `key`.
    pub fn last_ttl_secs(&self, key: &str) -> Option<u64> {
        self.inner.entries.get(key).map(|entry| entry.2)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    fn check(&self, operation: &'static str) -> StoreResult<()> {
        self.inner.operations.fetch_add(1, Ordering::SeqCst);
        if !self.inner.reachable.load(Ordering::SeqCst) {
            return Err(StoreError::connection(format!("{operation}: connection refused")));
        }
        if self.inner.fail_next.swap(false, Ordering::SeqCst) {
            return Err(StoreError::operation(operation, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteConnection for FakeRemote {
    async fn ping(&self) -> StoreResult<()> {
        self.inner.pings.fetch_add(1, Ordering::SeqCst);
        if self.inner.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::connection("ping: connection refused"))
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check("get")?;
        let now = self.inner.clock.now();
        Ok(self
            .inner
            .entries
            .get(key)
            .filter(|entry| entry.1 > now)
            .map(|entry| entry.0.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        self.check("set_ex")?;
        let expires_at = i64::try_from(ttl_secs)
            .ok()
            .and_then(|secs| self.inner.clock.now().checked_add(time::Duration::seconds(secs)))
            .ok_or_else(|| StoreError::operation("set_ex", "invalid expire time"))?;
        self.inner
            .entries
            .insert(key.to_string(), (value.to_string(), expires_at, ttl_secs));
        Ok(())
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        self.check("del")?;
        self.inner.entries.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.check("scan")?;
        let now = self.inner.clock.now();
        Ok(self
            .inner
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && entry.value().1 > now)
            .map(|entry| entry.key().clone())
            .collect())
    }

    fn endpoint(&self) -> String {
        "fake://remote".to_string()
    }
}
