//! Key-value TTL store interface and its backends.
//!
//! ## Backends
//!
//! - **Distributed**: Redis shared by every instance, native key expiry
//! - **Local**: per-process `DashMap`, lazy expiry on read plus a periodic sweep
//!
//! [`StoreBackend`] is the tagged variant the fallback controller swaps
//! between; it dispatches to the concrete backend with a `match`.

pub mod distributed;
pub mod local;
pub mod remote;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;

use crate::config::MAX_TTL;
use crate::error::{StoreError, StoreResult};

pub use distributed::{ConnectionState, DistributedBackend};
pub use local::LocalBackend;
pub use remote::{RedisConnection, RemoteConnection};

/// Storage interface over opaque string keys and values with expiry.
///
/// Each single-key operation is atomic. Nothing is guaranteed across keys,
/// and concurrent writes to one key resolve as last-writer-wins.
#[async_trait]
pub trait KvTtlStore: Send + Sync {
    /// Returns the value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Stores `value` under `key`, expiring after `ttl`.
    ///
    /// A zero `ttl` is rejected with an operation error.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Removes `key`. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Lists live keys starting with `prefix`.
    ///
    /// This is a full scan on every backend; keep it off hot paths.
    async fn list_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// Which backend is currently serving requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// Shared remote cache.
    Distributed,
    /// In-process map.
    Local,
}

impl BackendMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Distributed => "distributed",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The active backend.
#[derive(Clone)]
pub enum StoreBackend {
    /// Multi-instance: Redis
    Distributed(DistributedBackend),
    /// Single-instance: local DashMap
    Local(LocalBackend),
}

impl StoreBackend {
    pub fn mode(&self) -> BackendMode {
        match self {
            StoreBackend::Distributed(_) => BackendMode::Distributed,
            StoreBackend::Local(_) => BackendMode::Local,
        }
    }
}

#[async_trait]
impl KvTtlStore for StoreBackend {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self {
            StoreBackend::Distributed(backend) => backend.get(key).await,
            StoreBackend::Local(backend) => backend.get(key).await,
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        match self {
            StoreBackend::Distributed(backend) => backend.set_with_ttl(key, value, ttl).await,
            StoreBackend::Local(backend) => backend.set_with_ttl(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        match self {
            StoreBackend::Distributed(backend) => backend.delete(key).await,
            StoreBackend::Local(backend) => backend.delete(key).await,
        }
    }

    async fn list_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        match self {
            StoreBackend::Distributed(backend) => backend.list_keys_by_prefix(prefix).await,
            StoreBackend::Local(backend) => backend.list_keys_by_prefix(prefix).await,
        }
    }
}

pub(crate) fn ensure_ttl(ttl: Duration) -> StoreResult<()> {
    if ttl.is_zero() {
        return Err(StoreError::operation("set_with_ttl", "ttl must be > 0"));
    }
    if ttl > MAX_TTL {
        return Err(StoreError::operation("set_with_ttl", "ttl out of range"));
    }
    Ok(())
}

/// Absolute expiry of an entry written at `now`.
pub(crate) fn expires_at(now: OffsetDateTime, ttl: Duration) -> StoreResult<OffsetDateTime> {
    time::Duration::try_from(ttl)
        .ok()
        .and_then(|ttl| now.checked_add(ttl))
        .ok_or_else(|| StoreError::operation("set_with_ttl", "ttl out of range"))
}

/// Whole seconds for a Redis `SETEX`, rounded up so short TTLs never become 0.
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    let rounded = if ttl.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    };
    rounded.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_secs_rounds_up() {
        assert_eq!(ttl_secs(Duration::from_secs(60)), 60);
        assert_eq!(ttl_secs(Duration::from_millis(1500)), 2);
        assert_eq!(ttl_secs(Duration::from_millis(1)), 1);
        assert_eq!(ttl_secs(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_zero_ttl_rejected() {
        assert!(ensure_ttl(Duration::ZERO).is_err());
        assert!(ensure_ttl(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_ttl_above_maximum_rejected() {
        assert!(ensure_ttl(MAX_TTL).is_ok());
        assert!(ensure_ttl(MAX_TTL + Duration::from_secs(1)).is_err());
        assert!(ensure_ttl(Duration::MAX).is_err());
    }

    #[test]
    fn test_expires_at_out_of_range() {
        let now = OffsetDateTime::now_utc();
        assert!(expires_at(now, Duration::from_secs(60)).is_ok());
        assert!(expires_at(now, Duration::from_secs(1_000_000_000_000)).is_err());
        assert!(expires_at(now, Duration::MAX).is_err());
    }

    #[test]
    fn test_backend_mode_labels() {
        assert_eq!(BackendMode::Distributed.to_string(), "distributed");
        assert_eq!(BackendMode::Local.as_str(), "local");
    }
}
