//! Login attempt throttling.
//!
//! Tracks failed logins per client address and blocks a client once it
//! reaches the failure threshold.
//!
//! ## Client states
//!
//! ```text
//! Clean ──failure──▶ Tracking ──threshold reached──▶ Blocked
//!   ▲                   │                              │
//!   └──success / TTL────┘◀──next failure after block───┘
//! ```
//!
//! A failure that arrives after the block lifted, or after the previous
//! failure aged out of the window, starts a fresh episode at count 1.
//!
//! ## Concurrency
//!
//! `record_failure` is a read-modify-write without locking. Concurrent
//! failures from one client across instances can under-count.

mod record;

pub use record::LoginAttemptRecord;

use authguard_store::{FallbackController, KvTtlStore, SharedClock, StoreError, StoreResult};
use serde::Serialize;

use crate::client::{Whitelist, normalize_client_key};
use crate::config::AttemptConfig;
use crate::error::GuardResult;
use crate::metrics;

/// Whether a client may attempt to log in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AttemptDecision {
    Allow,
    Deny { retry_after_secs: u64 },
}

impl AttemptDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Allow => None,
            Self::Deny { retry_after_secs } => Some(*retry_after_secs),
        }
    }
}

/// Login attempt diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptStats {
    pub backend_kind: &'static str,
    pub tracked_clients: usize,
    pub blocked_clients: usize,
}

/// Per-client failed login tracker.
#[derive(Clone)]
pub struct LoginAttemptTracker {
    store: FallbackController,
    clock: SharedClock,
    config: AttemptConfig,
    whitelist: Whitelist,
    prefix: String,
}

impl LoginAttemptTracker {
    pub fn new(
        store: FallbackController,
        namespace: &str,
        config: AttemptConfig,
        clock: SharedClock,
    ) -> GuardResult<Self> {
        let whitelist = Whitelist::parse(&config.whitelist)?;
        Ok(Self {
            store,
            clock,
            config,
            whitelist,
            prefix: format!("{namespace}:attempts:"),
        })
    }

    fn key(&self, client_key: &str) -> String {
        format!("{}{}", self.prefix, normalize_client_key(client_key))
    }

    pub fn is_whitelisted(&self, client_key: &str) -> bool {
        self.whitelist.contains(client_key)
    }

    /// Decides whether `client_key` may attempt a login.
    ///
    /// Whitelisted clients are allowed without a store read. Storage errors
    /// are logged and allow the attempt.
    pub async fn can_attempt(&self, client_key: &str) -> AttemptDecision {
        if self.is_whitelisted(client_key) {
            return AttemptDecision::Allow;
        }

        let now = self.clock.now();
        match self.load(client_key).await {
            Ok(Some(record)) => match record.retry_after_secs(now) {
                Some(retry_after_secs) => {
                    metrics::record_login_denial();
                    tracing::debug!(client = client_key, retry_after_secs, "login attempt denied");
                    AttemptDecision::Deny { retry_after_secs }
                }
                None => AttemptDecision::Allow,
            },
            Ok(None) => AttemptDecision::Allow,
            Err(e) => {
                metrics::record_fail_open("attempts");
                tracing::warn!(
                    client = client_key,
                    error = %e,
                    "attempt lookup failed, allowing login attempt"
                );
                AttemptDecision::Allow
            }
        }
    }

    /// Records a failed login and returns the resulting decision.
    ///
    /// If the record cannot be read it is left untouched and the attempt is
    /// allowed, so a transient error never clobbers an active block.
    pub async fn record_failure(&self, client_key: &str) -> AttemptDecision {
        if self.is_whitelisted(client_key) {
            return AttemptDecision::Allow;
        }

        metrics::record_login_failure();
        let now = self.clock.now();
        let threshold = self.config.threshold;
        let block_duration = self.config.block_duration();

        let existing = match self.load(client_key).await {
            Ok(existing) => existing,
            Err(e) => {
                metrics::record_fail_open("attempts");
                tracing::warn!(
                    client = client_key,
                    error = %e,
                    "attempt lookup failed, failure not recorded"
                );
                return AttemptDecision::Allow;
            }
        };

        let (record, newly_blocked) = match existing {
            Some(mut record) if !record.episode_over(now, self.config.window()) => {
                let blocked = record.register_failure(now, threshold, block_duration);
                (record, blocked)
            }
            _ => {
                let mut record = LoginAttemptRecord::first_failure(now);
                let blocked = record.block_if_threshold_reached(now, threshold, block_duration);
                (record, blocked)
            }
        };

        if newly_blocked {
            metrics::record_login_block();
            tracing::warn!(
                client = client_key,
                attempts = record.attempt_count,
                block_secs = block_duration.as_secs(),
                "client blocked after repeated login failures"
            );
        }

        if let Err(e) = self.save(client_key, &record).await {
            tracing::warn!(client = client_key, error = %e, "failed to persist login failure");
        }

        match record.retry_after_secs(now) {
            Some(retry_after_secs) => AttemptDecision::Deny { retry_after_secs },
            None => AttemptDecision::Allow,
        }
    }

    /// Clears the client's record after a successful login.
    pub async fn record_success(&self, client_key: &str) {
        if let Err(e) = self.store.delete(&self.key(client_key)).await {
            tracing::warn!(client = client_key, error = %e, "failed to reset login attempts");
        }
    }

    /// Current record for a client, if any.
    pub async fn status(&self, client_key: &str) -> Option<LoginAttemptRecord> {
        match self.load(client_key).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(client = client_key, error = %e, "attempt lookup failed");
                None
            }
        }
    }

    /// Counts tracked and currently blocked clients. Reads every record;
    /// keep it off request paths.
    pub async fn stats(&self) -> AttemptStats {
        let backend_kind = self.store.backend_kind();
        let keys = match self.store.list_keys_by_prefix(&self.prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list attempt records");
                return AttemptStats {
                    backend_kind,
                    tracked_clients: 0,
                    blocked_clients: 0,
                };
            }
        };

        let now = self.clock.now();
        let mut blocked_clients = 0;
        for key in &keys {
            let client_key = &key[self.prefix.len()..];
            if let Ok(Some(record)) = self.load(client_key).await {
                if record.is_blocked(now) {
                    blocked_clients += 1;
                }
            }
        }

        AttemptStats {
            backend_kind,
            tracked_clients: keys.len(),
            blocked_clients,
        }
    }

    async fn load(&self, client_key: &str) -> StoreResult<Option<LoginAttemptRecord>> {
        let Some(raw) = self.store.get(&self.key(client_key)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(client = client_key, error = %e, "discarding unreadable attempt record");
                Ok(None)
            }
        }
    }

    async fn save(&self, client_key: &str, record: &LoginAttemptRecord) -> StoreResult<()> {
        let raw = serde_json::to_string(record)
            .map_err(|e| StoreError::operation("encode", e.to_string()))?;
        self.store
            .set_with_ttl(&self.key(client_key), &raw, self.config.record_ttl())
            .await
    }
}
