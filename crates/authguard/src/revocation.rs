//! Token revocation registry.
//!
//! Revoked tokens are tracked until they would have expired anyway, so
//! logout and refresh-token rotation take effect before a token's embedded
//! expiry. Signature and expiry checks stay the primary defense; this
//! registry only answers "was this token explicitly revoked".
//!
//! # Security Considerations
//!
//! - Tokens are stored as SHA-256 hashes, never in the clear
//! - Lookups fail open: a storage error reads as "not revoked"
//! - Markers self-expire; there is no permanent revocation record

use authguard_store::{FallbackController, KvTtlStore, StoreResult};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::Instrument;

use crate::metrics;

/// Marker value stored for a revoked token.
const REVOKED_MARKER: &str = "1";

/// Outcome of a bulk revocation.
///
/// Tokens are revoked one at a time with no atomicity across the set; a
/// storage failure midway leaves the remaining tokens un-revoked. Failures
/// are counted, not retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkRevocation {
    pub revoked: usize,
    pub failed: usize,
}

impl BulkRevocation {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Revocation registry diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevocationStats {
    pub backend_kind: &'static str,
    pub approx_size: usize,
}

/// Registry of revoked bearer and refresh tokens.
#[derive(Clone)]
pub struct TokenRevocationRegistry {
    store: FallbackController,
    default_ttl: Duration,
    prefix: String,
}

impl TokenRevocationRegistry {
    pub fn new(store: FallbackController, namespace: &str, default_ttl: Duration) -> Self {
        Self {
            store,
            default_ttl,
            prefix: format!("{namespace}:revoked:"),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn key(&self, token: &str) -> String {
        let digest = Sha256::digest(token.as_bytes());
        format!("{}{}", self.prefix, hex::encode(digest))
    }

    /// Revokes `token` for `ttl`, or for the default TTL when `None`.
    ///
    /// The error is returned for callers that want to report it; it has
    /// already been logged.
    pub async fn add_to_blacklist(&self, token: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let result = self
            .store
            .set_with_ttl(&self.key(token), REVOKED_MARKER, ttl)
            .await;

        metrics::record_revocation(result.is_ok());
        match &result {
            Ok(()) => tracing::debug!(ttl_secs = ttl.as_secs(), "token revoked"),
            Err(e) => tracing::warn!(
                error = %e,
                backend = self.store.backend_kind(),
                "failed to revoke token"
            ),
        }
        result
    }

    /// Whether `token` has been revoked and the revocation has not expired.
    ///
    /// Storage errors are logged and read as `false`.
    pub async fn is_revoked(&self, token: &str) -> bool {
        match self.store.get(&self.key(token)).await {
            Ok(marker) => {
                let revoked = marker.is_some();
                metrics::record_revocation_check(revoked);
                revoked
            }
            Err(e) => {
                metrics::record_fail_open("revocation");
                tracing::warn!(
                    error = %e,
                    backend = self.store.backend_kind(),
                    "revocation lookup failed, treating token as not revoked"
                );
                false
            }
        }
    }

    /// Revokes every token with the default TTL.
    pub async fn blacklist_many<I, T>(&self, tokens: I) -> BulkRevocation
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut outcome = BulkRevocation::default();
        for token in tokens {
            match self.add_to_blacklist(token.as_ref(), None).await {
                Ok(()) => outcome.revoked += 1,
                Err(_) => outcome.failed += 1,
            }
        }

        if !outcome.is_complete() {
            tracing::warn!(
                revoked = outcome.revoked,
                failed = outcome.failed,
                "bulk revocation incomplete"
            );
        }
        outcome
    }

    /// Revokes a user's tokens at logout.
    pub async fn revoke_user_tokens<I, T>(&self, user_id: &str, tokens: I) -> BulkRevocation
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let span = tracing::info_span!("revoke_user_tokens", user_id);
        async {
            let outcome = self.blacklist_many(tokens).await;
            tracing::info!(
                revoked = outcome.revoked,
                failed = outcome.failed,
                "user tokens revoked"
            );
            outcome
        }
        .instrument(span)
        .await
    }

    /// Counts live revocation markers. Scans the whole namespace; keep it
    /// off request paths.
    pub async fn stats(&self) -> RevocationStats {
        let approx_size = match self.store.list_keys_by_prefix(&self.prefix).await {
            Ok(keys) => keys.len(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to count revoked tokens");
                0
            }
        };

        RevocationStats {
            backend_kind: self.store.backend_kind(),
            approx_size,
        }
    }
}
