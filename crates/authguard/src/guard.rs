//! Guard facade wiring both primitives to one store.

use authguard_store::{FallbackController, KvTtlStore, SharedClock, system_clock};
use serde::Serialize;

use crate::attempts::LoginAttemptTracker;
use crate::config::GuardConfig;
use crate::error::GuardResult;
use crate::observability;
use crate::revocation::TokenRevocationRegistry;

/// Whole-guard diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardStats {
    pub backend_kind: &'static str,
    /// Live keys under the guard's namespace, both primitives together
    pub approx_entry_count: usize,
    pub approx_blocked_count: usize,
}

/// Token revocation and login throttling over a shared store.
///
/// Both primitives write through the same [`FallbackController`], so they
/// switch to the local backend together.
#[derive(Clone)]
pub struct AuthGuard {
    store: FallbackController,
    revocations: TokenRevocationRegistry,
    attempts: LoginAttemptTracker,
    namespace_prefix: String,
}

impl AuthGuard {
    /// Builds and starts a guard from configuration.
    ///
    /// A configured remote store that cannot be reached does not fail this
    /// call; the guard comes up and demotes to local once reconnecting gives
    /// up.
    pub async fn from_config(config: &GuardConfig) -> GuardResult<Self> {
        config.validate()?;
        if config.logging.install_subscriber {
            observability::init_tracing(&config.logging);
        }
        let clock = system_clock();
        let store = FallbackController::from_config(&config.store, clock.clone());
        let guard = Self::with_controller(config, store, clock)?;
        guard.store.start().await;

        tracing::info!(
            namespace = %config.key_namespace,
            backend = guard.store.backend_kind(),
            "Auth guard started"
        );
        Ok(guard)
    }

    /// Builds a guard on an existing controller. The controller starts on
    /// first use.
    pub fn with_controller(
        config: &GuardConfig,
        store: FallbackController,
        clock: SharedClock,
    ) -> GuardResult<Self> {
        let namespace = config.key_namespace.as_str();
        let revocations = TokenRevocationRegistry::new(
            store.clone(),
            namespace,
            config.revocation.default_ttl(),
        );
        let attempts =
            LoginAttemptTracker::new(store.clone(), namespace, config.attempts.clone(), clock)?;

        Ok(Self {
            store,
            revocations,
            attempts,
            namespace_prefix: format!("{namespace}:"),
        })
    }

    pub fn revocations(&self) -> &TokenRevocationRegistry {
        &self.revocations
    }

    pub fn attempts(&self) -> &LoginAttemptTracker {
        &self.attempts
    }

    pub fn store(&self) -> &FallbackController {
        &self.store
    }

    pub fn backend_kind(&self) -> &'static str {
        self.store.backend_kind()
    }

    /// Scans the namespace and every attempt record. Meant for diagnostics
    /// endpoints, not request paths.
    pub async fn stats(&self) -> GuardStats {
        let approx_entry_count = match self.store.list_keys_by_prefix(&self.namespace_prefix).await
        {
            Ok(keys) => keys.len(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to count guard entries");
                0
            }
        };
        let attempts = self.attempts.stats().await;

        GuardStats {
            backend_kind: self.store.backend_kind(),
            approx_entry_count,
            approx_blocked_count: attempts.blocked_clients,
        }
    }

    /// Stops reconnect and sweep loops. The guard keeps answering from its
    /// current backend afterwards, without expiry sweeps.
    pub async fn shutdown(&self) {
        self.store.shutdown().await;
        tracing::info!("Auth guard stopped");
    }
}
