//! Login-attempt throttling and token revocation.
//!
//! Two security primitives for an authentication service, sharing a TTL
//! key-value store:
//!
//! - [`TokenRevocationRegistry`]: marks tokens as revoked until their natural
//!   expiry
//! - [`LoginAttemptTracker`]: blocks client addresses after repeated failed
//!   logins
//!
//! The store is Redis when configured and reachable, and an in-process map
//! otherwise. When Redis is lost for good the guard switches to the local
//! map and keeps serving; see [`authguard_store::FallbackController`].
//!
//! Storage problems never fail a request. Lookups that cannot reach storage
//! answer "not revoked" and "allowed".
//!
//! # Example
//!
//! ```no_run
//! use authguard::{AttemptDecision, AuthGuard, GuardConfig};
//!
//! # async fn run() -> authguard::GuardResult<()> {
//! let guard = AuthGuard::from_config(&GuardConfig::default()).await?;
//!
//! let client = authguard::resolve_client_key(Some("203.0.113.7"), None, None);
//! if let AttemptDecision::Deny { retry_after_secs } = guard.attempts().can_attempt(&client).await {
//!     println!("retry in {retry_after_secs}s");
//! }
//!
//! guard.revocations().add_to_blacklist("refresh-token", None).await.ok();
//! assert!(guard.revocations().is_revoked("refresh-token").await);
//! # Ok(())
//! # }
//! ```

pub mod attempts;
pub mod client;
pub mod config;
pub mod error;
pub mod guard;
pub mod metrics;
pub mod observability;
pub mod revocation;

pub use attempts::{AttemptDecision, AttemptStats, LoginAttemptRecord, LoginAttemptTracker};
pub use client::{UNKNOWN_CLIENT, Whitelist, normalize_client_key, resolve_client_key};
pub use config::{AttemptConfig, GuardConfig, LoggingConfig, RevocationConfig};
pub use error::{GuardError, GuardResult};
pub use guard::{AuthGuard, GuardStats};
pub use revocation::{BulkRevocation, RevocationStats, TokenRevocationRegistry};

pub use authguard_store::{BackendMode, FallbackController, StoreConfig, StoreError};
