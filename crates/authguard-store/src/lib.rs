//! # authguard-store
//!
//! Key-value TTL storage for the authguard security primitives.
//!
//! ## Architecture
//!
//! - **Distributed backend (Redis)**: shared across instances, native expiry
//! - **Local backend (DashMap)**: per-instance, lazy expiry plus periodic sweep
//! - **Fallback controller**: owns the active backend and demotes to local when
//!   the remote store stays unreachable
//!
//! ```text
//! caller → FallbackController → StoreBackend::Distributed → Redis
//!                             ↘ StoreBackend::Local       → DashMap
//! ```
//!
//! ## Graceful Degradation
//!
//! With no remote store configured the controller runs locally from startup.
//! When the remote store is lost, the distributed backend reconnects with
//! exponential backoff and the controller swaps to a local backend once the
//! attempts are exhausted.

pub mod backend;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod tasks;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{
    BackendMode, ConnectionState, DistributedBackend, KvTtlStore, LocalBackend, RedisConnection,
    RemoteConnection, StoreBackend,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock, system_clock};
pub use config::{MAX_TTL, MAX_TTL_SECS, ReconnectConfig, StoreConfig};
pub use controller::FallbackController;
pub use error::{StoreError, StoreResult};
pub use tasks::BackgroundTasks;
