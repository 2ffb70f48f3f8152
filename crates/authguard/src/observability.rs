//! Tracing setup for hosts without a subscriber of their own.
//!
//! Enabled through `logging.install_subscriber`, or called directly by the
//! host before building the guard.

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

/// Installs the global subscriber. Returns `false` when one is already set,
/// in which case `config` is ignored.
///
/// A parseable `RUST_LOG` overrides `config.level`.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let (filter, handle) = reload::Layer::new(filter);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(config.with_target))
        .try_init()
        .is_ok();

    if installed {
        let _ = FILTER_HANDLE.set(handle);
        tracing::debug!(level = %config.level, "tracing subscriber installed");
    }
    installed
}

/// Replaces the filter of the subscriber installed by [`init_tracing`].
///
/// Returns `false` when no such subscriber exists or `directives` do not
/// parse; the current filter is kept in both cases.
pub fn apply_logging_level(directives: &str) -> bool {
    let Some(handle) = FILTER_HANDLE.get() else {
        return false;
    };
    let Ok(filter) = EnvFilter::try_new(directives) else {
        tracing::warn!(directives, "ignoring invalid log filter");
        return false;
    };
    handle.reload(filter).is_ok()
}
