//! Guard error types.
//!
//! Storage failures on the request path never reach callers as errors; they
//! are logged and turned into the permissive answer. These errors cover
//! setup: loading and validating configuration.

use authguard_store::StoreError;

/// Errors that can occur while building an [`AuthGuard`](crate::AuthGuard).
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// The configuration could not be loaded or is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// A whitelist entry is neither an IP address nor a CIDR network.
    #[error("Invalid whitelist entry '{entry}': {message}")]
    InvalidWhitelistEntry {
        /// The offending entry.
        entry: String,
        /// Parser message.
        message: String,
    },

    /// The store configuration was rejected.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GuardError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Type alias for guard setup results.
pub type GuardResult<T> = Result<T, GuardError>;
