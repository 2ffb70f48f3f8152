//! Store error types.
//!
//! Errors are split by how the layers above react to them: connection errors
//! drive reconnect and eventually demotion to the local backend, operation
//! errors are reported to the caller only, configuration errors make the
//! controller start on the local backend.

/// Errors produced by key-value TTL store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The remote store is unreachable or the connection was lost.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection failure.
        message: String,
    },

    /// A single operation failed on an otherwise healthy connection.
    #[error("Operation error ({operation}): {message}")]
    Operation {
        /// The store operation that failed.
        operation: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// The store configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}

impl StoreError {
    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates an operation error for the given operation.
    pub fn operation(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Operation {
            operation,
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns `true` for errors that should trigger reconnection.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Short category label, used for metrics and structured logs.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Operation { .. } => "operation",
            Self::Configuration { .. } => "configuration",
        }
    }
}

/// Type alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;
