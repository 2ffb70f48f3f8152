//! Store configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{StoreError, StoreResult};

/// Longest TTL or interval accepted anywhere in the store: ten years.
pub const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// [`MAX_TTL_SECS`] as a `Duration`.
pub const MAX_TTL: Duration = Duration::from_secs(MAX_TTL_SECS);

/// Configuration for the fallback store.
///
/// # Example (TOML)
///
/// ```toml
/// [store]
/// remote_store_url = "redis://localhost:6379"
/// sweep_interval_secs = 300
///
/// [store.reconnect]
/// max_attempts = 10
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis connection URL. When absent the process runs on the local
    /// backend from startup.
    pub remote_store_url: Option<String>,

    /// Connection pool size
    pub pool_size: usize,

    /// Pool wait/create/recycle timeout in milliseconds
    pub timeout_ms: u64,

    /// Interval between local backend expiry sweeps
    pub sweep_interval_secs: u64,

    /// Reconnect policy for the remote backend
    pub reconnect: ReconnectConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            remote_store_url: None,
            pool_size: 10,
            timeout_ms: 5000,
            sweep_interval_secs: 300,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> StoreResult<()> {
        if let Some(url) = &self.remote_store_url {
            if url.trim().is_empty() {
                return Err(StoreError::configuration(
                    "store.remote_store_url must not be empty when set",
                ));
            }
            if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
                return Err(StoreError::configuration(
                    "store.remote_store_url must use the redis:// or rediss:// scheme",
                ));
            }
        }
        if self.pool_size == 0 {
            return Err(StoreError::configuration("store.pool_size must be > 0"));
        }
        if self.timeout_ms == 0 {
            return Err(StoreError::configuration("store.timeout_ms must be > 0"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(StoreError::configuration(
                "store.sweep_interval_secs must be > 0",
            ));
        }
        if self.sweep_interval_secs > MAX_TTL_SECS {
            return Err(StoreError::configuration(format!(
                "store.sweep_interval_secs must be <= {MAX_TTL_SECS}"
            )));
        }
        self.reconnect.validate()
    }
}

/// Exponential backoff policy used while the remote store is unreachable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Reconnect attempts after the initial connect before giving up
    pub max_attempts: u32,

    /// Delay before the first reconnect attempt, in milliseconds
    pub initial_backoff_ms: u64,

    /// Upper bound for the doubling delay, in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl ReconnectConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Delay that follows `current`, doubled and capped at the maximum.
    pub fn next_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_backoff())
    }

    fn validate(&self) -> StoreResult<()> {
        if self.initial_backoff_ms == 0 {
            return Err(StoreError::configuration(
                "store.reconnect.initial_backoff_ms must be > 0",
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(StoreError::configuration(
                "store.reconnect.max_backoff_ms must be >= initial_backoff_ms",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.remote_store_url.is_none());
        assert_eq!(config.sweep_interval(), Duration::from_secs(300));
        assert_eq!(config.reconnect.max_attempts, 10);
    }

    #[test]
    fn test_non_redis_url_fails_validation() {
        let config = StoreConfig {
            remote_store_url: Some("http://localhost:6379".to_string()),
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_sweep_interval_fails_validation() {
        let config = StoreConfig {
            sweep_interval_secs: 0,
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_sweep_interval_fails_validation() {
        let config = StoreConfig {
            sweep_interval_secs: u64::MAX,
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());

        let config = StoreConfig {
            sweep_interval_secs: MAX_TTL_SECS,
            ..StoreConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ReconnectConfig {
            max_attempts: 10,
            initial_backoff_ms: 500,
            max_backoff_ms: 3000,
        };

        let mut backoff = policy.initial_backoff();
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(backoff.as_millis());
            backoff = policy.next_backoff(backoff);
        }

        assert_eq!(seen, vec![500, 1000, 2000, 3000, 3000]);
    }
}
