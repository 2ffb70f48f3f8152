//! Guard configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! key_namespace = "authguard"
//!
//! [store]
//! remote_store_url = "redis://localhost:6379"
//!
//! [revocation]
//! default_ttl_secs = 604800
//!
//! [attempts]
//! threshold = 5
//! block_duration_secs = 900
//! window_secs = 900
//! whitelist = ["127.0.0.1", "::1"]
//! ```

use authguard_store::{MAX_TTL_SECS, StoreConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{GuardError, GuardResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Prefix for every key written to the store
    pub key_namespace: String,
    pub store: StoreConfig,
    pub revocation: RevocationConfig,
    pub attempts: AttemptConfig,
    pub logging: LoggingConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            key_namespace: "authguard".to_string(),
            store: StoreConfig::default(),
            revocation: RevocationConfig::default(),
            attempts: AttemptConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl GuardConfig {
    pub fn validate(&self) -> GuardResult<()> {
        if self.key_namespace.trim().is_empty() {
            return Err(GuardError::configuration("key_namespace must not be empty"));
        }
        self.store.validate()?;
        ensure_duration(
            "revocation.default_ttl_secs",
            self.revocation.default_ttl_secs,
            MAX_TTL_SECS,
        )?;
        if self.attempts.threshold == 0 {
            return Err(GuardError::configuration("attempts.threshold must be > 0"));
        }
        // Attempt records live for block + window, so each gets half the ceiling
        let attempt_max = MAX_TTL_SECS / 2;
        ensure_duration(
            "attempts.block_duration_secs",
            self.attempts.block_duration_secs,
            attempt_max,
        )?;
        ensure_duration("attempts.window_secs", self.attempts.window_secs, attempt_max)?;
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(GuardError::configuration(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        Ok(())
    }
}

/// Durations must be positive and fit the store's TTL ceiling.
fn ensure_duration(field: &str, secs: u64, max: u64) -> GuardResult<()> {
    if secs == 0 {
        return Err(GuardError::configuration(format!("{field} must be > 0")));
    }
    if secs > max {
        return Err(GuardError::configuration(format!("{field} must be <= {max}")));
    }
    Ok(())
}

/// Token revocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RevocationConfig {
    /// Lifetime of a revocation marker when no TTL is given. Should cover the
    /// longest-lived token type in play.
    pub default_ttl_secs: u64,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl RevocationConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// Login attempt throttling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttemptConfig {
    /// Failed attempts that trigger a block
    pub threshold: u32,

    /// How long a block lasts
    pub block_duration_secs: u64,

    /// Span after which failures without a block age out
    pub window_secs: u64,

    /// IP addresses or CIDR networks that are never throttled. Empty by
    /// default; whitelisting loopback is opt-in and meant for development
    /// configs.
    pub whitelist: Vec<String>,
}

impl Default for AttemptConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            block_duration_secs: 900,
            window_secs: 900,
            whitelist: Vec::new(),
        }
    }
}

impl AttemptConfig {
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs(self.block_duration_secs)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// TTL for attempt records, so records that never trigger a block
    /// still expire.
    pub fn record_ttl(&self) -> Duration {
        self.block_duration().saturating_add(self.window())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Include the event target (module path) in log lines
    pub with_target: bool,
    /// Install a global subscriber in `AuthGuard::from_config`. Off for
    /// hosts that set up tracing themselves.
    pub install_subscriber: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: true,
            install_subscriber: false,
        }
    }
}

pub mod loader {
    use super::GuardConfig;
    use crate::error::{GuardError, GuardResult};
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    /// Loads configuration from a TOML file plus `AUTHGUARD__*` environment
    /// overrides, then validates it.
    pub fn load_config(path: Option<&str>) -> GuardResult<GuardConfig> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                // Try default root-level file
                let default_path = PathBuf::from("authguard.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., AUTHGUARD__ATTEMPTS__THRESHOLD=10
        builder = builder.add_source(
            Environment::with_prefix("AUTHGUARD")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("attempts.whitelist"),
        );
        let cfg = builder
            .build()
            .map_err(|e| GuardError::configuration(format!("config build error: {e}")))?;
        let merged: GuardConfig = cfg
            .try_deserialize()
            .map_err(|e| GuardError::configuration(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_from_path<P: AsRef<Path>>(path: P) -> GuardResult<GuardConfig> {
        let p = path.as_ref().to_string_lossy().to_string();
        load_config(Some(&p))
    }
}
