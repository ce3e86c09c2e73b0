//! Reconciler configuration.
//!
//! Timer and retry settings live here rather than in process-wide state so
//! tests can shrink them per instance. The TOML form spells durations as
//! integer milliseconds:
//!
//! ```toml
//! poll_interval_ms = 10000
//! initial_retry_interval_ms = 2000
//! max_retry_interval_ms = 120000
//! max_voters = 7
//! supports_spaces = false
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::replicaset::MAX_VOTERS;
use crate::ConfigError;

/// Default interval between passes when nothing changes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default first retry delay after a transient failure.
pub const DEFAULT_INITIAL_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Default ceiling for retry delays.
pub const DEFAULT_MAX_RETRY_INTERVAL: Duration = Duration::from_secs(120);

/// Settings for one reconciler instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// How often to re-check the replica set without a change notification.
    pub poll_interval: Duration,
    /// First delay when retrying a failed apply or publish.
    pub initial_retry_interval: Duration,
    /// Upper bound for retry delays.
    pub max_retry_interval: Duration,
    /// Most voting members allowed. Must be odd.
    pub max_voters: usize,
    /// Whether replication addresses are picked per network space.
    pub supports_spaces: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            initial_retry_interval: DEFAULT_INITIAL_RETRY_INTERVAL,
            max_retry_interval: DEFAULT_MAX_RETRY_INTERVAL,
            max_voters: MAX_VOTERS,
            supports_spaces: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    poll_interval_ms: u64,
    initial_retry_interval_ms: u64,
    max_retry_interval_ms: u64,
    max_voters: usize,
    supports_spaces: bool,
}

impl Default for RawConfig {
    fn default() -> Self {
        ReconcilerConfig::default().to_raw()
    }
}

impl ReconcilerConfig {
    /// Parses and validates a TOML document. Missing keys take defaults.
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(input)?;
        let cfg = Self {
            poll_interval: Duration::from_millis(raw.poll_interval_ms),
            initial_retry_interval: Duration::from_millis(raw.initial_retry_interval_ms),
            max_retry_interval: Duration::from_millis(raw.max_retry_interval_ms),
            max_voters: raw.max_voters,
            supports_spaces: raw.supports_spaces,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Renders this config as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&self.to_raw())?)
    }

    fn to_raw(&self) -> RawConfig {
        RawConfig {
            poll_interval_ms: self.poll_interval.as_millis() as u64,
            initial_retry_interval_ms: self.initial_retry_interval.as_millis() as u64,
            max_retry_interval_ms: self.max_retry_interval.as_millis() as u64,
            max_voters: self.max_voters,
            supports_spaces: self.supports_spaces,
        }
    }

    /// Checks the settings are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll interval must be positive".into()));
        }
        if self.initial_retry_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "initial retry interval must be positive".into(),
            ));
        }
        if self.initial_retry_interval > self.max_retry_interval {
            return Err(ConfigError::Invalid(format!(
                "initial retry interval {:?} exceeds max retry interval {:?}",
                self.initial_retry_interval, self.max_retry_interval
            )));
        }
        if self.max_voters == 0 || self.max_voters % 2 == 0 {
            return Err(ConfigError::Invalid(format!(
                "max voters must be odd and at least 1, got {}",
                self.max_voters
            )));
        }
        if self.max_voters > MAX_VOTERS {
            return Err(ConfigError::Invalid(format!(
                "max voters {} exceeds the store limit of {MAX_VOTERS}",
                self.max_voters
            )));
        }
        Ok(())
    }
}
