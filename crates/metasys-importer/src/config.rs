//! Importer timing configuration
//!
//! All values are in milliseconds and have serde defaults, so an empty
//! `[importer]` table is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ImporterError, ImporterResult};

/// Timings for token refresh, resubscription, reconnect and liveness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImporterConfig {
    /// Refresh/resubscribe this long before the token expires
    #[serde(default = "default_token_safety_margin")]
    pub token_safety_margin_ms: u64,
    /// A stream with no frame for this long is considered stalled
    #[serde(default = "default_liveness_threshold")]
    pub liveness_threshold_ms: u64,
    /// How often the liveness watchdog checks the stream
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_ms: u64,
    /// First reconnect delay
    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_backoff_ms: u64,
    /// Reconnect delay cap
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_backoff_ms: u64,
    /// First retry delay after a failed refresh or resubscription
    #[serde(default = "default_retry_initial")]
    pub retry_initial_backoff_ms: u64,
    /// Retry delay cap for refresh and resubscription
    #[serde(default = "default_retry_max")]
    pub retry_max_backoff_ms: u64,
    /// Poll trended samples on this interval; disabled when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend_poll_interval_ms: Option<u64>,
}

fn default_token_safety_margin() -> u64 {
    60_000
}

fn default_liveness_threshold() -> u64 {
    90_000
}

fn default_watchdog_interval() -> u64 {
    15_000
}

fn default_reconnect_initial() -> u64 {
    1_000
}

fn default_reconnect_max() -> u64 {
    60_000
}

fn default_retry_initial() -> u64 {
    5_000
}

fn default_retry_max() -> u64 {
    300_000
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            token_safety_margin_ms: default_token_safety_margin(),
            liveness_threshold_ms: default_liveness_threshold(),
            watchdog_interval_ms: default_watchdog_interval(),
            reconnect_initial_backoff_ms: default_reconnect_initial(),
            reconnect_max_backoff_ms: default_reconnect_max(),
            retry_initial_backoff_ms: default_retry_initial(),
            retry_max_backoff_ms: default_retry_max(),
            trend_poll_interval_ms: None,
        }
    }
}

impl ImporterConfig {
    pub fn token_safety_margin(&self) -> Duration {
        Duration::from_millis(self.token_safety_margin_ms)
    }

    pub fn liveness_threshold(&self) -> Duration {
        Duration::from_millis(self.liveness_threshold_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn reconnect_backoff(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.reconnect_initial_backoff_ms),
            Duration::from_millis(self.reconnect_max_backoff_ms),
        )
    }

    pub fn retry_backoff(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.retry_initial_backoff_ms),
            Duration::from_millis(self.retry_max_backoff_ms),
        )
    }

    pub fn trend_poll_interval(&self) -> Option<Duration> {
        self.trend_poll_interval_ms.map(Duration::from_millis)
    }

    /// Reject timings the importer can't run with
    pub fn validate(&self) -> ImporterResult<()> {
        if self.liveness_threshold_ms == 0 {
            return Err(ImporterError::Config(
                "liveness_threshold_ms must be greater than zero".into(),
            ));
        }
        if self.watchdog_interval_ms == 0 {
            return Err(ImporterError::Config(
                "watchdog_interval_ms must be greater than zero".into(),
            ));
        }
        if self.reconnect_initial_backoff_ms == 0
            || self.reconnect_max_backoff_ms < self.reconnect_initial_backoff_ms
        {
            return Err(ImporterError::Config(format!(
                "reconnect backoff must satisfy 0 < initial ({}) <= max ({})",
                self.reconnect_initial_backoff_ms, self.reconnect_max_backoff_ms
            )));
        }
        if self.retry_initial_backoff_ms == 0
            || self.retry_max_backoff_ms < self.retry_initial_backoff_ms
        {
            return Err(ImporterError::Config(format!(
                "retry backoff must satisfy 0 < initial ({}) <= max ({})",
                self.retry_initial_backoff_ms, self.retry_max_backoff_ms
            )));
        }
        if self.trend_poll_interval_ms == Some(0) {
            return Err(ImporterError::Config(
                "trend_poll_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
