//! Retry policies for polling waits

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Spacing, severity threshold and hard deadline of one wait
///
/// A policy is a plain value passed into every wait; tests build one with
/// millisecond values instead of overriding process-wide defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Time between two polls
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// How long an uninterrupted streak of errors lasts before it is reported as severe
    #[serde(with = "humantime_serde")]
    pub severe_threshold: Duration,

    /// Hard deadline for the whole wait
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl RetryPolicy {
    pub const fn new(interval: Duration, severe_threshold: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            severe_threshold,
            timeout,
        }
    }

    /// Defaults for extension resources: 5s / 30s / 3m
    pub const fn extension_default() -> Self {
        Self::new(
            Duration::from_secs(5),
            Duration::from_secs(30),
            Duration::from_secs(180),
        )
    }

    /// Defaults for ManagedResource bundles: 2s / 30s / 2m
    pub const fn bundle_default() -> Self {
        Self::new(
            Duration::from_secs(2),
            Duration::from_secs(30),
            Duration::from_secs(120),
        )
    }

    /// Defaults for migration waits: 5s / 30s / 3m
    pub const fn migration_default() -> Self {
        Self::extension_default()
    }

    /// Same policy with a different timeout
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Same policy with a different interval
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::extension_default()
    }
}
