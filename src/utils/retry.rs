//! Retry policy for outbound fetches
//!
//! Failures are split in two classes with separate budgets:
//! unavailable responses (502/503) and everything else. The delay grows
//! linearly with the trial number.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::utils::error::FetchError;

/// Retry budgets and pacing of a site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed for unavailable responses
    #[serde(default = "default_retry_unavailable")]
    pub retry_unavailable: u32,

    /// Retries allowed for every other failure
    #[serde(default = "default_retry_error")]
    pub retry_error: u32,

    /// Base interval in milliseconds between trials
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_retry_unavailable() -> u32 {
    10
}

fn default_retry_error() -> u32 {
    3
}

fn default_interval_ms() -> u64 {
    1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_unavailable: default_retry_unavailable(),
            retry_error: default_retry_error(),
            interval_ms: default_interval_ms(),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            retry_unavailable: 0,
            retry_error: 0,
            interval_ms: 0,
        }
    }

    /// Sleep before the trial following `trial` (zero-based): `(trial + 1) * interval`
    pub fn calculate_delay(&self, trial: u32) -> Duration {
        Duration::from_millis(self.interval_ms.saturating_mul(u64::from(trial) + 1))
    }

    /// Whether a failure on the zero-based `trial` may be followed by another trial
    pub fn should_retry(&self, err: &FetchError, trial: u32) -> bool {
        if !err.is_recoverable() {
            return false;
        }

        let budget = if err.is_unavailable() {
            self.retry_unavailable
        } else {
            self.retry_error
        };

        trial < budget
    }
}
