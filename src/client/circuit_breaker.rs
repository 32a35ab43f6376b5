//! Circuit breaker for unavailable-class responses
//!
//! State machine `Closed -> Open { until } -> Closed`. Consecutive
//! unavailable responses open the breaker; every caller waits at
//! [`CircuitBreaker::wait_ready`] until the cool-down elapses. The
//! transition back to `Closed` happens lazily on the first caller that
//! observes the deadline has passed.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

/// Observable breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open { until: Instant },
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: usize,
}

/// Breaker shared by every request of one site
#[derive(Debug)]
pub struct CircuitBreaker {
    site: String,
    threshold: usize,
    cool_down: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(site: impl Into<String>, threshold: usize, cool_down: Duration) -> Self {
        Self {
            site: site.into(),
            threshold: threshold.max(1),
            cool_down,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state, without applying a pending transition
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Current consecutive unavailable counter
    pub fn failures(&self) -> usize {
        self.lock().failures
    }

    /// Wait until the breaker is closed
    pub async fn wait_ready(&self) {
        loop {
            let until = {
                let mut inner = self.lock();
                match inner.state {
                    BreakerState::Closed => return,
                    BreakerState::Open { until } if Instant::now() >= until => {
                        inner.state = BreakerState::Closed;
                        inner.failures = inner.failures.min(self.threshold / 2);
                        info!(
                            site = %self.site,
                            failures = inner.failures,
                            "Circuit breaker closed"
                        );
                        return;
                    }
                    BreakerState::Open { until } => until,
                }
            };

            tokio::time::sleep_until(until).await;
        }
    }

    /// Record an unavailable response; opens the breaker at the threshold
    pub fn record_unavailable(&self) {
        let mut inner = self.lock();
        inner.failures += 1;

        if inner.failures >= self.threshold && inner.state == BreakerState::Closed {
            let until = Instant::now() + self.cool_down;
            inner.state = BreakerState::Open { until };
            warn!(
                site = %self.site,
                failures = inner.failures,
                cool_down_secs = self.cool_down.as_secs(),
                "Circuit breaker opened"
            );
        }
    }

    /// Record any other outcome; resets the counter
    pub fn record_other(&self) {
        self.lock().failures = 0;
    }
}
