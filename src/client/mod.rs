//! Resilient HTTP client shared by every request of a site
//!
//! This module wraps outbound fetches with:
//! - a bulkhead: one slot in the site limiter and one in the process-wide limiter per [`Permit`]
//! - a circuit breaker that pauses the site after repeated unavailable responses
//! - linear retry with separate budgets for unavailable responses and other failures
//! - decoding with the site's declared encoding
//! - optional rate limiting with governor

pub mod circuit_breaker;
pub mod decoder;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use decoder::Decoder;

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::Client;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SiteConfig;
use crate::utils::error::FetchError;
use crate::utils::retry::RetryPolicy;

/// Admission to send requests: one site slot and one process-wide slot
///
/// Both slots are returned when the permit is dropped.
#[derive(Debug)]
pub struct Permit {
    _site: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

impl Permit {
    /// Return both slots now
    pub fn release(self) {}
}

/// HTTP client with bulkhead, circuit breaker, retry and decoding
pub struct ResilientClient {
    site: String,

    /// HTTP client with configured timeout and compression
    client: Client,

    decoder: Decoder,
    breaker: CircuitBreaker,
    retry: RetryPolicy,

    /// Per-site concurrency limiter
    site_slots: Arc<Semaphore>,

    /// Process-wide concurrency limiter shared by every site
    global_slots: Arc<Semaphore>,

    cancel: CancellationToken,

    /// Optional rate limiter to control request frequency
    rate_limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl ResilientClient {
    /// Create a client for one site
    ///
    /// # Arguments
    ///
    /// * `site` - Site name used in logs
    /// * `config` - Site configuration
    /// * `global_slots` - Process-wide limiter shared by all sites
    /// * `cancel` - Token that aborts pending admissions and retry sleeps
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Decode` for an unknown encoding, or a network
    /// error if the HTTP client cannot be created
    pub fn new(
        site: impl Into<String>,
        config: &SiteConfig,
        global_slots: Arc<Semaphore>,
        cancel: CancellationToken,
    ) -> Result<Self, FetchError> {
        let site = site.into();

        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .gzip(true)
            .cookie_store(true)
            .build()?;

        let rate_limiter = config
            .rate_limit
            .filter(|rate| *rate > 0.0)
            .and_then(|rate| Quota::with_period(Duration::from_secs_f64(1.0 / rate)))
            .map(|quota| RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN)));

        Ok(Self {
            breaker: CircuitBreaker::new(
                site.clone(),
                config.circuit_breaker.threshold,
                config.circuit_breaker.cool_down(),
            ),
            site,
            client,
            decoder: Decoder::new(&config.decode_method)?,
            retry: config.retry,
            site_slots: Arc::new(Semaphore::new(config.max_threads.max(1))),
            global_slots,
            cancel,
            rate_limiter,
        })
    }

    /// Site this client belongs to
    pub fn site(&self) -> &str {
        &self.site
    }

    /// Circuit breaker of this site
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Free slots in the site limiter
    pub fn available_slots(&self) -> usize {
        self.site_slots.available_permits()
    }

    /// Wait for a site slot, then a process-wide slot
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Cancelled` if the crawl is cancelled while waiting
    pub async fn acquire(&self) -> Result<Permit, FetchError> {
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let site = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
            permit = Arc::clone(&self.site_slots).acquire_owned() => {
                permit.map_err(|_| FetchError::Cancelled)?
            }
        };

        let global = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
            permit = Arc::clone(&self.global_slots).acquire_owned() => {
                permit.map_err(|_| FetchError::Cancelled)?
            }
        };

        Ok(Permit {
            _site: site,
            _global: global,
        })
    }

    /// Fetch a page with circuit breaking and retry
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to fetch
    ///
    /// # Errors
    ///
    /// Returns the failure of the last trial once its retry budget is spent
    pub async fn get(&self, url: &str) -> Result<String, FetchError> {
        let mut trial = 0;

        loop {
            let err = match self.send_with_breaker(url).await {
                Ok(body) => return Ok(body),
                Err(err) => err,
            };

            if !self.retry.should_retry(&err, trial) {
                debug!(site = %self.site, url = %url, trial, error = %err, "Giving up request");
                return Err(err);
            }

            let delay = self.retry.calculate_delay(trial);
            debug!(
                site = %self.site,
                url = %url,
                trial,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying request after delay"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(err),
                _ = tokio::time::sleep(delay) => {}
            }

            trial += 1;
        }
    }

    /// Wait until any open cool-down has elapsed
    pub async fn close(&self) {
        self.breaker.wait_ready().await;
    }

    async fn send_with_breaker(&self, url: &str) -> Result<String, FetchError> {
        self.breaker.wait_ready().await;

        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let result = self.send(url).await;
        match &result {
            Err(err) if err.is_unavailable() => {
                warn!(site = %self.site, url = %url, error = %err, "Source unavailable");
                self.breaker.record_unavailable();
            }
            _ => self.breaker.record_other(),
        }

        result
    }

    async fn send(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(FetchError::EmptyBody);
        }

        self.decoder.decode(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(max_threads: usize, global: usize) -> (ResilientClient, Arc<Semaphore>) {
        let config = SiteConfig {
            max_threads,
            ..Default::default()
        };
        let global = Arc::new(Semaphore::new(global));
        let client =
            ResilientClient::new("test", &config, Arc::clone(&global), CancellationToken::new())
                .unwrap();
        (client, global)
    }

    #[tokio::test]
    async fn test_permit_holds_both_slots() {
        let (client, global) = client(2, 3);

        let permit = client.acquire().await.unwrap();
        assert_eq!(client.available_slots(), 1);
        assert_eq!(global.available_permits(), 2);

        permit.release();
        assert_eq!(client.available_slots(), 2);
        assert_eq!(global.available_permits(), 3);
    }

    #[tokio::test]
    async fn test_acquire_cancelled() {
        let config = SiteConfig {
            max_threads: 1,
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let client =
            ResilientClient::new("test", &config, Arc::new(Semaphore::new(1)), cancel.clone())
                .unwrap();

        let held = client.acquire().await.unwrap();
        let pending = client.acquire();
        cancel.cancel();

        assert!(matches!(pending.await, Err(FetchError::Cancelled)));
        drop(held);
        assert!(matches!(client.acquire().await, Err(FetchError::Cancelled)));
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let (client, _) = client(1, 1);
        let result = client.get("not a url").await;
        assert!(matches!(result, Err(FetchError::InvalidUrl(_))));
    }

    #[test]
    fn test_unknown_encoding() {
        let config = SiteConfig {
            decode_method: String::from("klingon"),
            ..Default::default()
        };
        let result = ResilientClient::new(
            "test",
            &config,
            Arc::new(Semaphore::new(1)),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(FetchError::Decode(_))));
    }
}
