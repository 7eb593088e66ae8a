//! Portal HTTP client: spaced, bounded GETs with retry on transient failures.

use std::time::Duration;

use anyhow::Context;
use djc_core::SourcePlatform;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

/// Whether a failed attempt is worth repeating.
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub retries: u32,
    pub initial_delay: Duration,
    pub delay_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            initial_delay: Duration::from_millis(500),
            delay_cap: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Doubling delay before retry number `retry` (0-based), capped at `delay_cap`.
    pub fn delay_before(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor).min(self.delay_cap)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub max_in_flight: usize,
    /// Minimum gap between the starts of two requests.
    pub min_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            max_in_flight: 2,
            min_interval: Duration::ZERO,
            retry: RetryPolicy::default(),
        }
    }
}

/// Hands out request start times at least `interval` apart.
#[derive(Debug)]
pub struct RequestSpacing {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RequestSpacing {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Waits for this caller's slot. Slots are reserved under the lock, so concurrent
    /// callers queue up instead of all firing when the gap elapses.
    pub async fn wait_turn(&self) {
        if self.interval.is_zero() {
            return;
        }
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next.map_or(now, |at| at.max(now));
            *next = Some(slot + self.interval);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed after {attempts} attempt(s): {source}")]
    Request {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered http {status} after {attempts} attempt(s)")]
    HttpStatus {
        status: u16,
        url: String,
        attempts: u32,
    },
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("http client is shutting down")]
    Closed,
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    in_flight: Semaphore,
    spacing: RequestSpacing,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().gzip(true).timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building portal http client")?;

        Ok(Self {
            client,
            in_flight: Semaphore::new(config.max_in_flight.max(1)),
            spacing: RequestSpacing::new(config.min_interval),
            retry: config.retry,
        })
    }

    /// GETs `url` and decodes the JSON body. The url carries the service key in its query
    /// string, so only [`redact_query`] output reaches logs and errors.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        run_id: Uuid,
        source: SourcePlatform,
        url: &str,
    ) -> Result<T, FetchError> {
        let span = info_span!(
            "portal_get",
            %run_id,
            source = source.as_str(),
            url = redact_query(url)
        );
        async {
            let _permit = self.in_flight.acquire().await.map_err(|_| FetchError::Closed)?;
            let body = self.get_with_retry(url).await?;
            serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
                url: redact_query(url).to_string(),
                source,
            })
        }
        .instrument(span)
        .await
    }

    async fn get_with_retry(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let safe_url = redact_query(url);
        let mut retry = 0;
        loop {
            self.spacing.wait_turn().await;
            let attempts = retry + 1;
            let transient = match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let body = resp.bytes().await.map_err(|err| FetchError::Request {
                        url: safe_url.to_string(),
                        attempts,
                        source: err.without_url(),
                    })?;
                    debug!(bytes = body.len(), attempts, "portal responded");
                    return Ok(body.to_vec());
                }
                Ok(resp) => {
                    let status = resp.status();
                    if !is_transient_status(status) || retry >= self.retry.retries {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: safe_url.to_string(),
                            attempts,
                        });
                    }
                    format!("http {}", status.as_u16())
                }
                Err(err) => {
                    if !is_transient_error(&err) || retry >= self.retry.retries {
                        return Err(FetchError::Request {
                            url: safe_url.to_string(),
                            attempts,
                            source: err.without_url(),
                        });
                    }
                    err.without_url().to_string()
                }
            };

            let delay = self.retry.delay_before(retry);
            warn!(
                reason = %transient,
                attempts,
                delay_ms = delay.as_millis() as u64,
                "retrying portal request"
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}

/// Strips the query string, where the service key lives.
pub fn redact_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}
