use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::config::{RATE_LIMIT_MAX_CONCURRENCY, RATE_LIMIT_PER_SEC, RETRY_BACKOFF_MS};
use crate::error::Result;

type DirectLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Thin abstraction over the venue HTTP API: `get(path, params) -> parsed JSON`.
/// Rate limiting, bounded concurrency and retry live entirely behind this trait
/// so the catalog walker and tick collector never see a raw `reqwest::Client`.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value>;
}

/// Production client: token-bucket rate limiting (reservoir/refill
/// `RATE_LIMIT_PER_SEC`), a semaphore bounding simultaneous in-flight
/// requests to `RATE_LIMIT_MAX_CONCURRENCY`, and at most one retry after a
/// fixed backoff for connect timeouts or 5xx responses.
pub struct VenueClient {
    http: reqwest::Client,
    base_url: String,
    limiter: Arc<DirectLimiter>,
    concurrency: Arc<Semaphore>,
}

impl VenueClient {
    pub fn new(base_url: String) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(RATE_LIMIT_PER_SEC).unwrap());
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builds"),
            base_url,
            limiter: Arc::new(RateLimiter::direct(quota)),
            concurrency: Arc::new(Semaphore::new(RATE_LIMIT_MAX_CONCURRENCY)),
        }
    }
}

#[async_trait]
impl UpstreamClient for VenueClient {
    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        self.limiter.until_ready().await;
        let _permit = self
            .concurrency
            .acquire()
            .await
            .expect("semaphore is never closed");

        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u8;

        loop {
            attempt += 1;
            let sent = self.http.get(&url).query(params).send().await;

            match sent {
                Ok(resp) if resp.status().is_server_error() && attempt == 1 => {
                    warn!(status = %resp.status(), path, "upstream 5xx, retrying once");
                    tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS)).await;
                }
                Ok(resp) => {
                    let value: Value = resp.json().await?;
                    return Ok(value);
                }
                Err(e) if attempt == 1 && (e.is_timeout() || e.is_connect()) => {
                    warn!(error = %e, path, "upstream connect/timeout, retrying once");
                    tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
