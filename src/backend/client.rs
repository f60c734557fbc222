//! Async HTTP fetcher with configurable politeness (minimum delay between requests).
//!
//! No retries: a failed request is returned to the caller as-is.

use crate::backend::{Error, FetchRequest, Fetcher, RawDocument, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; chapterdex/0.1; +https://github.com/chapterdex)";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DELAY_MS: u64 = 0;
const DEFAULT_MAX_REDIRECTS: usize = 10;

/// HTTP [Fetcher] backed by a reqwest client. One per backend, so delays are per site.
#[derive(Debug)]
pub struct HttpFetcher {
    inner: reqwest::Client,
    delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl HttpFetcher {
    /// Build a fetcher with default User-Agent, timeout, redirect limit and no delay.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> HttpFetcherBuilder {
        HttpFetcherBuilder::default()
    }

    /// Sleep until the configured delay has passed since the previous request, then claim the slot.
    async fn wait_delay(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<RawDocument> {
        if !self.delay.is_zero() {
            self.wait_delay().await;
        }
        let builder = match &request.form {
            Some(form) => self.inner.post(request.url.clone()).form(form),
            None => self.inner.get(request.url.clone()),
        };
        debug!(url = %request.url, post = request.form.is_some(), "http request");
        let response = builder.send().await.map_err(|e| Error::Transport {
            url: request.url.to_string(),
            source: Box::new(e),
        })?;

        let status = response.status();
        let final_url = response.url().clone();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: final_url.to_string(),
            });
        }
        let body = response.text().await.map_err(|e| Error::Transport {
            url: final_url.to_string(),
            source: Box::new(e),
        })?;
        debug!(url = %final_url, bytes = body.len(), "http response");
        Ok(RawDocument {
            url: final_url,
            body,
        })
    }
}

/// Builder for [HttpFetcher] with optional User-Agent, delay, timeout and redirect limit.
#[derive(Debug, Clone)]
pub struct HttpFetcherBuilder {
    user_agent: Option<String>,
    delay_ms: u64,
    timeout_secs: u64,
    max_redirects: usize,
}

impl Default for HttpFetcherBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            delay_ms: DEFAULT_DELAY_MS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

impl HttpFetcherBuilder {
    /// Set a custom User-Agent. If not set, a browser-like default is used.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Minimum delay between two requests of this fetcher, in milliseconds. Default 0.
    pub fn delay_ms(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Request timeout in seconds. Default 30.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Maximum redirects followed per request. Default 10; 0 disables redirects.
    pub fn max_redirects(mut self, n: usize) -> Self {
        self.max_redirects = n;
        self
    }

    pub fn build(self) -> Result<HttpFetcher> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let redirect = if self.max_redirects == 0 {
            reqwest::redirect::Policy::none()
        } else {
            reqwest::redirect::Policy::limited(self.max_redirects)
        };
        let inner = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .timeout(Duration::from_secs(self.timeout_secs))
            .redirect(redirect)
            .build()
            .map_err(|e| Error::Transport {
                url: String::new(),
                source: Box::new(e),
            })?;
        Ok(HttpFetcher {
            inner,
            delay: Duration::from_millis(self.delay_ms),
            last_request: Mutex::new(None),
        })
    }
}
