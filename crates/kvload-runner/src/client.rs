//! HTTP transport to the KV cache gateway.

use async_trait::async_trait;
use kvload_core::{CoreError, CoreResult, RunConfig};
use reqwest::{Client, RequestBuilder, Url};
use serde::Serialize;
use std::time::{Duration, Instant};

/// What came back from one HTTP call.
///
/// Transport failures are data: `status` is `None` and `error` says why.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpOutcome {
    pub status: Option<u16>,
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl HttpOutcome {
    #[must_use]
    pub fn status(status: u16, elapsed: Duration) -> Self {
        Self {
            status: Some(status),
            elapsed,
            error: None,
        }
    }

    #[must_use]
    pub fn transport_error(error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            status: None,
            elapsed,
            error: Some(error.into()),
        }
    }

    /// Whether the call got one of the `expected` statuses.
    #[must_use]
    pub fn is_one_of(&self, expected: &[u16]) -> bool {
        self.status.is_some_and(|status| expected.contains(&status))
    }
}

/// Operations the scenarios need from the gateway.
#[async_trait]
pub trait KvTransport: Send + Sync {
    /// `GET /ping`
    async fn ping(&self) -> HttpOutcome;

    /// `PUT /kv/{key}` with `{"value": .., "ttl": ms}`
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> HttpOutcome;

    /// `GET /kv/{key}`
    async fn get(&self, key: &str) -> HttpOutcome;
}

#[derive(Serialize)]
struct PutBody<'a> {
    value: &'a str,
    ttl: u64,
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpKvClient {
    client: Client,
    base: Url,
}

impl HttpKvClient {
    pub fn new(base_url: &str, timeout: Duration) -> CoreResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| CoreError::validation(format!("invalid base_url `{base_url}`: {e}")))?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(CoreError::validation(format!(
                "base_url `{base_url}` cannot carry request paths"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, base })
    }

    pub fn from_config(config: &RunConfig) -> CoreResult<Self> {
        Self::new(&config.base_url, config.request_timeout)
    }

    /// `base` with `segments` appended, each percent-encoded as one segment.
    fn url_for(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // Only fails for cannot-be-a-base URLs, rejected in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn kv_url(&self, key: &str) -> Url {
        self.url_for(&["kv", key])
    }

    async fn send(request: RequestBuilder) -> HttpOutcome {
        let started = Instant::now();
        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                // Read the body so the connection can be reused.
                let body = response.bytes().await;
                let elapsed = started.elapsed();
                match body {
                    Ok(_) => HttpOutcome::status(status, elapsed),
                    Err(e) => HttpOutcome::transport_error(e.to_string(), elapsed),
                }
            }
            Err(e) => HttpOutcome::transport_error(e.to_string(), started.elapsed()),
        }
    }
}

#[async_trait]
impl KvTransport for HttpKvClient {
    async fn ping(&self) -> HttpOutcome {
        Self::send(self.client.get(self.url_for(&["ping"]))).await
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> HttpOutcome {
        let body = PutBody {
            value,
            ttl: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        };
        Self::send(self.client.put(self.kv_url(key)).json(&body)).await
    }

    async fn get(&self, key: &str) -> HttpOutcome {
        Self::send(self.client.get(self.kv_url(key))).await
    }
}
