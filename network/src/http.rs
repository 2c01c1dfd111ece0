//! HTTP GET/POST abstraction.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::throttle::RequestThrottler;
use crate::NetworkError;

/// Status and body of an HTTP response. Non-2xx statuses are not errors at
/// this layer; protocol code decides what they mean.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json_body(status: u16, body: &serde_json::Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, NetworkError> {
        serde_json::from_str(&self.body).map_err(|e| {
            NetworkError::InvalidResponse(format!("HTTP {}: {}", self.status, e))
        })
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse, NetworkError>;

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<HttpResponse, NetworkError>;
}

/// HTTP client backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestHttpClient {
    http: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, NetworkError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                NetworkError::ConnectionFailed(format!("failed to create HTTP client: {e}"))
            })?;
        Ok(Self { http })
    }
}

fn map_reqwest_error(url: &str, e: reqwest::Error) -> NetworkError {
    if e.is_timeout() {
        NetworkError::Timeout(url.to_string())
    } else if e.is_builder() {
        NetworkError::InvalidUrl(format!("{url}: {e}"))
    } else {
        NetworkError::ConnectionFailed(format!("{url}: {e}"))
    }
}

async fn read_response(url: &str, response: reqwest::Response) -> Result<HttpResponse, NetworkError> {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| map_reqwest_error(url, e))?;
    trace!(url, status, len = body.len(), "HTTP response");
    Ok(HttpResponse { status, body })
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str) -> Result<HttpResponse, NetworkError> {
        debug!(url, "GET");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;
        read_response(url, response).await
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<HttpResponse, NetworkError> {
        debug!(url, "POST");
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;
        read_response(url, response).await
    }
}

/// Consults a [`RequestThrottler`] before every request of the inner client.
pub struct ThrottledHttpClient<C> {
    inner: C,
    throttler: Mutex<RequestThrottler>,
}

impl<C: HttpClient> ThrottledHttpClient<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            throttler: Mutex::new(RequestThrottler::new()),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn throttle(&self, url: &str) -> Result<(), NetworkError> {
        let mut throttler = self
            .throttler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        throttler.apply_throttle(url)
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ThrottledHttpClient<C> {
    async fn get(&self, url: &str) -> Result<HttpResponse, NetworkError> {
        self.throttle(url)?;
        self.inner.get(url).await
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<HttpResponse, NetworkError> {
        self.throttle(url)?;
        self.inner.post_json(url, body).await
    }
}
