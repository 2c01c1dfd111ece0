//! Nullable HTTP: scripted responses, recorded requests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use taler_network::{HttpClient, HttpResponse, NetworkError};

/// A request seen by [`NullHttpClient`].
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub body: Option<serde_json::Value>,
}

/// An HTTP client that replays scripted responses per URL.
///
/// Responses queued for a URL are returned in order; the last one repeats
/// once the queue has a single entry left. Unscripted URLs answer 404.
#[derive(Default)]
pub struct NullHttpClient {
    scripts: Mutex<HashMap<String, VecDeque<Result<HttpResponse, NetworkError>>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl NullHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `url`.
    pub fn respond(&self, url: &str, response: HttpResponse) {
        self.push(url, Ok(response));
    }

    pub fn respond_json(&self, url: &str, status: u16, body: serde_json::Value) {
        self.respond(url, HttpResponse::json_body(status, &body));
    }

    /// Queue a transport failure for `url`.
    pub fn fail(&self, url: &str, error: NetworkError) {
        self.push(url, Err(error));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests().iter().filter(|r| r.url == url).count()
    }

    fn push(&self, url: &str, response: Result<HttpResponse, NetworkError>) {
        self.scripts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    fn next(
        &self,
        method: &'static str,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<HttpResponse, NetworkError> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(RecordedRequest {
                method,
                url: url.to_string(),
                body: body.cloned(),
            });
        let mut scripts = self.scripts.lock().unwrap_or_else(|p| p.into_inner());
        match scripts.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(404, ""))),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Ok(HttpResponse::new(404, ""))),
            None => Ok(HttpResponse::new(404, "")),
        }
    }
}

#[async_trait]
impl HttpClient for NullHttpClient {
    async fn get(&self, url: &str) -> Result<HttpResponse, NetworkError> {
        self.next("GET", url, None)
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<HttpResponse, NetworkError> {
        self.next("POST", url, Some(body))
    }
}
