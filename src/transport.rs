//! Single-call transport: pick a server, dispatch over HTTP, record health.
//!
//! The underlying HTTP capability is abstracted behind `HttpSender` so tests
//! can substitute a fake without a real socket. `ReqwestSender` is the
//! production implementation, holding one pooled `reqwest::Client`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use tracing::{debug, warn};

use crate::error::{ClientError, Result};
use crate::server_pool::ServerPool;

/// A request ready to be dispatched, with the server address not yet filled in.
#[derive(Clone, Debug)]
pub struct RawRequest {
    pub method: Method,
    /// Path beginning with `/`, relative to `{server}/{contextPath}`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub form: Option<Vec<(String, String)>>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl RawRequest {
    pub fn new(method: Method, path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            form: None,
            headers: Vec::new(),
            timeout,
        }
    }

    pub fn with_query(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.query.extend(pairs);
        self
    }

    pub fn with_form(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.form = Some(self.form.unwrap_or_default());
        self.form.as_mut().unwrap().extend(pairs);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Response returned by a send, regardless of status code.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The HTTP capability: send one fully-addressed request, honoring cancellation.
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn send(&self, url: &str, req: &RawRequest) -> std::result::Result<RawResponse, reqwest::Error>;
}

/// Production sender backed by a single pooled `reqwest::Client`.
pub struct ReqwestSender {
    client: reqwest::Client,
}

impl ReqwestSender {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
        })
    }
}

#[async_trait]
impl HttpSender for ReqwestSender {
    async fn send(&self, url: &str, req: &RawRequest) -> std::result::Result<RawResponse, reqwest::Error> {
        let mut builder = self.client.request(req.method.clone(), url).timeout(req.timeout);

        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(form) = &req.form {
            builder = builder.form(form);
        }
        for (name, value) in &req.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok(RawResponse { status, body })
    }
}

/// Dispatches one request at a time through the server pool, classifying
/// the outcome to drive server health tracking.
pub struct Transport {
    pool: Arc<ServerPool>,
    sender: Arc<dyn HttpSender>,
    context_path: String,
}

impl Transport {
    pub fn new(pool: Arc<ServerPool>, sender: Arc<dyn HttpSender>, context_path: &str) -> Self {
        Self {
            pool,
            sender,
            context_path: context_path.trim_matches('/').to_string(),
        }
    }

    /// Pick a server, send, classify, and return the raw response even on
    /// non-2xx status — only transport-level failures become `Err`.
    pub async fn send(&self, req: &RawRequest) -> Result<RawResponse> {
        let server = self.pool.select();
        let url = format!("{}/{}{}", server, self.context_path, req.path);
        debug!(url = %url, "dispatching request");

        match self.sender.send(&url, req).await {
            Ok(response) => {
                match response.status {
                    500 | 502 | 503 => {
                        self.pool.mark_failed(&server);
                    }
                    _ => {
                        self.pool.mark_healthy(&server);
                    }
                }
                Ok(response)
            }
            Err(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    self.pool.mark_failed(&server);
                }
                warn!(server = %server, error = %e, "transport send failed");
                Err(ClientError::Transport(e))
            }
        }
    }
}

pub fn status_is_transient(status: u16) -> bool {
    matches!(status, 500 | 502 | 503) || status == StatusCode::TOO_MANY_REQUESTS.as_u16()
}
