//! Remote CRUD + long-polling probe client: the HTTP surface a listening
//! manager and the public facade both call into.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::AuthSession;
use crate::codec::{ListenEntry, decode_changed_keys, encode_listening_configs};
use crate::error::{ClientError, Result};
use crate::metrics::{MetricsMonitor, Timer};
use crate::model::{ConfigData, ConfigKey, compute_md5, unix_millis_now};
use crate::transport::{RawRequest, Transport, status_is_transient};

const CLIENT_VERSION: &str = "nacos-config-client/0.1.0";

/// Exponential backoff for a transient-failure retry: `base * 2^(attempt-1)`,
/// with up to +/-10% jitter so concurrent clients retrying the same outage
/// don't all land on the server in lockstep.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let base_ms = base.as_millis() as f64 * 2f64.powi(attempt as i32 - 1);
    let jitter_range = base_ms * 0.1;
    let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
    Duration::from_millis((base_ms + jitter).max(0.0) as u64)
}

/// One watched key together with the content MD5 last observed for it.
pub struct WatchEntry<'a> {
    pub key: &'a ConfigKey,
    pub md5: &'a str,
}

/// Thin wrapper over `Transport` adding Nacos CRUD/probe semantics: common
/// headers, per-request auth injection, and status-aware retry.
pub struct RemoteClient {
    transport: Transport,
    auth: Arc<AuthSession>,
    server_addresses: Vec<String>,
    /// The client's configured tenant, used as the probe endpoint's query-string
    /// `tenant` (the per-entry tenant already rides inside `Listening-Configs`).
    namespace: String,
    default_timeout: Duration,
    long_polling_timeout: Duration,
    max_retry: u32,
    retry_delay: Duration,
    metrics: Arc<MetricsMonitor>,
}

impl RemoteClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Transport,
        auth: Arc<AuthSession>,
        server_addresses: Vec<String>,
        namespace: String,
        default_timeout_ms: u64,
        long_polling_timeout_ms: u64,
        max_retry: u32,
        retry_delay_ms: u64,
        metrics: Arc<MetricsMonitor>,
    ) -> Self {
        Self {
            transport,
            auth,
            server_addresses,
            namespace,
            default_timeout: Duration::from_millis(default_timeout_ms),
            long_polling_timeout: Duration::from_millis(long_polling_timeout_ms),
            max_retry,
            retry_delay: Duration::from_millis(retry_delay_ms),
            metrics,
        }
    }

    fn common_headers(&self) -> Vec<(String, String)> {
        let ts = unix_millis_now().to_string();
        vec![
            ("Client-Version".to_string(), CLIENT_VERSION.to_string()),
            ("Client-RequestTS".to_string(), ts.clone()),
            ("Client-RequestToken".to_string(), compute_md5(&ts)),
            (
                "Request-Id".to_string(),
                Uuid::new_v4().simple().to_string(),
            ),
            ("Accept-Charset".to_string(), "UTF-8".to_string()),
            ("exConfigInfo".to_string(), "true".to_string()),
        ]
    }

    async fn ensure_authenticated(&self) {
        self.auth.ensure_authenticated(&self.server_addresses).await;
    }

    /// Fetch a config's content and MD5 from the server. `Ok(None)` means
    /// the server returned 404 — the config does not exist (or was just
    /// deleted) — which callers must not confuse with a config that exists
    /// but happens to hold empty content.
    pub async fn get_config(&self, key: &ConfigKey) -> Result<Option<ConfigData>> {
        self.ensure_authenticated().await;
        let timer = Timer::start(&self.metrics, "get_config");

        let mut attempt = 0;
        let result: Result<Option<ConfigData>> = loop {
            let mut req = RawRequest::new(Method::GET, "/v1/cs/configs", self.default_timeout)
                .with_query(vec![
                    ("dataId".to_string(), key.data_id.clone()),
                    ("group".to_string(), key.group.clone()),
                    ("tenant".to_string(), key.tenant.clone()),
                ])
                .with_header("notify", "false");
            for (name, value) in self.common_headers() {
                req = req.with_header(name, value);
            }
            let auth_headers = self.auth.apply_to_request();
            for (name, value) in auth_headers.headers {
                req = req.with_header(name, value);
            }
            req = req.with_query(
                self.auth
                    .apply_to_parameters(&key.tenant, &key.group)
                    .query,
            );

            let response = match self.transport.send(&req).await {
                Ok(response) => response,
                Err(e) => break Err(e),
            };

            if response.status == 404 {
                break Ok(None);
            }
            if response.status == 403 {
                break Err(ClientError::Unauthorized);
            }
            if response.is_success() {
                let content = response.text();
                break Ok(Some(ConfigData::new(content)));
            }
            if status_is_transient(response.status) && attempt < self.max_retry {
                attempt += 1;
                warn!(status = response.status, attempt, "retrying get_config");
                tokio::time::sleep(backoff_delay(self.retry_delay, attempt)).await;
                continue;
            }
            break Err(ClientError::Remote {
                status: response.status,
                message: response.text(),
            });
        };

        record_outcome(timer, &result);
        result
    }

    /// Publish content under a key, creating or overwriting it.
    ///
    /// Returns `Ok(true)` on 200, `Err(Unauthorized)` on 403. Any other
    /// non-retryable non-2xx status is logged and yields `Ok(false)` rather
    /// than a surfaced error, matching the public `PublishConfigAsync → bool`
    /// contract.
    pub async fn publish_config(
        &self,
        key: &ConfigKey,
        content: &str,
        content_type: &str,
    ) -> Result<bool> {
        self.ensure_authenticated().await;
        let timer = Timer::start(&self.metrics, "publish_config");

        let mut attempt = 0;
        let result: Result<bool> = loop {
            let mut req = RawRequest::new(Method::POST, "/v1/cs/configs", self.default_timeout)
                .with_form(vec![
                    ("dataId".to_string(), key.data_id.clone()),
                    ("group".to_string(), key.group.clone()),
                    ("tenant".to_string(), key.tenant.clone()),
                    ("content".to_string(), content.to_string()),
                    ("type".to_string(), content_type.to_string()),
                ]);
            for (name, value) in self.common_headers() {
                req = req.with_header(name, value);
            }
            let auth_headers = self.auth.apply_to_request();
            for (name, value) in auth_headers.headers {
                req = req.with_header(name, value);
            }
            req = req.with_query(
                self.auth
                    .apply_to_parameters(&key.tenant, &key.group)
                    .query,
            );

            let response = match self.transport.send(&req).await {
                Ok(response) => response,
                Err(e) => break Err(e),
            };

            if response.status == 403 {
                break Err(ClientError::Unauthorized);
            }
            if response.is_success() {
                break Ok(true);
            }
            if status_is_transient(response.status) && attempt < self.max_retry {
                attempt += 1;
                warn!(status = response.status, attempt, "retrying publish_config");
                tokio::time::sleep(backoff_delay(self.retry_delay, attempt)).await;
                continue;
            }
            warn!(
                status = response.status,
                message = %response.text(),
                "publish_config rejected by server"
            );
            break Ok(false);
        };

        record_outcome(timer, &result);
        result
    }

    /// Delete a key server-side.
    ///
    /// Returns `Ok(true)` on 200 or 404 (already gone), `Err(Unauthorized)`
    /// on 403. Any other non-retryable non-2xx status is logged and yields
    /// `Ok(false)` rather than a surfaced error, matching the public
    /// `RemoveConfigAsync → bool` contract.
    pub async fn remove_config(&self, key: &ConfigKey) -> Result<bool> {
        self.ensure_authenticated().await;
        let timer = Timer::start(&self.metrics, "remove_config");

        let mut attempt = 0;
        let result: Result<bool> = loop {
            let mut req = RawRequest::new(Method::DELETE, "/v1/cs/configs", self.default_timeout)
                .with_query(vec![
                    ("dataId".to_string(), key.data_id.clone()),
                    ("group".to_string(), key.group.clone()),
                    ("tenant".to_string(), key.tenant.clone()),
                ]);
            for (name, value) in self.common_headers() {
                req = req.with_header(name, value);
            }
            let auth_headers = self.auth.apply_to_request();
            for (name, value) in auth_headers.headers {
                req = req.with_header(name, value);
            }
            req = req.with_query(
                self.auth
                    .apply_to_parameters(&key.tenant, &key.group)
                    .query,
            );

            let response = match self.transport.send(&req).await {
                Ok(response) => response,
                Err(e) => break Err(e),
            };

            if response.status == 403 {
                break Err(ClientError::Unauthorized);
            }
            if response.is_success() || response.status == 404 {
                break Ok(true);
            }
            if status_is_transient(response.status) && attempt < self.max_retry {
                attempt += 1;
                warn!(status = response.status, attempt, "retrying remove_config");
                tokio::time::sleep(backoff_delay(self.retry_delay, attempt)).await;
                continue;
            }
            warn!(
                status = response.status,
                message = %response.text(),
                "remove_config rejected by server"
            );
            break Ok(false);
        };

        record_outcome(timer, &result);
        result
    }

    /// Long-poll the server for changes among `entries`; returns the keys
    /// the server reports changed. The HTTP timeout is `long_polling_timeout
    /// * 1.5`, giving the server time to respond within its own hold window.
    pub async fn listen_config_changes(&self, entries: &[WatchEntry<'_>]) -> Result<Vec<ConfigKey>> {
        self.ensure_authenticated().await;
        let timer = Timer::start(&self.metrics, "listen_config_changes");

        let result = self.listen_config_changes_once(entries).await;
        match &result {
            Ok(changed) => {
                self.metrics.record_probe_cycle(if changed.is_empty() {
                    "unchanged"
                } else {
                    "changed"
                });
            }
            Err(_) => self.metrics.record_probe_cycle("error"),
        }
        record_outcome(timer, &result);
        result
    }

    async fn listen_config_changes_once(&self, entries: &[WatchEntry<'_>]) -> Result<Vec<ConfigKey>> {
        let listen_entries: Vec<ListenEntry<'_>> = entries
            .iter()
            .map(|e| ListenEntry {
                key: e.key,
                md5: e.md5,
            })
            .collect();
        let listening_configs = encode_listening_configs(&listen_entries);

        let probe_timeout = self.long_polling_timeout.mul_f64(1.5);
        let mut req = RawRequest::new(
            Method::POST,
            "/v1/cs/configs/listener",
            probe_timeout,
        )
        .with_form(vec![(
            "Listening-Configs".to_string(),
            listening_configs,
        )])
        .with_query(vec![("tenant".to_string(), self.namespace.clone())])
        .with_header(
            "Long-Pulling-Timeout",
            self.long_polling_timeout.as_millis().to_string(),
        );
        for (name, value) in self.common_headers() {
            req = req.with_header(name, value);
        }
        // The server reads authorization from the query string on this
        // endpoint only — the bearer token and AK/SK signature must not go
        // into headers or the form body here, unlike every other endpoint.
        req = req.with_query(self.auth.apply_to_parameters(&self.namespace, "").query);

        debug!(count = entries.len(), "probing for config changes");
        let response = self.transport.send(&req).await?;

        if response.status == 403 {
            return Err(ClientError::Unauthorized);
        }
        if !response.is_success() {
            return Err(ClientError::Remote {
                status: response.status,
                message: response.text(),
            });
        }

        Ok(decode_changed_keys(&response.text()))
    }
}

/// Record a request's outcome against its latency timer, classifying
/// errors by variant for the failed-request counter's `error_type` label.
fn record_outcome<T>(timer: Timer<'_>, result: &Result<T>) {
    match result {
        Ok(_) => timer.success(),
        Err(e) => timer.failure(error_kind(e)),
    }
}

fn error_kind(err: &ClientError) -> &'static str {
    match err {
        ClientError::Configuration(_) => "configuration",
        ClientError::Validation(_) => "validation",
        ClientError::Unauthorized => "unauthorized",
        ClientError::Remote { .. } => "remote",
        ClientError::Transport(_) => "transport",
        ClientError::Canceled => "canceled",
        ClientError::Other(_) => "other",
    }
}
