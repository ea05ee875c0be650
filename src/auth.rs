//! Authentication session: the `None` / username-password / signed (AK/SK)
//! variants, dispatched as a sealed enum rather than a `dyn Trait` object —
//! the variant set is closed at construction time from `NacosConfigOptions`.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::model::{TokenInfo, unix_millis_now};
use crate::options::NacosConfigOptions;

type HmacSha1 = Hmac<sha1::Sha1>;

const LOGIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Where an auth session places its credentials on an outbound request.
pub struct AuthParams {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
}

impl AuthParams {
    fn empty() -> Self {
        Self {
            headers: Vec::new(),
            query: Vec::new(),
        }
    }
}

pub enum AuthSession {
    None,
    UsernamePassword(Arc<UsernamePasswordAuth>),
    Signed(SignedAuth),
}

impl AuthSession {
    /// Choose a variant from options. Username wins over AK/SK when both are set.
    pub fn from_options(options: &NacosConfigOptions) -> Self {
        if let (Some(username), Some(password)) = (&options.username, &options.password) {
            AuthSession::UsernamePassword(Arc::new(UsernamePasswordAuth::new(
                username.clone(),
                password.clone(),
                options.context_path.clone(),
            )))
        } else if let (Some(ak), Some(sk)) = (&options.access_key, &options.secret_key) {
            AuthSession::Signed(SignedAuth::new(ak.clone(), sk.clone()))
        } else {
            AuthSession::None
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, AuthSession::None)
    }

    /// Perform initial login (for the username/password variant) and start
    /// the background refresh task. A no-op for the other variants.
    pub async fn initialize(&self, server_addresses: &[String]) {
        if let AuthSession::UsernamePassword(auth) = self {
            auth.initialize(server_addresses).await;
        }
    }

    /// Ensure the session has valid credentials before an outbound request.
    pub async fn ensure_authenticated(&self, server_addresses: &[String]) {
        if let AuthSession::UsernamePassword(auth) = self {
            auth.ensure_authenticated(server_addresses).await;
        }
    }

    /// Credentials that belong in request headers.
    pub fn apply_to_request(&self) -> AuthParams {
        match self {
            AuthSession::None => AuthParams::empty(),
            AuthSession::UsernamePassword(auth) => auth.apply(),
            AuthSession::Signed(_) => AuthParams::empty(),
        }
    }

    /// Credentials/signature that belong in query parameters, given the
    /// `(tenant, group)` the request targets (needed for the AK/SK signature
    /// resource string).
    pub fn apply_to_parameters(&self, tenant: &str, group: &str) -> AuthParams {
        match self {
            AuthSession::None => AuthParams::empty(),
            AuthSession::UsernamePassword(auth) => auth.apply(),
            AuthSession::Signed(auth) => auth.sign(tenant, group),
        }
    }

    pub async fn shutdown(&self) {
        if let AuthSession::UsernamePassword(auth) = self {
            auth.shutdown().await;
        }
    }
}

/// Stateful username/password auth: login, bearer-token caching, and a
/// background refresh task.
pub struct UsernamePasswordAuth {
    username: String,
    password: String,
    context_path: String,
    client: reqwest::Client,
    token: RwLock<TokenInfo>,
    login_lock: AsyncMutex<()>,
    cancel: CancelToken,
    refresh_handle: AsyncMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl UsernamePasswordAuth {
    fn new(username: String, password: String, context_path: String) -> Self {
        Self {
            username,
            password,
            context_path: context_path.trim_matches('/').to_string(),
            client: reqwest::Client::new(),
            token: RwLock::new(TokenInfo::default()),
            login_lock: AsyncMutex::new(()),
            cancel: CancelToken::new(),
            refresh_handle: AsyncMutex::new(None),
        }
    }

    async fn initialize(self: &Arc<Self>, server_addresses: &[String]) {
        self.ensure_authenticated(server_addresses).await;

        let this = self.clone();
        let cancel = self.cancel.clone();
        let addrs = server_addresses.to_vec();
        let handle = tokio::spawn(async move {
            loop {
                let ttl = this.token.read().token_ttl_secs.max(1);
                let period = Duration::from_secs_f64((ttl as f64 * 0.8).clamp(30.0, 300.0));
                cancel.sleep(period).await;
                if cancel.is_cancelled() {
                    break;
                }
                this.ensure_authenticated(&addrs).await;
            }
        });
        *self.refresh_handle.lock().await = Some(handle);
    }

    async fn ensure_authenticated(&self, server_addresses: &[String]) {
        if self.token.read().is_valid() {
            return;
        }

        let _guard = self.login_lock.lock().await;
        // Double-checked: another caller may have refreshed while we waited.
        if self.token.read().is_valid() {
            return;
        }

        if let Err(e) = self.login(server_addresses).await {
            warn!(error = %e, "login rejected by all configured servers");
        }
    }

    async fn login(&self, server_addresses: &[String]) -> anyhow::Result<()> {
        for server in server_addresses {
            let url = format!(
                "{}/{}/v1/auth/users/login",
                server.trim_end_matches('/'),
                self.context_path
            );
            debug!(url = %url, "attempting login");

            let result = self
                .client
                .post(&url)
                .timeout(LOGIN_TIMEOUT)
                .form(&[("username", &self.username), ("password", &self.password)])
                .send()
                .await;

            let response = match result {
                Ok(r) => r,
                Err(e) => {
                    warn!(server = %server, error = %e, "login attempt failed");
                    continue;
                }
            };

            if response.status().as_u16() != 200 {
                continue;
            }

            let body: serde_json::Value = match response.json().await {
                Ok(v) => v,
                Err(_) => continue,
            };

            let Some(access_token) = body.get("accessToken").and_then(|v| v.as_str()) else {
                continue;
            };
            let ttl = body.get("tokenTtl").and_then(|v| v.as_i64()).unwrap_or(18000);

            *self.token.write() = TokenInfo {
                access_token: access_token.to_string(),
                token_ttl_secs: ttl.max(0) as u64,
                last_refresh_time: Some(std::time::SystemTime::now()),
            };
            return Ok(());
        }

        anyhow::bail!("all servers rejected login")
    }

    fn apply(&self) -> AuthParams {
        let token = self.token.read();
        if token.access_token.is_empty() {
            return AuthParams::empty();
        }
        AuthParams {
            headers: vec![("accessToken".to_string(), token.access_token.clone())],
            query: vec![("accessToken".to_string(), token.access_token.clone())],
        }
    }

    async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.refresh_handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}

/// Stateless HMAC-SHA1 signed auth (AK/SK).
pub struct SignedAuth {
    access_key: String,
    secret_key: String,
}

impl SignedAuth {
    fn new(access_key: String, secret_key: String) -> Self {
        Self {
            access_key,
            secret_key,
        }
    }

    fn sign(&self, tenant: &str, group: &str) -> AuthParams {
        let resource = if !tenant.is_empty() && !group.is_empty() {
            format!("{}+{}", tenant, group)
        } else if !group.is_empty() {
            group.to_string()
        } else {
            String::new()
        };

        let timestamp = unix_millis_now().to_string();
        let signature_input = if resource.is_empty() {
            timestamp.clone()
        } else {
            format!("{}+{}", resource, timestamp)
        };

        let mut mac = HmacSha1::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC accepts a key of any length");
        mac.update(signature_input.as_bytes());
        let signature = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        AuthParams {
            headers: Vec::new(),
            query: vec![
                ("Spas-AccessKey".to_string(), self.access_key.clone()),
                ("Timestamp".to_string(), timestamp),
                ("Spas-Signature".to_string(), signature),
            ],
        }
    }
}
