//! Client configuration options
//!
//! A `Default` plus chained `with_*` methods, validated at client
//! construction rather than lazily.

use std::path::PathBuf;

use crate::error::{ClientError, Result};

/// Recognized options for `NacosConfigClient`.
#[derive(Clone, Debug)]
pub struct NacosConfigOptions {
    pub server_addresses: Vec<String>,
    pub namespace: String,
    pub context_path: String,
    pub default_timeout_ms: u64,
    pub long_polling_timeout_ms: u64,
    pub listen_interval_ms: u64,
    pub max_retry: u32,
    pub retry_delay_ms: u64,
    pub enable_snapshot: bool,
    pub snapshot_path: PathBuf,
    pub username: Option<String>,
    pub password: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl Default for NacosConfigOptions {
    fn default() -> Self {
        Self {
            server_addresses: Vec::new(),
            namespace: String::new(),
            context_path: "nacos".to_string(),
            default_timeout_ms: 15_000,
            long_polling_timeout_ms: 30_000,
            listen_interval_ms: 1_000,
            max_retry: 3,
            retry_delay_ms: 2_000,
            enable_snapshot: true,
            snapshot_path: default_snapshot_path(),
            username: None,
            password: None,
            access_key: None,
            secret_key: None,
        }
    }
}

impl NacosConfigOptions {
    pub fn new(server_addresses: Vec<String>) -> Self {
        Self {
            server_addresses,
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_context_path(mut self, context_path: impl Into<String>) -> Self {
        self.context_path = context_path.into();
        self
    }

    pub fn with_timeouts(mut self, default_timeout_ms: u64, long_polling_timeout_ms: u64) -> Self {
        self.default_timeout_ms = default_timeout_ms;
        self.long_polling_timeout_ms = long_polling_timeout_ms;
        self
    }

    pub fn with_listen_interval_ms(mut self, listen_interval_ms: u64) -> Self {
        self.listen_interval_ms = listen_interval_ms;
        self
    }

    pub fn with_retry(mut self, max_retry: u32, retry_delay_ms: u64) -> Self {
        self.max_retry = max_retry;
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn with_snapshot(mut self, enabled: bool, path: impl Into<PathBuf>) -> Self {
        self.enable_snapshot = enabled;
        self.snapshot_path = path.into();
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_signed_auth(mut self, access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.access_key = Some(access_key.into());
        self.secret_key = Some(secret_key.into());
        self
    }

    /// Validate the option set, producing `ClientError::Configuration` on failure.
    pub fn validate(&self) -> Result<()> {
        if self.server_addresses.is_empty() {
            return Err(ClientError::Configuration(
                "serverAddresses must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_snapshot_path() -> PathBuf {
    if let Ok(dir) = std::env::var("NACOS_SNAPSHOT_PATH") {
        return PathBuf::from(dir);
    }
    let base = dirs_local_app_data();
    base.join("nacos").join("config")
}

/// Best-effort platform local-app-data directory, without pulling in the
/// `dirs` crate for a single lookup used only as a fallback default.
fn dirs_local_app_data() -> PathBuf {
    if cfg!(target_os = "windows") {
        if let Ok(dir) = std::env::var("LOCALAPPDATA") {
            return PathBuf::from(dir);
        }
    } else if cfg!(target_os = "macos") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library").join("Application Support");
        }
    } else if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}
