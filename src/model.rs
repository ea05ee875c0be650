//! Client data model
//!
//! Value types shared across the server pool, transport, auth, codec, and
//! cache layers. These are deliberately plain data — behavior lives in the
//! modules that own the corresponding lifecycle.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Identifies a single configuration item on the server: `(dataId, group, tenant)`.
///
/// `tenant` empty means the server's "public" namespace. Equality and
/// hashing are tuple-equality over the three fields.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigKey {
    pub data_id: String,
    pub group: String,
    pub tenant: String,
}

impl ConfigKey {
    /// Build a key, normalizing a blank group to `DEFAULT_GROUP`.
    ///
    /// Returns `None` if `data_id` or the normalized `group` is empty after
    /// trimming — callers should turn that into `ClientError::Validation`.
    pub fn new(data_id: &str, group: &str, tenant: &str) -> Option<Self> {
        let data_id = data_id.trim();
        let group = group.trim();
        if data_id.is_empty() {
            return None;
        }
        let group = if group.is_empty() {
            "DEFAULT_GROUP"
        } else {
            group
        };
        Some(Self {
            data_id: data_id.to_string(),
            group: group.to_string(),
            tenant: tenant.trim().to_string(),
        })
    }

    /// Cache/log key: `dataId+group` or `dataId+group+tenant`.
    pub fn cache_key(&self) -> String {
        if self.tenant.is_empty() {
            format!("{}+{}", self.data_id, self.group)
        } else {
            format!("{}+{}+{}", self.data_id, self.group, self.tenant)
        }
    }

    /// `tenant`, or `"public"` when empty — used for filesystem paths.
    pub fn tenant_or_public(&self) -> &str {
        if self.tenant.is_empty() {
            "public"
        } else {
            &self.tenant
        }
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cache_key())
    }
}

/// A configuration record as returned by the server.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConfigData {
    pub content: String,
    pub content_type: String,
    pub md5: String,
    pub encrypted_data_key: Option<String>,
}

impl ConfigData {
    pub fn new(content: String) -> Self {
        let md5 = compute_md5(&content);
        Self {
            content,
            content_type: "text".to_string(),
            md5,
            encrypted_data_key: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// A configuration record read from a local failover or snapshot file.
#[derive(Clone, Debug)]
pub struct LocalConfigData {
    pub content: String,
    pub last_modified: SystemTime,
}

impl LocalConfigData {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Delivered to subscribers when a config's content changes.
#[derive(Clone, Debug)]
pub struct ConfigChangedEvent {
    pub key: ConfigKey,
    pub new_content: String,
    pub old_content: String,
    pub content_type: String,
    pub timestamp: SystemTime,
}

/// Mutable authentication state for the username/password auth variant.
///
/// All fields are read and written together under one lock in `auth.rs` —
/// this struct itself carries no synchronization.
#[derive(Clone, Debug, Default)]
pub struct TokenInfo {
    pub access_token: String,
    pub token_ttl_secs: u64,
    pub last_refresh_time: Option<SystemTime>,
}

impl TokenInfo {
    /// `tokenTtl / 10`, the window before expiry that triggers a refresh.
    pub fn refresh_window_secs(&self) -> u64 {
        self.token_ttl_secs / 10
    }

    /// True iff the token is non-empty and has not yet entered its refresh window.
    pub fn is_valid(&self) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        let Some(last_refresh) = self.last_refresh_time else {
            return false;
        };
        let elapsed_ms = SystemTime::now()
            .duration_since(last_refresh)
            .unwrap_or_default()
            .as_millis() as u64;
        let valid_window_ms = self
            .token_ttl_secs
            .saturating_sub(self.refresh_window_secs())
            * 1000;
        elapsed_ms < valid_window_ms
    }
}

/// Per-server failure accounting for the health-aware pool.
#[derive(Debug, Default)]
pub struct ServerHealth {
    pub failure_count: u32,
    pub last_failure_time: Option<SystemTime>,
}

impl ServerHealth {
    pub fn is_healthy(&self) -> bool {
        self.failure_count < 3
    }
}

/// Current unix time in milliseconds, used for request timestamps and signing.
pub fn unix_millis_now() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Lowercase hex MD5 digest of UTF-8 content.
pub fn compute_md5(content: &str) -> String {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_config_key_normalizes_blank_group() {
        let key = ConfigKey::new("app.yaml", "  ", "").unwrap();
        assert_eq!(key.group, "DEFAULT_GROUP");
    }

    #[test]
    fn test_config_key_rejects_empty_data_id() {
        assert!(ConfigKey::new("  ", "g", "").is_none());
    }

    #[test]
    fn test_config_key_cache_key() {
        let key = ConfigKey::new("id", "group", "").unwrap();
        assert_eq!(key.cache_key(), "id+group");

        let key = ConfigKey::new("id", "group", "tenant1").unwrap();
        assert_eq!(key.cache_key(), "id+group+tenant1");
    }

    #[test]
    fn test_config_key_tenant_or_public() {
        let key = ConfigKey::new("id", "group", "").unwrap();
        assert_eq!(key.tenant_or_public(), "public");

        let key = ConfigKey::new("id", "group", "ns1").unwrap();
        assert_eq!(key.tenant_or_public(), "ns1");
    }

    #[test]
    fn test_config_data_is_empty() {
        assert!(ConfigData::new(String::new()).is_empty());
        assert!(!ConfigData::new("x".to_string()).is_empty());
    }

    #[test]
    fn test_compute_md5() {
        assert_eq!(compute_md5(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(compute_md5("hello world"), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn test_token_info_invalid_when_empty() {
        let token = TokenInfo::default();
        assert!(!token.is_valid());
    }

    #[test]
    fn test_token_info_valid_within_window() {
        let token = TokenInfo {
            access_token: "abc".to_string(),
            token_ttl_secs: 100,
            last_refresh_time: Some(SystemTime::now()),
        };
        assert!(token.is_valid());
    }

    #[test]
    fn test_token_info_invalid_past_refresh_window() {
        let token = TokenInfo {
            access_token: "abc".to_string(),
            token_ttl_secs: 10,
            last_refresh_time: Some(SystemTime::now() - Duration::from_secs(20)),
        };
        assert!(!token.is_valid());
    }

    #[test]
    fn test_server_health_thresholds() {
        let mut health = ServerHealth::default();
        assert!(health.is_healthy());
        health.failure_count = 2;
        assert!(health.is_healthy());
        health.failure_count = 3;
        assert!(!health.is_healthy());
    }
}
