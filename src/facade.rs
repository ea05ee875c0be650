//! Public entry point: `NacosConfigClient` composes the server pool,
//! transport, auth session, remote client, subscription cache, local
//! storage, and listening manager into the three operations callers need —
//! get, publish/remove, and subscribe.

use std::sync::Arc;

use tracing::warn;

use crate::auth::AuthSession;
use crate::config::{ConfigChangeListener, SubscriptionCache, SubscriptionHandle};
use crate::error::{ClientError, Result};
use crate::listener_manager::ListeningManager;
use crate::local_storage::LocalStorage;
use crate::metrics::MetricsMonitor;
use crate::model::ConfigKey;
use crate::options::NacosConfigOptions;
use crate::remote_client::RemoteClient;
use crate::server_pool::ServerPool;
use crate::transport::{HttpSender, ReqwestSender, Transport};

pub struct NacosConfigClient {
    namespace: String,
    auth: Arc<AuthSession>,
    remote: Arc<RemoteClient>,
    cache: Arc<SubscriptionCache>,
    local: LocalStorage,
    listening_manager: ListeningManager,
    pub metrics: Arc<MetricsMonitor>,
}

impl NacosConfigClient {
    pub async fn new(options: NacosConfigOptions) -> Result<Self> {
        options.validate()?;
        let sender = Arc::new(ReqwestSender::new()?);
        Self::from_sender(options, sender).await
    }

    async fn from_sender(options: NacosConfigOptions, sender: Arc<dyn HttpSender>) -> Result<Self> {
        let pool = Arc::new(ServerPool::new(&options.server_addresses)?);
        let transport = Transport::new(pool, sender, &options.context_path);
        let auth = Arc::new(AuthSession::from_options(&options));
        auth.initialize(&options.server_addresses).await;
        let metrics = Arc::new(MetricsMonitor::default());

        let remote = Arc::new(RemoteClient::new(
            transport,
            auth.clone(),
            options.server_addresses.clone(),
            options.namespace.clone(),
            options.default_timeout_ms,
            options.long_polling_timeout_ms,
            options.max_retry,
            options.retry_delay_ms,
            metrics.clone(),
        ));
        let cache = SubscriptionCache::new();
        let local = LocalStorage::new(options.snapshot_path.clone(), options.enable_snapshot);
        let listening_manager = ListeningManager::new(
            remote.clone(),
            cache.clone(),
            options.listen_interval_ms,
            metrics.clone(),
        );

        Ok(Self {
            namespace: options.namespace,
            auth,
            remote,
            cache,
            local,
            listening_manager,
            metrics,
        })
    }

    fn key(&self, data_id: &str, group: &str) -> Result<ConfigKey> {
        ConfigKey::new(data_id, group, &self.namespace)
            .ok_or_else(|| ClientError::Validation("dataId must not be empty".to_string()))
    }

    /// Read a config's content. Tries, in order: the operator-managed
    /// failover file, the remote server, and — only if the server call
    /// fails — the last snapshot saved from a prior successful read.
    pub async fn get(&self, data_id: &str, group: &str) -> Result<String> {
        let key = self.key(data_id, group)?;

        if let Some(content) = self.local.read_failover(&key).await
            && !content.is_empty()
        {
            warn!(data_id, group, "serving config from failover file");
            return Ok(content);
        }

        match self.remote.get_config(&key).await {
            Ok(Some(data)) => {
                self.local.save_snapshot(&key, &data.content).await;
                Ok(data.content)
            }
            Ok(None) => Ok(String::new()),
            Err(e) => {
                if let Some(content) = self.local.read_snapshot(&key).await
                    && !content.is_empty()
                {
                    warn!(data_id, group, error = %e, "remote unavailable, serving snapshot");
                    Ok(content)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Publish content under a key, refreshing the snapshot on success.
    /// `content_type` defaults to `"text"` when not specified, matching the
    /// public API's `type="text"` default. Returns `false` (not an error)
    /// when the server rejects the publish with a non-403 non-2xx status;
    /// `Unauthorized`/transport failures still surface as `Err`.
    pub async fn publish(&self, data_id: &str, group: &str, content: &str) -> Result<bool> {
        self.publish_with_type(data_id, group, content, "text").await
    }

    /// As `publish`, with an explicit content type (e.g. `"json"`, `"yaml"`).
    pub async fn publish_with_type(
        &self,
        data_id: &str,
        group: &str,
        content: &str,
        content_type: &str,
    ) -> Result<bool> {
        let key = self.key(data_id, group)?;
        let ok = self.remote.publish_config(&key, content, content_type).await?;
        if ok {
            self.local.save_snapshot(&key, content).await;
        }
        Ok(ok)
    }

    /// Delete a key server-side, clearing the snapshot on success. Returns
    /// `false` (not an error) when the server rejects the removal with a
    /// non-403 non-2xx status; `Unauthorized`/transport failures still
    /// surface as `Err`.
    pub async fn remove(&self, data_id: &str, group: &str) -> Result<bool> {
        let key = self.key(data_id, group)?;
        let ok = self.remote.remove_config(&key).await?;
        if ok {
            self.local.clear_snapshot(&key).await;
        }
        Ok(ok)
    }

    /// Register a listener for a key's changes, starting the background
    /// listening manager on first use.
    pub async fn subscribe(
        &self,
        data_id: &str,
        group: &str,
        listener: Arc<dyn ConfigChangeListener>,
    ) -> Result<SubscriptionHandle> {
        let key = self.key(data_id, group)?;
        let handle = self.cache.add_listener(&key, listener);

        if !self.listening_manager.is_running().await {
            // Another concurrent subscribe() may have started it first;
            // that race resolves to an Err we can safely ignore here.
            let _ = self.listening_manager.start().await;
        }

        Ok(handle)
    }

    /// Stop the background listening manager and the auth refresh task.
    pub async fn shutdown(&self) {
        self.listening_manager.stop().await;
        self.auth.shutdown().await;
    }
}
