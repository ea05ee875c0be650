//! Background long-polling: a prober task that watches for server-side
//! changes and a dispatcher task that fetches and fans out the ones that
//! actually happened, connected by an unbounded channel so a slow fetch
//! never stalls the next probe cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::cancel::CancelToken;
use crate::config::SubscriptionCache;
use crate::error::{ClientError, Result};
use crate::metrics::MetricsMonitor;
use crate::model::ConfigKey;
use crate::remote_client::{RemoteClient, WatchEntry};

/// How long the prober waits before retrying after an uncaught failure.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);
/// Short yield between successful probe cycles, so the loop doesn't spin
/// tight if the long-poll happens to return instantly.
const CYCLE_YIELD: Duration = Duration::from_millis(100);

struct RunningTasks {
    prober: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
    cancel: CancelToken,
}

/// Owns the prober/dispatcher pair. `start()`/`stop()` are idempotent:
/// calling `start()` twice without an intervening `stop()` is an error,
/// and `stop()` on a manager that was never started is a no-op.
pub struct ListeningManager {
    remote: Arc<RemoteClient>,
    cache: Arc<SubscriptionCache>,
    listen_interval: Duration,
    running: AsyncMutex<Option<RunningTasks>>,
    metrics: Arc<MetricsMonitor>,
}

impl ListeningManager {
    pub fn new(
        remote: Arc<RemoteClient>,
        cache: Arc<SubscriptionCache>,
        listen_interval_ms: u64,
        metrics: Arc<MetricsMonitor>,
    ) -> Self {
        Self {
            remote,
            cache,
            listen_interval: Duration::from_millis(listen_interval_ms),
            running: AsyncMutex::new(None),
            metrics,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ClientError::Configuration(
                "listening manager already started".to_string(),
            ));
        }

        let cancel = CancelToken::new();
        let (tx, rx) = unbounded_channel();

        let prober = tokio::spawn(prober_loop(
            self.remote.clone(),
            self.cache.clone(),
            tx,
            cancel.clone(),
            self.listen_interval,
            self.metrics.clone(),
        ));
        let dispatcher = tokio::spawn(dispatcher_loop(
            self.remote.clone(),
            self.cache.clone(),
            rx,
            cancel.clone(),
        ));

        *running = Some(RunningTasks {
            prober,
            dispatcher,
            cancel,
        });
        Ok(())
    }

    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        if let Some(tasks) = running.take() {
            tasks.cancel.cancel();
            let _ = tasks.prober.await;
            let _ = tasks.dispatcher.await;
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

async fn prober_loop(
    remote: Arc<RemoteClient>,
    cache: Arc<SubscriptionCache>,
    tx: UnboundedSender<ConfigKey>,
    cancel: CancelToken,
    listen_interval: Duration,
    metrics: Arc<MetricsMonitor>,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        let tracked = cache.tracked_with_listeners();
        for (key, _) in &tracked {
            metrics.set_active_listener_count(&key.data_id, &key.group, key.tenant_or_public(), 1);
        }
        if tracked.is_empty() {
            cancel.sleep(listen_interval).await;
            continue;
        }

        let entries: Vec<WatchEntry<'_>> = tracked
            .iter()
            .map(|(key, md5)| WatchEntry { key, md5 })
            .collect();

        match remote.listen_config_changes(&entries).await {
            Ok(changed) => {
                debug!(count = changed.len(), "probe detected changed keys");
                for key in changed {
                    if tx.send(key).is_err() {
                        // Dispatcher gone, manager is shutting down.
                        return;
                    }
                }
                cancel.sleep(CYCLE_YIELD).await;
            }
            Err(e) => {
                warn!(error = %e, "probe cycle failed, backing off");
                cancel.sleep(ERROR_BACKOFF).await;
            }
        }
    }
}

async fn dispatcher_loop(
    remote: Arc<RemoteClient>,
    cache: Arc<SubscriptionCache>,
    mut rx: UnboundedReceiver<ConfigKey>,
    cancel: CancelToken,
) {
    loop {
        let key = tokio::select! {
            received = rx.recv() => match received {
                Some(key) => key,
                None => return,
            },
            _ = wait_cancelled(&cancel) => return,
        };

        match remote.get_config(&key).await {
            Ok(Some(data)) => {
                cache.update_and_notify(&key, &data.content).await;
            }
            Ok(None) => {
                warn!(key = %key, "changed config missing on server, skipping notify");
            }
            Err(e) => {
                error!(key = %key, error = %e, "failed to fetch changed config");
            }
        }
    }
}

async fn wait_cancelled(cancel: &CancelToken) {
    while !cancel.is_cancelled() {
        cancel.sleep(Duration::from_secs(3600)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthSession;
    use crate::config::listener::FnConfigChangeListener;
    use crate::options::NacosConfigOptions;
    use crate::server_pool::ServerPool;
    use crate::transport::{HttpSender, RawRequest, RawResponse, Transport};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedSender {
        status: u16,
        body: String,
    }

    #[async_trait]
    impl HttpSender for ScriptedSender {
        async fn send(
            &self,
            _url: &str,
            _req: &RawRequest,
        ) -> std::result::Result<RawResponse, reqwest::Error> {
            Ok(RawResponse {
                status: self.status,
                body: self.body.clone().into_bytes(),
            })
        }
    }

    fn build_remote(status: u16, body: &str) -> Arc<RemoteClient> {
        let pool = Arc::new(ServerPool::new(&["http://a:8848".to_string()]).unwrap());
        let sender = Arc::new(ScriptedSender {
            status,
            body: body.to_string(),
        });
        let transport = Transport::new(pool, sender, "nacos");
        let options = NacosConfigOptions::new(vec!["http://a:8848".to_string()]);
        let auth = Arc::new(AuthSession::from_options(&options));
        Arc::new(RemoteClient::new(
            transport,
            auth,
            vec!["http://a:8848".to_string()],
            String::new(),
            1_000,
            100,
            0,
            10,
            Arc::new(MetricsMonitor::default()),
        ))
    }

    #[tokio::test]
    async fn test_start_twice_errors() {
        let remote = build_remote(200, "");
        let cache = SubscriptionCache::new();
        let manager = ListeningManager::new(remote, cache, 50, Arc::new(MetricsMonitor::default()));
        manager.start().await.unwrap();
        assert!(manager.start().await.is_err());
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let remote = build_remote(200, "");
        let cache = SubscriptionCache::new();
        let manager = ListeningManager::new(remote, cache, 50, Arc::new(MetricsMonitor::default()));
        manager.stop().await;
        assert!(!manager.is_running().await);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let remote = build_remote(200, "");
        let cache = SubscriptionCache::new();
        let manager = ListeningManager::new(remote, cache, 50, Arc::new(MetricsMonitor::default()));
        manager.start().await.unwrap();
        manager.stop().await;
        assert!(manager.start().await.is_ok());
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_probe_cycle_fetches_and_notifies() {
        let pool = Arc::new(ServerPool::new(&["http://a:8848".to_string()]).unwrap());
        let sender = Arc::new(ScriptedSender {
            status: 200,
            body: "app.yaml\u{02}DEFAULT_GROUP\u{01}".to_string(),
        });
        let transport = Transport::new(pool, sender, "nacos");
        let options = NacosConfigOptions::new(vec!["http://a:8848".to_string()]);
        let auth = Arc::new(AuthSession::from_options(&options));
        let remote = Arc::new(RemoteClient::new(
            transport,
            auth,
            vec!["http://a:8848".to_string()],
            String::new(),
            1_000,
            100,
            0,
            10,
            Arc::new(MetricsMonitor::default()),
        ));

        let cache = SubscriptionCache::new();
        let key = ConfigKey::new("app.yaml", "DEFAULT_GROUP", "").unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let listener = Arc::new(FnConfigChangeListener::new(move |_event| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));
        let _handle = cache.add_listener(&key, listener);
        // Pre-seed a different MD5 so the fetched content is treated as a change.
        cache.update_and_notify(&key, "old-content").await;

        let manager = ListeningManager::new(remote, cache, 20, Arc::new(MetricsMonitor::default()));
        manager.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        manager.stop().await;

        assert!(calls.load(Ordering::SeqCst) >= 1);
    }
}
