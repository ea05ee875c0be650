//! Subscription cache: per-key content/MD5 state plus the listeners
//! registered against it, with MD5-diff-gated fan-out.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::warn;

use super::listener::ConfigChangeListener;
use crate::model::{ConfigChangedEvent, ConfigKey, compute_md5};

/// Per-listener invocation budget. A listener that hangs past this is
/// abandoned; it does not block other listeners or the dispatcher loop.
const LISTENER_TIMEOUT: Duration = Duration::from_secs(30);

struct ListenerSlot {
    id: u64,
    listener: Arc<dyn ConfigChangeListener>,
}

/// Tracked state for one subscribed config: last-known content/MD5 and its
/// registered listeners.
pub struct CacheEntry {
    pub key: ConfigKey,
    pub content: String,
    pub md5: String,
    listeners: Vec<ListenerSlot>,
}

impl CacheEntry {
    fn new(key: ConfigKey) -> Self {
        Self {
            key,
            content: String::new(),
            md5: String::new(),
            listeners: Vec::new(),
        }
    }

    /// Update content, recomputing MD5. Returns `true` only if the content
    /// actually differs from what was cached.
    fn update_content(&mut self, content: &str) -> bool {
        let new_md5 = compute_md5(content);
        if new_md5 == self.md5 {
            return false;
        }
        self.content = content.to_string();
        self.md5 = new_md5;
        true
    }

    pub fn has_listeners(&self) -> bool {
        !self.listeners.is_empty()
    }
}

/// Handle returned on registration. Dropping it does nothing by itself —
/// call `dispose()` to actually unregister, mirroring the explicit-cleanup
/// style the rest of this crate uses for background workers.
pub struct SubscriptionHandle {
    cache: Arc<SubscriptionCache>,
    key: ConfigKey,
    id: u64,
}

impl SubscriptionHandle {
    pub fn dispose(self) {
        self.cache.remove_listener(&self.key, self.id);
    }
}

/// Concurrent map of cache key to `CacheEntry`, one mutex per entry so
/// unrelated keys never contend.
pub struct SubscriptionCache {
    entries: DashMap<String, Arc<Mutex<CacheEntry>>>,
    next_id: AtomicU64,
}

impl SubscriptionCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
        })
    }

    fn entry_for(&self, key: &ConfigKey) -> Arc<Mutex<CacheEntry>> {
        self.entries
            .entry(key.cache_key())
            .or_insert_with(|| Arc::new(Mutex::new(CacheEntry::new(key.clone()))))
            .clone()
    }

    /// Register a listener for `key`. Registering the identical callback
    /// identity twice is a no-op: the second call returns a handle for the
    /// already-registered slot instead of adding a duplicate.
    pub fn add_listener(
        self: &Arc<Self>,
        key: &ConfigKey,
        listener: Arc<dyn ConfigChangeListener>,
    ) -> SubscriptionHandle {
        let entry = self.entry_for(key);

        let mut guard = entry.lock();
        if let Some(existing) = guard
            .listeners
            .iter()
            .find(|slot| Arc::ptr_eq(&slot.listener, &listener))
        {
            let id = existing.id;
            drop(guard);
            return SubscriptionHandle {
                cache: self.clone(),
                key: key.clone(),
                id,
            };
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        guard.listeners.push(ListenerSlot { id, listener });
        drop(guard);

        SubscriptionHandle {
            cache: self.clone(),
            key: key.clone(),
            id,
        }
    }

    /// Remove a listener by identity, evicting the entry entirely once it
    /// has no content worth keeping and no listeners left.
    fn remove_listener(&self, key: &ConfigKey, id: u64) {
        let cache_key = key.cache_key();
        let Some(entry) = self.entries.get(&cache_key) else {
            return;
        };
        let should_evict = {
            let mut guard = entry.lock();
            guard.listeners.retain(|slot| slot.id != id);
            guard.listeners.is_empty() && guard.md5.is_empty()
        };
        drop(entry);
        if should_evict {
            self.entries.remove(&cache_key);
        }
    }

    pub fn has_listeners(&self, key: &ConfigKey) -> bool {
        self.entries
            .get(&key.cache_key())
            .map(|e| e.lock().has_listeners())
            .unwrap_or(false)
    }

    /// Last-known MD5 for `key`, empty string if nothing cached yet.
    pub fn known_md5(&self, key: &ConfigKey) -> String {
        self.entries
            .get(&key.cache_key())
            .map(|e| e.lock().md5.clone())
            .unwrap_or_default()
    }

    /// All keys with at least one listener, paired with their last-known
    /// MD5 — the set a prober watches.
    pub fn tracked_with_listeners(&self) -> Vec<(ConfigKey, String)> {
        self.entries
            .iter()
            .filter_map(|e| {
                let guard = e.lock();
                if guard.has_listeners() {
                    Some((guard.key.clone(), guard.md5.clone()))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Update the cached content for `key` and, if it actually changed,
    /// fan out to every registered listener. Each listener runs in its own
    /// task under a timeout so one slow or panicking listener cannot block
    /// or break the others.
    pub async fn update_and_notify(&self, key: &ConfigKey, new_content: &str) {
        let entry = self.entry_for_existing_or_new(key);

        let (changed, old_content, listeners) = {
            let mut guard = entry.lock();
            let old_content = guard.content.clone();
            let changed = guard.update_content(new_content);
            let listeners: Vec<Arc<dyn ConfigChangeListener>> = guard
                .listeners
                .iter()
                .map(|slot| slot.listener.clone())
                .collect();
            (changed, old_content, listeners)
        };

        if !changed || listeners.is_empty() {
            return;
        }

        let event = ConfigChangedEvent {
            key: key.clone(),
            new_content: new_content.to_string(),
            old_content,
            content_type: "text".to_string(),
            timestamp: std::time::SystemTime::now(),
        };

        for listener in listeners {
            let event = event.clone();
            tokio::spawn(async move {
                match tokio::time::timeout(LISTENER_TIMEOUT, listener.on_change(event)).await {
                    Ok(()) => {}
                    Err(_) => warn!("config change listener timed out after {LISTENER_TIMEOUT:?}"),
                }
            });
        }
    }

    fn entry_for_existing_or_new(&self, key: &ConfigKey) -> Arc<Mutex<CacheEntry>> {
        self.entry_for(key)
    }
}
