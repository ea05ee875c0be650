//! Health-aware server pool with round-robin selection and time-based recovery.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::model::ServerHealth;

/// Time after which a failed server is eligible for recovery, once the
/// healthy list has run dry.
const RECOVERY_WINDOW: Duration = Duration::from_secs(10);

/// Maintains the normalized server list, per-server health counters, and a
/// cached healthy-subset used for round-robin selection.
pub struct ServerPool {
    addresses: Vec<String>,
    health: DashMap<String, ServerHealth>,
    healthy_cache: Mutex<Option<Vec<String>>>,
    counter: AtomicU64,
}

impl ServerPool {
    /// Build a pool from raw addresses, normalizing each one.
    ///
    /// Fails with `ClientError::Configuration` if `addresses` is empty.
    pub fn new(addresses: &[String]) -> Result<Self> {
        if addresses.is_empty() {
            return Err(ClientError::Configuration(
                "serverAddresses must not be empty".to_string(),
            ));
        }

        let normalized: Vec<String> = addresses.iter().map(|a| normalize_address(a)).collect();
        let health = DashMap::new();
        for addr in &normalized {
            health.insert(addr.clone(), ServerHealth::default());
        }

        Ok(Self {
            addresses: normalized,
            health,
            healthy_cache: Mutex::new(None),
            counter: AtomicU64::new(0),
        })
    }

    /// Select a server address using round-robin across healthy entries,
    /// with best-effort recovery and a last-resort fallback.
    pub fn select(&self) -> String {
        let healthy = self.healthy_list();

        if healthy.is_empty() {
            self.try_recover();
            let recovered = self.healthy_list();
            if recovered.is_empty() {
                return self.addresses[0].clone();
            }
            return self.pick(&recovered);
        }

        self.pick(&healthy)
    }

    fn pick(&self, healthy: &[String]) -> String {
        let idx = self.counter.fetch_add(1, Ordering::Relaxed) as usize % healthy.len();
        healthy[idx].clone()
    }

    /// Record a failed send against `addr`.
    pub fn mark_failed(&self, addr: &str) {
        let mut crossed = false;
        if let Some(mut entry) = self.health.get_mut(addr) {
            let was_healthy = entry.is_healthy();
            entry.failure_count += 1;
            entry.last_failure_time = Some(SystemTime::now());
            crossed = was_healthy && !entry.is_healthy();
        }
        if crossed {
            debug!(server = addr, "server transitioned to unhealthy");
            self.invalidate_cache();
        }
    }

    /// Record a successful send against `addr`.
    pub fn mark_healthy(&self, addr: &str) {
        let mut crossed = false;
        if let Some(mut entry) = self.health.get_mut(addr) {
            let was_healthy = entry.is_healthy();
            entry.failure_count = 0;
            crossed = !was_healthy;
        }
        if crossed {
            debug!(server = addr, "server recovered to healthy");
            self.invalidate_cache();
        }
    }

    fn healthy_list(&self) -> Vec<String> {
        {
            let cache = self.healthy_cache.lock().unwrap();
            if let Some(list) = cache.as_ref() {
                return list.clone();
            }
        }

        let mut cache = self.healthy_cache.lock().unwrap();
        if let Some(list) = cache.as_ref() {
            return list.clone();
        }
        let rebuilt = self.rebuild_healthy();
        *cache = Some(rebuilt.clone());
        rebuilt
    }

    fn rebuild_healthy(&self) -> Vec<String> {
        self.addresses
            .iter()
            .filter(|addr| {
                self.health
                    .get(addr.as_str())
                    .map(|h| h.is_healthy())
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    fn invalidate_cache(&self) {
        *self.healthy_cache.lock().unwrap() = None;
    }

    /// Reset any server whose last failure is older than the recovery window.
    fn try_recover(&self) {
        let now = SystemTime::now();
        let mut recovered_any = false;
        for addr in &self.addresses {
            if let Some(mut entry) = self.health.get_mut(addr.as_str())
                && !entry.is_healthy()
                && let Some(last_failure) = entry.last_failure_time
                && now
                    .duration_since(last_failure)
                    .unwrap_or_default()
                    >= RECOVERY_WINDOW
            {
                entry.failure_count = 0;
                recovered_any = true;
            }
        }
        if recovered_any {
            self.invalidate_cache();
        }
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }
}

/// Strip trailing slashes; prepend `http://` if no scheme is present.
fn normalize_address(addr: &str) -> String {
    let trimmed = addr.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}
