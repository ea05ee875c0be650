//! Local filesystem failover and snapshot storage.
//!
//! Two parallel trees under the configured snapshot path:
//! `data/config-data/{tenantOrPublic}/{group}/{dataId}` holds operator-managed
//! failover content, consulted before any network call; `snapshot/{tenantOrPublic}/{group}/{dataId}`
//! holds the last content this client successfully fetched, consulted only
//! when the server is unreachable. Both are best-effort: a write failure is
//! logged and swallowed rather than surfaced, since losing a snapshot must
//! never fail the caller's actual request.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use tracing::warn;

use crate::model::{ConfigKey, compute_md5};

/// Metadata for one on-disk snapshot file, as surfaced by `list_snapshots`.
#[derive(Clone, Debug)]
pub struct SnapshotMetadata {
    pub key: ConfigKey,
    pub size: u64,
    pub modified: SystemTime,
    pub md5: String,
}

/// Runtime on/off switch for snapshot reads and writes.
pub struct SnapshotSwitch {
    enabled: AtomicBool,
}

impl SnapshotSwitch {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

/// Reads and writes the failover and snapshot trees rooted at `base`.
pub struct LocalStorage {
    base: PathBuf,
    switch: SnapshotSwitch,
}

impl LocalStorage {
    pub fn new(base: impl Into<PathBuf>, snapshot_enabled: bool) -> Self {
        Self {
            base: base.into(),
            switch: SnapshotSwitch::new(snapshot_enabled),
        }
    }

    pub fn switch(&self) -> &SnapshotSwitch {
        &self.switch
    }

    fn failover_path(&self, key: &ConfigKey) -> PathBuf {
        self.base
            .join("data")
            .join("config-data")
            .join(key.tenant_or_public())
            .join(&key.group)
            .join(&key.data_id)
    }

    fn snapshot_path(&self, key: &ConfigKey) -> PathBuf {
        self.base
            .join("snapshot")
            .join(key.tenant_or_public())
            .join(&key.group)
            .join(&key.data_id)
    }

    /// Read operator-provided failover content, if present. Never logs on a
    /// miss — an absent failover file is the overwhelmingly common case.
    pub async fn read_failover(&self, key: &ConfigKey) -> Option<String> {
        read_file(&self.failover_path(key)).await
    }

    /// Read the last snapshot saved for this key, if the switch is on and a
    /// snapshot exists.
    pub async fn read_snapshot(&self, key: &ConfigKey) -> Option<String> {
        if !self.switch.is_enabled() {
            return None;
        }
        read_file(&self.snapshot_path(key)).await
    }

    /// Persist `content` as the snapshot for `key`. Swallows and logs any
    /// I/O failure.
    pub async fn save_snapshot(&self, key: &ConfigKey, content: &str) {
        if !self.switch.is_enabled() {
            return;
        }
        let path = self.snapshot_path(key);
        if let Err(e) = write_file(&path, content).await {
            warn!(path = %path.display(), error = %e, "failed to write config snapshot");
        }
    }

    /// Record a removal by overwriting the snapshot with empty content,
    /// rather than deleting the file — a later read sees "removed" instead
    /// of falling through to a stale on-disk copy from before the switch was
    /// last disabled.
    pub async fn clear_snapshot(&self, key: &ConfigKey) {
        self.save_snapshot(key, "").await;
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.base.join("snapshot")
    }

    /// Walk the snapshot tree and return metadata for every stored snapshot —
    /// a maintenance surface for an embedding application (inspect disk usage,
    /// audit what's pinned) rather than anything the read/write paths use
    /// themselves.
    pub async fn list_snapshots(&self) -> std::io::Result<Vec<SnapshotMetadata>> {
        let mut out = Vec::new();
        let root = self.snapshot_dir();

        let mut tenant_dirs = match tokio::fs::read_dir(&root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e),
        };
        while let Some(tenant_entry) = tenant_dirs.next_entry().await? {
            if !tenant_entry.file_type().await?.is_dir() {
                continue;
            }
            let tenant_dir_name = tenant_entry.file_name().to_string_lossy().into_owned();
            let tenant = if tenant_dir_name == "public" {
                String::new()
            } else {
                tenant_dir_name
            };

            let mut group_dirs = tokio::fs::read_dir(tenant_entry.path()).await?;
            while let Some(group_entry) = group_dirs.next_entry().await? {
                if !group_entry.file_type().await?.is_dir() {
                    continue;
                }
                let group = group_entry.file_name().to_string_lossy().into_owned();

                let mut data_files = tokio::fs::read_dir(group_entry.path()).await?;
                while let Some(file_entry) = data_files.next_entry().await? {
                    if !file_entry.file_type().await?.is_file() {
                        continue;
                    }
                    let data_id = file_entry.file_name().to_string_lossy().into_owned();
                    let metadata = file_entry.metadata().await?;
                    let content = tokio::fs::read_to_string(file_entry.path())
                        .await
                        .unwrap_or_default();

                    out.push(SnapshotMetadata {
                        key: ConfigKey {
                            data_id,
                            group: group.clone(),
                            tenant: tenant.clone(),
                        },
                        size: metadata.len(),
                        modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                        md5: compute_md5(&content),
                    });
                }
            }
        }

        Ok(out)
    }

    /// Remove the entire snapshot tree. A no-op (not an error) if it doesn't
    /// exist yet.
    pub async fn clean_snapshots(&self) -> std::io::Result<()> {
        let dir = self.snapshot_dir();
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

async fn read_file(path: &Path) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read local config file");
            None
        }
    }
}

async fn write_file(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key() -> ConfigKey {
        ConfigKey::new("app.yaml", "DEFAULT_GROUP", "").unwrap()
    }

    #[tokio::test]
    async fn test_read_failover_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path(), true);
        assert!(storage.read_failover(&key()).await.is_none());
    }

    #[tokio::test]
    async fn test_save_and_read_snapshot_roundtrip() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path(), true);
        storage.save_snapshot(&key(), "hello=world").await;
        let content = storage.read_snapshot(&key()).await;
        assert_eq!(content.as_deref(), Some("hello=world"));
    }

    #[tokio::test]
    async fn test_snapshot_disabled_reads_nothing() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path(), false);
        storage.save_snapshot(&key(), "hello=world").await;
        assert!(storage.read_snapshot(&key()).await.is_none());
    }

    #[tokio::test]
    async fn test_clear_snapshot_writes_empty_not_delete() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path(), true);
        storage.save_snapshot(&key(), "hello=world").await;
        storage.clear_snapshot(&key()).await;
        let content = storage.read_snapshot(&key()).await;
        assert_eq!(content.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_failover_and_snapshot_paths_separate() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path(), true);
        storage.save_snapshot(&key(), "from-snapshot").await;
        assert!(storage.read_failover(&key()).await.is_none());

        let failover_path = storage.failover_path(&key());
        tokio::fs::create_dir_all(failover_path.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&failover_path, "from-failover").await.unwrap();

        assert_eq!(
            storage.read_failover(&key()).await.as_deref(),
            Some("from-failover")
        );
        assert_eq!(
            storage.read_snapshot(&key()).await.as_deref(),
            Some("from-snapshot")
        );
    }

    #[tokio::test]
    async fn test_list_snapshots_empty_when_dir_missing() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path(), true);
        assert!(storage.list_snapshots().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_snapshots_returns_saved_entries() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path(), true);
        storage.save_snapshot(&key(), "hello=world").await;
        let other = ConfigKey::new("db.yaml", "DEFAULT_GROUP", "ns1").unwrap();
        storage.save_snapshot(&other, "url=jdbc").await;

        let mut entries = storage.list_snapshots().await.unwrap();
        assert_eq!(entries.len(), 2);
        entries.sort_by(|a, b| a.key.data_id.cmp(&b.key.data_id));

        assert_eq!(entries[0].key, other);
        assert_eq!(entries[0].md5, compute_md5("url=jdbc"));
        assert_eq!(entries[1].key, key());
        assert_eq!(entries[1].md5, compute_md5("hello=world"));
    }

    #[tokio::test]
    async fn test_clean_snapshots_removes_tree() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path(), true);
        storage.save_snapshot(&key(), "hello=world").await;
        assert!(storage.snapshot_dir().exists());

        storage.clean_snapshots().await.unwrap();
        assert!(!storage.snapshot_dir().exists());
        assert!(storage.read_snapshot(&key()).await.is_none());
    }

    #[tokio::test]
    async fn test_clean_snapshots_missing_dir_is_ok() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path(), true);
        assert!(storage.clean_snapshots().await.is_ok());
    }

    #[test]
    fn test_switch_toggle() {
        let switch = SnapshotSwitch::new(true);
        assert!(switch.is_enabled());
        switch.set_enabled(false);
        assert!(!switch.is_enabled());
    }
}
