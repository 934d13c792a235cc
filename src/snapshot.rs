//! Versioned snapshot store with retention eviction
//!
//! Every backup is a timestamped copy in one flat snapshot directory.
//! Histories are kept per original path; once a history grows past the
//! retention count the oldest versions are dropped from the index and
//! their backing files deleted.

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// One snapshot of one file at one point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    pub timestamp: DateTime<Utc>,
    /// Size of the copied content in bytes
    pub size: u64,
}

/// Aggregate view over the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotStats {
    pub files_tracked: usize,
    pub total_versions: usize,
    pub total_bytes_on_disk: u64,
    pub retention_count: usize,
}

/// Creates and tracks timestamped file snapshots
pub struct SnapshotStore {
    directory: PathBuf,
    retention_count: usize,
    /// Per-original history, oldest first
    records: Mutex<HashMap<PathBuf, Vec<BackupRecord>>>,
    /// Disambiguates backups created within the same millisecond
    sequence: AtomicU64,
}

impl SnapshotStore {
    pub fn new(directory: impl Into<PathBuf>, retention_count: usize) -> anyhow::Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)
            .with_context(|| format!("creating snapshot directory {}", directory.display()))?;

        Ok(Self {
            directory,
            retention_count,
            records: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        })
    }

    /// Snapshot `path` into the store and evict versions beyond retention.
    ///
    /// The source must exist. I/O failure is reported through the returned
    /// error and never panics or poisons the store.
    pub fn create_backup(&self, path: &Path) -> anyhow::Result<BackupRecord> {
        if !path.is_file() {
            bail!("source file does not exist: {}", path.display());
        }

        let original_path = std::path::absolute(path)
            .with_context(|| format!("resolving {}", path.display()))?;
        let timestamp = Utc::now();
        let backup_path = self.next_backup_path(&original_path, timestamp)?;

        let size = std::fs::copy(&original_path, &backup_path).with_context(|| {
            format!(
                "copying {} to {}",
                original_path.display(),
                backup_path.display()
            )
        })?;

        let record = BackupRecord {
            original_path: original_path.clone(),
            backup_path,
            timestamp,
            size,
        };

        let evicted = {
            let mut records = self.records.lock();
            let history = records.entry(original_path).or_default();
            history.push(record.clone());

            let excess = history.len().saturating_sub(self.retention_count);
            history.drain(..excess).collect::<Vec<_>>()
        };

        for old in evicted {
            match std::fs::remove_file(&old.backup_path) {
                Ok(()) => info!("evicted old snapshot {}", old.backup_path.display()),
                Err(e) => warn!(
                    "failed to remove old snapshot {}: {}",
                    old.backup_path.display(),
                    e
                ),
            }
        }

        info!(
            "snapshot created: {} -> {}",
            record.original_path.display(),
            record.backup_path.display()
        );

        Ok(record)
    }

    /// Check that a backup file is still present and plausibly intact.
    ///
    /// With a matching record the on-disk size must equal the recorded
    /// size; for unknown paths any non-empty file passes.
    pub fn verify(&self, backup_path: &Path) -> bool {
        let Ok(metadata) = std::fs::metadata(backup_path) else {
            return false;
        };

        let records = self.records.lock();
        for history in records.values() {
            for record in history {
                if record.backup_path == backup_path {
                    return metadata.len() == record.size;
                }
            }
        }

        metadata.len() > 0
    }

    /// All snapshot versions for `original`, newest first
    pub fn versions(&self, original: &Path) -> Vec<BackupRecord> {
        let Ok(key) = std::path::absolute(original) else {
            return Vec::new();
        };

        self.records
            .lock()
            .get(&key)
            .map(|history| history.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    /// Most recent snapshot for `original`, if any
    pub fn latest_version(&self, original: &Path) -> Option<BackupRecord> {
        let key = std::path::absolute(original).ok()?;
        self.records.lock().get(&key)?.last().cloned()
    }

    /// Walk current records, re-checking on-disk sizes. Missing backing
    /// files contribute 0 bytes rather than an error.
    pub fn statistics(&self) -> SnapshotStats {
        let records = self.records.lock();
        let total_versions = records.values().map(Vec::len).sum();
        let total_bytes_on_disk = records
            .values()
            .flatten()
            .map(|r| {
                std::fs::metadata(&r.backup_path)
                    .map(|m| m.len())
                    .unwrap_or(0)
            })
            .sum();

        SnapshotStats {
            files_tracked: records.len(),
            total_versions,
            total_bytes_on_disk,
            retention_count: self.retention_count,
        }
    }

    fn next_backup_path(
        &self,
        original: &Path,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<PathBuf> {
        let stem = original
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("file");
        let suffix = original
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();

        let stamp = timestamp.format("%Y%m%d_%H%M%S_%3f");
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}_{}_{:04}{}", stem, stamp, seq, suffix);

        std::path::absolute(self.directory.join(name)).context("resolving backup path")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &Path, retention: usize) -> SnapshotStore {
        SnapshotStore::new(dir.join("snapshots"), retention).unwrap()
    }

    #[test]
    fn test_backup_requires_existing_source() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), 3);

        let result = store.create_backup(&dir.path().join("missing.txt"));
        assert!(result.is_err());
        assert_eq!(store.statistics().total_versions, 0);
    }

    #[test]
    fn test_backup_copies_content_and_records_size() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), 3);
        let source = dir.path().join("doc.txt");
        std::fs::write(&source, b"original content").unwrap();

        let record = store.create_backup(&source).unwrap();
        assert_eq!(record.size, 16);
        assert_eq!(
            std::fs::read(&record.backup_path).unwrap(),
            b"original content"
        );
        assert_eq!(record.original_path, std::path::absolute(&source).unwrap());
    }

    #[test]
    fn test_retention_evicts_oldest() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), 2);
        let source = dir.path().join("doc.txt");

        let mut backups = Vec::new();
        for n in 0..3 {
            std::fs::write(&source, format!("version {}", n)).unwrap();
            backups.push(store.create_backup(&source).unwrap());
        }

        let versions = store.versions(&source);
        assert_eq!(versions.len(), 2);

        // Oldest is gone from index and disk, the rest survive
        assert!(!backups[0].backup_path.exists());
        assert!(backups[1].backup_path.exists());
        assert!(backups[2].backup_path.exists());
        assert_eq!(versions[0].backup_path, backups[2].backup_path);
        assert_eq!(
            std::fs::read(&versions[0].backup_path).unwrap(),
            b"version 2"
        );
    }

    #[test]
    fn test_versions_newest_first_and_latest() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), 5);
        let source = dir.path().join("doc.txt");

        for n in 0..3 {
            std::fs::write(&source, format!("version {}", n)).unwrap();
            store.create_backup(&source).unwrap();
        }

        let versions = store.versions(&source);
        assert_eq!(versions.len(), 3);
        let latest = store.latest_version(&source).unwrap();
        assert_eq!(latest.backup_path, versions[0].backup_path);
        assert_eq!(std::fs::read(&latest.backup_path).unwrap(), b"version 2");

        assert!(store.latest_version(&dir.path().join("other.txt")).is_none());
    }

    #[test]
    fn test_backup_names_are_unique() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), 10);
        let source = dir.path().join("doc.txt");
        std::fs::write(&source, b"same instant").unwrap();

        let a = store.create_backup(&source).unwrap();
        let b = store.create_backup(&source).unwrap();
        assert_ne!(a.backup_path, b.backup_path);
    }

    #[test]
    fn test_verify_checks_recorded_size() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), 3);
        let source = dir.path().join("doc.txt");
        std::fs::write(&source, b"content").unwrap();

        let record = store.create_backup(&source).unwrap();
        assert!(store.verify(&record.backup_path));

        // Tampered backup no longer matches its record
        std::fs::write(&record.backup_path, b"tampered beyond size").unwrap();
        assert!(!store.verify(&record.backup_path));

        // Deleted backup fails outright
        std::fs::remove_file(&record.backup_path).unwrap();
        assert!(!store.verify(&record.backup_path));
    }

    #[test]
    fn test_verify_unknown_path_requires_nonempty() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), 3);

        let stray = dir.path().join("stray.bak");
        std::fs::write(&stray, b"data").unwrap();
        assert!(store.verify(&stray));

        let empty = dir.path().join("empty.bak");
        std::fs::write(&empty, b"").unwrap();
        assert!(!store.verify(&empty));
    }

    #[test]
    fn test_statistics_walk_disk() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path(), 5);

        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, b"aaaa").unwrap();
        std::fs::write(&b, b"bb").unwrap();

        store.create_backup(&a).unwrap();
        store.create_backup(&a).unwrap();
        let record_b = store.create_backup(&b).unwrap();

        let stats = store.statistics();
        assert_eq!(stats.files_tracked, 2);
        assert_eq!(stats.total_versions, 3);
        assert_eq!(stats.total_bytes_on_disk, 10);
        assert_eq!(stats.retention_count, 5);

        // A missing backing file counts as zero, not an error
        std::fs::remove_file(&record_b.backup_path).unwrap();
        assert_eq!(store.statistics().total_bytes_on_disk, 8);
    }
}
