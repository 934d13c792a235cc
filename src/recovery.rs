//! File restoration from snapshot history
//!
//! Restores always start from the newest snapshot and walk the fallback
//! chain of older versions until one can be copied back. Integrity
//! verification compares size against the record and content hash
//! against the backup; a hash mismatch with a matching size is accepted
//! with a warning rather than failing the restore.

use crate::snapshot::{BackupRecord, SnapshotStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of restoring one file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub path: PathBuf,
    pub success: bool,
    /// Snapshot the content was taken from, when any attempt succeeded
    pub backup_used: Option<PathBuf>,
    pub error: Option<String>,
    pub verification_passed: bool,
}

/// Running counters over all restore calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStatistics {
    pub total_attempts: u64,
    pub successful_recoveries: u64,
    pub failed_recoveries: u64,
    /// Rounded to two decimal places
    pub success_rate_percent: f64,
    pub recovered_paths: Vec<PathBuf>,
}

#[derive(Default)]
struct RecoveryCounters {
    total_attempts: u64,
    successful: u64,
    failed: u64,
    recovered: Vec<PathBuf>,
}

/// Restores files from the snapshot store
pub struct RecoveryEngine {
    store: Arc<SnapshotStore>,
    counters: Mutex<RecoveryCounters>,
}

impl RecoveryEngine {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self {
            store,
            counters: Mutex::new(RecoveryCounters::default()),
        }
    }

    /// Restore a single file from its newest snapshot, falling back to
    /// older versions when the newest cannot be restored.
    pub fn restore_one(&self, path: &Path, verify_integrity: bool) -> RecoveryResult {
        self.counters.lock().total_attempts += 1;

        let Some(latest) = self.store.latest_version(path) else {
            let message = format!("no backup found for {}", path.display());
            error!("{}", message);
            self.counters.lock().failed += 1;
            return failure(path, None, message);
        };

        let mut result = self.attempt_restore(path, &latest, verify_integrity);
        if !result.success {
            warn!(
                "newest snapshot failed for {}, trying previous versions",
                path.display()
            );
            result = self.try_fallbacks(path, verify_integrity);
        }

        let mut counters = self.counters.lock();
        if result.success {
            counters.successful += 1;
            counters.recovered.push(path.to_path_buf());
            info!(
                "restored {} from {}",
                path.display(),
                result
                    .backup_used
                    .as_deref()
                    .unwrap_or(Path::new("?"))
                    .display()
            );
        } else {
            counters.failed += 1;
            error!(
                "failed to restore {}: {}",
                path.display(),
                result.error.as_deref().unwrap_or("unknown error")
            );
        }

        result
    }

    /// Restore several files sequentially, in input order
    pub fn restore_many(&self, paths: &[PathBuf], verify_integrity: bool) -> Vec<RecoveryResult> {
        info!("starting batch restoration of {} files", paths.len());

        let results: Vec<RecoveryResult> = paths
            .iter()
            .map(|path| self.restore_one(path, verify_integrity))
            .collect();

        let successful = results.iter().filter(|r| r.success).count();
        info!(
            "batch restoration completed: {} successful, {} failed",
            successful,
            results.len() - successful
        );

        results
    }

    pub fn statistics(&self) -> RecoveryStatistics {
        let counters = self.counters.lock();
        let success_rate = if counters.total_attempts > 0 {
            let rate = counters.successful as f64 / counters.total_attempts as f64 * 100.0;
            (rate * 100.0).round() / 100.0
        } else {
            0.0
        };

        RecoveryStatistics {
            total_attempts: counters.total_attempts,
            successful_recoveries: counters.successful,
            failed_recoveries: counters.failed,
            success_rate_percent: success_rate,
            recovered_paths: counters.recovered.clone(),
        }
    }

    fn attempt_restore(
        &self,
        path: &Path,
        record: &BackupRecord,
        verify_integrity: bool,
    ) -> RecoveryResult {
        if !record.backup_path.is_file() {
            return failure(
                path,
                Some(record.backup_path.clone()),
                format!("backup file does not exist: {}", record.backup_path.display()),
            );
        }

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return failure(
                    path,
                    Some(record.backup_path.clone()),
                    format!("creating {}: {}", parent.display(), e),
                );
            }
        }

        if let Err(e) = std::fs::copy(&record.backup_path, path) {
            return failure(
                path,
                Some(record.backup_path.clone()),
                format!("copying {}: {}", record.backup_path.display(), e),
            );
        }

        let verification_passed = if verify_integrity {
            self.verify_restoration(path, record)
        } else {
            true
        };

        RecoveryResult {
            path: path.to_path_buf(),
            success: true,
            backup_used: Some(record.backup_path.clone()),
            error: None,
            verification_passed,
        }
    }

    fn try_fallbacks(&self, path: &Path, verify_integrity: bool) -> RecoveryResult {
        // Newest already failed; walk the rest in descending recency
        let fallbacks: Vec<BackupRecord> =
            self.store.versions(path).into_iter().skip(1).collect();

        if fallbacks.is_empty() {
            return failure(path, None, "no fallback backups available".to_string());
        }

        for record in &fallbacks {
            info!("trying fallback snapshot {}", record.backup_path.display());
            let result = self.attempt_restore(path, record, verify_integrity);
            if result.success {
                info!("fallback restoration succeeded using snapshot from {}", record.timestamp);
                return result;
            }
        }

        failure(
            path,
            None,
            "all backup restoration attempts failed".to_string(),
        )
    }

    /// Size must match the record; a content-hash mismatch once size
    /// matches is reported but tolerated.
    fn verify_restoration(&self, path: &Path, record: &BackupRecord) -> bool {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                error!("restored file {} is unreadable: {}", path.display(), e);
                return false;
            }
        };

        if metadata.len() != record.size {
            error!(
                "size mismatch for {}: expected {}, got {}",
                path.display(),
                record.size,
                metadata.len()
            );
            return false;
        }

        let hashes_match = match (file_digest(path), file_digest(&record.backup_path)) {
            (Ok(restored), Ok(backup)) => restored == backup,
            _ => false,
        };

        if !hashes_match {
            warn!(
                "hash verification failed for {}, but size matches",
                path.display()
            );
        }

        true
    }
}

/// Chunked SHA-256 so large files never load whole
fn file_digest(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

fn failure(path: &Path, backup_used: Option<PathBuf>, message: String) -> RecoveryResult {
    RecoveryResult {
        path: path.to_path_buf(),
        success: false,
        backup_used,
        error: Some(message),
        verification_passed: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fixture(retention: usize) -> (tempfile::TempDir, Arc<SnapshotStore>, RecoveryEngine) {
        let dir = tempdir().unwrap();
        let store = Arc::new(SnapshotStore::new(dir.path().join("snapshots"), retention).unwrap());
        let engine = RecoveryEngine::new(Arc::clone(&store));
        (dir, store, engine)
    }

    #[test]
    fn test_restore_without_backup_fails() {
        let (dir, _store, engine) = fixture(3);

        let result = engine.restore_one(&dir.path().join("nothing.txt"), true);
        assert!(!result.success);
        assert!(result.backup_used.is_none());
        assert!(result.error.unwrap().contains("no backup found"));

        let stats = engine.statistics();
        assert_eq!(stats.total_attempts, 1);
        assert_eq!(stats.failed_recoveries, 1);
        assert_eq!(stats.success_rate_percent, 0.0);
    }

    #[test]
    fn test_round_trip_restore() {
        let (dir, store, engine) = fixture(3);
        let target = dir.path().join("doc.txt");

        std::fs::write(&target, b"precious data").unwrap();
        store.create_backup(&target).unwrap();

        std::fs::write(&target, b"ENCRYPTED GARBAGE ENCRYPTED GARBAGE").unwrap();

        let result = engine.restore_one(&target, true);
        assert!(result.success);
        assert!(result.verification_passed);
        assert_eq!(std::fs::read(&target).unwrap(), b"precious data");
    }

    #[test]
    fn test_restore_recreates_deleted_file() {
        let (dir, store, engine) = fixture(3);
        let target = dir.path().join("sub").join("doc.txt");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();

        std::fs::write(&target, b"keep me").unwrap();
        store.create_backup(&target).unwrap();

        std::fs::remove_file(&target).unwrap();
        std::fs::remove_dir(target.parent().unwrap()).unwrap();

        let result = engine.restore_one(&target, true);
        assert!(result.success);
        assert_eq!(std::fs::read(&target).unwrap(), b"keep me");
    }

    #[test]
    fn test_fallback_to_older_version() {
        let (dir, store, engine) = fixture(5);
        let target = dir.path().join("doc.txt");

        std::fs::write(&target, b"version 0").unwrap();
        let older = store.create_backup(&target).unwrap();
        std::fs::write(&target, b"version 1").unwrap();
        let newest = store.create_backup(&target).unwrap();

        // Newest snapshot lost from disk before the restore
        std::fs::remove_file(&newest.backup_path).unwrap();
        std::fs::write(&target, b"ransomware was here").unwrap();

        let result = engine.restore_one(&target, true);
        assert!(result.success);
        assert_eq!(result.backup_used, Some(older.backup_path.clone()));
        assert_eq!(std::fs::read(&target).unwrap(), b"version 0");

        let stats = engine.statistics();
        assert_eq!(stats.successful_recoveries, 1);
        assert_eq!(stats.recovered_paths, vec![target]);
    }

    #[test]
    fn test_exhausted_fallback_chain() {
        let (dir, store, engine) = fixture(5);
        let target = dir.path().join("doc.txt");

        std::fs::write(&target, b"v0").unwrap();
        let a = store.create_backup(&target).unwrap();
        std::fs::write(&target, b"v1").unwrap();
        let b = store.create_backup(&target).unwrap();

        std::fs::remove_file(&a.backup_path).unwrap();
        std::fs::remove_file(&b.backup_path).unwrap();

        let result = engine.restore_one(&target, true);
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("all backup restoration attempts failed")
        );
        assert_eq!(engine.statistics().failed_recoveries, 1);
    }

    #[test]
    fn test_size_mismatch_fails_verification_only() {
        let (dir, store, engine) = fixture(5);
        let target = dir.path().join("doc.txt");

        std::fs::write(&target, b"original").unwrap();
        let record = store.create_backup(&target).unwrap();

        // Backup grows behind the store's back: the copy succeeds but the
        // restored size no longer matches the record.
        std::fs::write(&record.backup_path, b"original plus tampering").unwrap();

        let result = engine.restore_one(&target, true);
        assert!(result.success);
        assert!(!result.verification_passed);
    }

    #[test]
    fn test_restore_many_preserves_order_and_counts() {
        let (dir, store, engine) = fixture(5);

        let good = dir.path().join("good.txt");
        std::fs::write(&good, b"fine").unwrap();
        store.create_backup(&good).unwrap();

        let missing = dir.path().join("missing.txt");
        let paths = vec![good.clone(), missing.clone()];

        let results = engine.restore_many(&paths, true);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].path, good);
        assert!(results[0].success);
        assert_eq!(results[1].path, missing);
        assert!(!results[1].success);

        let stats = engine.statistics();
        assert_eq!(stats.total_attempts, 2);
        assert_eq!(stats.successful_recoveries, 1);
        assert_eq!(stats.failed_recoveries, 1);
        assert_eq!(stats.success_rate_percent, 50.0);
    }
}
