//! Fileward - ransomware activity detection with automated snapshot recovery
//!
//! This library watches a directory tree for the file-mutation patterns
//! ransomware produces, scores recent activity heuristically, and reacts
//! by snapshotting at-risk files. Past a configured severity it restores
//! affected files from snapshot history automatically.
//!
//! # Pipeline
//!
//! - **EventLedger** - rolling, thread-safe record of file changes
//! - **ThreatDetector** - rate, extension and growth heuristics
//! - **SnapshotStore** - versioned copies with retention eviction
//! - **RecoveryEngine** - restore with fallback to older versions
//! - **ResponseEngine** - polling worker tying it all together
//!
//! # Example
//!
//! ```rust,no_run
//! use fileward::{Config, Fileward};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let fileward = Fileward::new(config)?;
//!
//!     fileward.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     fileward.stop().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod daemon;
pub mod detector;
pub mod ledger;
pub mod recovery;
pub mod response;
pub mod snapshot;
pub mod watcher;

pub use config::Config;
pub use detector::{DetectionResult, ThreatDetector};
pub use ledger::{EventKind, EventLedger, FileChangeEvent};
pub use recovery::{RecoveryEngine, RecoveryResult};
pub use response::{ResponseEngine, ResponseSettings, ResponseStatistics};
pub use snapshot::{BackupRecord, SnapshotStore};
pub use watcher::FileMonitor;

use std::sync::Arc;
use std::time::Duration;

/// Top-level engine owning the whole detection-and-response pipeline.
///
/// Callers hold one of these per watched tree and drive its lifecycle
/// explicitly; there is no process-wide registry.
pub struct Fileward {
    config: Config,
    ledger: Arc<EventLedger>,
    monitor: Arc<FileMonitor>,
    store: Arc<SnapshotStore>,
    recovery: Arc<RecoveryEngine>,
    response: Arc<ResponseEngine>,
}

impl Fileward {
    /// Build the pipeline from a configuration, refusing invalid ones
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;

        let ledger = Arc::new(EventLedger::new());
        let monitor = Arc::new(FileMonitor::new(
            &config.watch_root,
            Arc::clone(&ledger),
            &config.exclude,
        )?);
        let store = Arc::new(SnapshotStore::new(
            &config.backup.directory,
            config.backup.retention_count,
        )?);
        let recovery = Arc::new(RecoveryEngine::new(Arc::clone(&store)));

        let detector = ThreatDetector::new(
            config.detection.detection_threshold as usize,
            config.detection.time_window_seconds,
            &config.detection.suspicious_extensions,
        );
        let response = Arc::new(ResponseEngine::new(
            Arc::clone(&ledger),
            Arc::clone(&monitor),
            detector,
            Arc::clone(&store),
            Arc::clone(&recovery),
            ResponseSettings {
                response_threshold: config.response.response_threshold,
                poll_interval: Duration::from_secs(config.response.poll_interval_seconds),
                analysis_window_secs: config.response.analysis_window_seconds,
            },
        ));

        Ok(Self {
            config,
            ledger,
            monitor,
            store,
            recovery,
            response,
        })
    }

    /// Start monitoring and automated response
    pub async fn start(&self) -> anyhow::Result<()> {
        self.monitor.start()?;
        self.response.start().await?;
        Ok(())
    }

    /// Stop automated response, then monitoring
    pub async fn stop(&self) -> anyhow::Result<()> {
        self.response.stop().await?;
        self.monitor.stop().await?;
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<EventLedger> {
        &self.ledger
    }

    pub fn monitor(&self) -> &Arc<FileMonitor> {
        &self.monitor
    }

    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn recovery(&self) -> &Arc<RecoveryEngine> {
        &self.recovery
    }

    pub fn response(&self) -> &Arc<ResponseEngine> {
        &self.response
    }
}
