//! Automated threat response
//!
//! A background worker polls the event ledger on a fixed interval and
//! scores recent activity. On a threat it snapshots every affected file
//! still on disk; at or above the response threshold it also restores
//! them from snapshot history. Every action lands in an append-only
//! audit ledger.

use crate::detector::{DetectionResult, ThreatDetector};
use crate::ledger::EventLedger;
use crate::recovery::RecoveryEngine;
use crate::snapshot::SnapshotStore;
use crate::watcher::FileMonitor;
use anyhow::bail;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// How long stop() waits for the worker to observe the stop signal
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Kind of automated action taken in response to a threat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Backup,
    Recovery,
    Alert,
}

/// One entry in the audit ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseAction {
    pub timestamp: DateTime<Utc>,
    pub kind: ActionKind,
    pub path: PathBuf,
    pub success: bool,
    pub details: String,
    pub threat_score: u32,
}

/// Snapshot of the engine's counters and audit totals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseStatistics {
    pub is_active: bool,
    pub response_threshold: u32,
    pub total_threats_detected: u64,
    pub automatic_backups_created: u64,
    pub automatic_recoveries_performed: u64,
    /// Share of successful actions, rounded to two decimal places
    pub response_success_rate_percent: f64,
    pub total_response_actions: usize,
    pub last_threat_detection: Option<DateTime<Utc>>,
    pub last_response_action: Option<DateTime<Utc>>,
}

/// Tunables for the response worker
#[derive(Debug, Clone)]
pub struct ResponseSettings {
    /// Score at or above which automated recovery runs
    pub response_threshold: u32,
    pub poll_interval: Duration,
    /// Window handed to the ledger each cycle, in seconds
    pub analysis_window_secs: u64,
}

#[derive(Default)]
struct ResponseState {
    actions: Vec<ResponseAction>,
    total_threats: u64,
    backups_created: u64,
    recoveries_performed: u64,
    last_threat: Option<DateTime<Utc>>,
    last_action: Option<DateTime<Utc>>,
}

struct Worker {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Drives detection and automated response over the shared pipeline
pub struct ResponseEngine {
    ledger: Arc<EventLedger>,
    monitor: Arc<FileMonitor>,
    detector: ThreatDetector,
    store: Arc<SnapshotStore>,
    recovery: Arc<RecoveryEngine>,
    settings: ResponseSettings,
    state: Mutex<ResponseState>,
    active: AtomicBool,
    worker: Mutex<Option<Worker>>,
}

impl ResponseEngine {
    pub fn new(
        ledger: Arc<EventLedger>,
        monitor: Arc<FileMonitor>,
        detector: ThreatDetector,
        store: Arc<SnapshotStore>,
        recovery: Arc<RecoveryEngine>,
        settings: ResponseSettings,
    ) -> Self {
        info!(
            "automated response configured with threshold {}",
            settings.response_threshold
        );

        Self {
            ledger,
            monitor,
            detector,
            store,
            recovery,
            settings,
            state: Mutex::new(ResponseState::default()),
            active: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// Start the response worker.
    ///
    /// The file monitor must already be active; a second start while
    /// running is a no-op success.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        if self.active.load(Ordering::SeqCst) {
            warn!("automated response is already active");
            return Ok(());
        }

        if !self.monitor.is_active() {
            bail!("file monitor must be active before starting automated response");
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let engine = Arc::clone(self);

        let handle = tokio::spawn(async move {
            info!("automated response loop started");

            let mut ticker = tokio::time::interval(engine.settings.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => engine.run_cycle(),
                }
            }

            info!("automated response loop stopped");
        });

        *self.worker.lock() = Some(Worker {
            stop: stop_tx,
            handle,
        });
        self.active.store(true, Ordering::SeqCst);
        info!("automated response started");

        Ok(())
    }

    /// Stop the response worker, waiting a bounded time for it to exit.
    pub async fn stop(&self) -> anyhow::Result<()> {
        if !self.active.load(Ordering::SeqCst) {
            warn!("automated response is not active");
            return Ok(());
        }

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.stop.send(true);
            if tokio::time::timeout(STOP_TIMEOUT, worker.handle).await.is_err() {
                warn!("response worker did not stop within {:?}", STOP_TIMEOUT);
            }
        }

        self.active.store(false, Ordering::SeqCst);
        info!("automated response stopped");

        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// One poll-analyze-respond pass. Individual backup and recovery
    /// failures become failed audit entries, never worker exits.
    fn run_cycle(&self) {
        let events = self
            .ledger
            .recent_events(self.settings.analysis_window_secs);
        if events.is_empty() {
            return;
        }

        let verdict = self.detector.analyze(&events);
        if verdict.is_threat {
            self.handle_threat(&verdict);
        }
    }

    fn handle_threat(&self, verdict: &DetectionResult) {
        // One critical section keeps the audit ledger and counters
        // consistent against concurrent statistics reads.
        let mut state = self.state.lock();

        state.total_threats += 1;
        state.last_threat = Some(verdict.timestamp);

        warn!(
            "automated response triggered: score {}/100, {} affected files",
            verdict.score,
            verdict.affected_files.len()
        );
        warn!("threat reason: {}", verdict.reason);

        push_action(
            &mut state,
            ActionKind::Alert,
            Path::new("system"),
            true,
            format!("threat detected: {}", verdict.reason),
            verdict.score,
        );

        self.create_emergency_backups(&mut state, verdict);

        if verdict.score >= self.settings.response_threshold {
            error!(
                "threat score {} at or above response threshold {}, starting automated recovery",
                verdict.score, self.settings.response_threshold
            );
            self.run_automated_recovery(&mut state, verdict);
        } else {
            warn!(
                "threat score {} below response threshold {}, recovery not triggered",
                verdict.score, self.settings.response_threshold
            );
        }
    }

    fn create_emergency_backups(&self, state: &mut ResponseState, verdict: &DetectionResult) {
        info!(
            "creating emergency backups for {} affected files",
            verdict.affected_files.len()
        );

        let mut backed_up = 0usize;
        for path in &verdict.affected_files {
            if !path.is_file() {
                warn!("cannot back up {}: not accessible", path.display());
                continue;
            }

            match self.store.create_backup(path) {
                Ok(record) => {
                    state.backups_created += 1;
                    backed_up += 1;
                    push_action(
                        state,
                        ActionKind::Backup,
                        path,
                        true,
                        format!("emergency backup created: {}", record.backup_path.display()),
                        verdict.score,
                    );
                }
                Err(e) => {
                    push_action(
                        state,
                        ActionKind::Backup,
                        path,
                        false,
                        format!("emergency backup failed: {:#}", e),
                        verdict.score,
                    );
                }
            }
        }

        info!(
            "emergency backup completed: {}/{} files backed up",
            backed_up,
            verdict.affected_files.len()
        );
    }

    fn run_automated_recovery(&self, state: &mut ResponseState, verdict: &DetectionResult) {
        let results = self.recovery.restore_many(&verdict.affected_files, true);

        let mut recovered = 0usize;
        for result in results {
            if result.success {
                state.recoveries_performed += 1;
                recovered += 1;
                let details = match &result.backup_used {
                    Some(backup) => format!("recovered from {}", backup.display()),
                    None => "recovered".to_string(),
                };
                push_action(
                    state,
                    ActionKind::Recovery,
                    &result.path,
                    true,
                    details,
                    verdict.score,
                );
            } else {
                push_action(
                    state,
                    ActionKind::Recovery,
                    &result.path,
                    false,
                    format!(
                        "recovery failed: {}",
                        result.error.as_deref().unwrap_or("unknown error")
                    ),
                    verdict.score,
                );
            }
        }

        let total = verdict.affected_files.len();
        if recovered == total {
            info!("automated recovery completed: all {} files recovered", total);
        } else if recovered > 0 {
            warn!(
                "partial recovery: {} of {} files recovered",
                recovered, total
            );
        } else {
            error!("automated recovery failed for all {} files", total);
        }
    }

    /// Consistent snapshot of counters and audit totals
    pub fn statistics(&self) -> ResponseStatistics {
        let state = self.state.lock();

        let successful = state.actions.iter().filter(|a| a.success).count();
        let success_rate = if state.actions.is_empty() {
            0.0
        } else {
            let rate = successful as f64 / state.actions.len() as f64 * 100.0;
            (rate * 100.0).round() / 100.0
        };

        ResponseStatistics {
            is_active: self.is_active(),
            response_threshold: self.settings.response_threshold,
            total_threats_detected: state.total_threats,
            automatic_backups_created: state.backups_created,
            automatic_recoveries_performed: state.recoveries_performed,
            response_success_rate_percent: success_rate,
            total_response_actions: state.actions.len(),
            last_threat_detection: state.last_threat,
            last_response_action: state.last_action,
        }
    }

    /// Audit entries newer than `hours` ago, oldest first
    pub fn recent_actions(&self, hours: i64) -> Vec<ResponseAction> {
        let cutoff = Utc::now() - chrono::Duration::hours(hours);
        self.state
            .lock()
            .actions
            .iter()
            .filter(|a| a.timestamp > cutoff)
            .cloned()
            .collect()
    }
}

fn push_action(
    state: &mut ResponseState,
    kind: ActionKind,
    path: &Path,
    success: bool,
    details: String,
    threat_score: u32,
) {
    let action = ResponseAction {
        timestamp: Utc::now(),
        kind,
        path: path.to_path_buf(),
        success,
        details,
        threat_score,
    };

    match (kind, success) {
        (ActionKind::Alert, _) => warn!("response action: {:?} {}", kind, action.details),
        (_, true) => info!(
            "response action: {:?} {} - {}",
            kind,
            path.display(),
            action.details
        ),
        (_, false) => error!(
            "response action: {:?} {} - {}",
            kind,
            path.display(),
            action.details
        ),
    }

    state.last_action = Some(action.timestamp);
    state.actions.push(action);
}
