//! Rolling ledger of recent file-change events
//!
//! The file monitor appends from its notification task while the response
//! engine reads concurrently. Both sides take a short lock per operation,
//! so neither can stall the other for long.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// How long events are retained for analysis, in seconds
const RETENTION_HORIZON_SECS: i64 = 60;

/// Type of file system change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

/// A single observed file change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChangeEvent {
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
    pub kind: EventKind,
    /// Size at observation time, 0 if the file was unreadable
    pub size: u64,
}

/// Bounded, time-windowed record of recent file changes
pub struct EventLedger {
    events: Mutex<VecDeque<FileChangeEvent>>,
}

impl EventLedger {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Record a change for `path`, capturing its current on-disk size
    pub fn record(&self, kind: EventKind, path: &Path) {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        self.push(FileChangeEvent {
            timestamp: Utc::now(),
            path: path.to_path_buf(),
            kind,
            size,
        });
    }

    fn push(&self, event: FileChangeEvent) {
        let cutoff = Utc::now() - chrono::Duration::seconds(RETENTION_HORIZON_SECS);
        let mut events = self.events.lock();
        events.push_back(event);

        // Events arrive in time order, so pruning stops at the first keeper.
        while events.front().is_some_and(|e| e.timestamp <= cutoff) {
            events.pop_front();
        }
    }

    /// All retained events newer than `window_secs` ago, in arrival order
    pub fn recent_events(&self, window_secs: u64) -> Vec<FileChangeEvent> {
        let cutoff = Utc::now() - chrono::Duration::seconds(window_secs as i64);
        self.events
            .lock()
            .iter()
            .filter(|e| e.timestamp > cutoff)
            .cloned()
            .collect()
    }

    /// Count of `Modified` events within the window
    pub fn modification_count(&self, window_secs: u64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::seconds(window_secs as i64);
        self.events
            .lock()
            .iter()
            .filter(|e| e.timestamp > cutoff && e.kind == EventKind::Modified)
            .count()
    }
}

impl Default for EventLedger {
    fn default() -> Self {
        Self::new()
    }
}
