//! Heuristic threat scoring over recent file activity
//!
//! Three independent signals feed the verdict: the raw rate of file
//! churn, writes to paths carrying known ransomware extensions, and
//! files that suddenly grow the way they do under encryption overhead.
//! Each signal contributes a capped sub-score; the sum is capped at 100.

use crate::ledger::{EventKind, FileChangeEvent};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Score at or above which a verdict counts as a threat
pub const THREAT_SCORE_FLOOR: u32 = 50;

const RATE_BASE: u32 = 30;
const RATE_PER_EXCESS: u32 = 5;
const RATE_CAP: u32 = 50;

const EXTENSION_BASE: u32 = 40;
const EXTENSION_PER_HIT: u32 = 10;
const EXTENSION_CAP: u32 = 60;

const GROWTH_BASE: u32 = 20;
const GROWTH_PER_PATH: u32 = 5;
const GROWTH_CAP: u32 = 30;

/// Size increase ratio beyond which a rewrite looks like encryption overhead
const GROWTH_RATIO: f64 = 1.2;

/// Outcome of one analysis pass
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub is_threat: bool,
    /// 0-100
    pub score: u32,
    /// Deduplicated union of paths flagged by any signal, sorted
    pub affected_files: Vec<PathBuf>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Pattern-based ransomware detector
pub struct ThreatDetector {
    detection_threshold: usize,
    time_window_secs: u64,
    suspicious_extensions: Vec<String>,
}

impl ThreatDetector {
    pub fn new(
        detection_threshold: usize,
        time_window_secs: u64,
        suspicious_extensions: &[String],
    ) -> Self {
        // Case-folded once so per-event checks stay cheap
        let suspicious_extensions = suspicious_extensions
            .iter()
            .map(|ext| ext.to_lowercase())
            .collect();

        Self {
            detection_threshold,
            time_window_secs,
            suspicious_extensions,
        }
    }

    /// Analyze a batch of events for ransomware patterns
    pub fn analyze(&self, events: &[FileChangeEvent]) -> DetectionResult {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.time_window_secs as i64);
        let recent: Vec<&FileChangeEvent> =
            events.iter().filter(|e| e.timestamp > cutoff).collect();

        if recent.is_empty() {
            return DetectionResult {
                is_threat: false,
                score: 0,
                affected_files: Vec::new(),
                reason: "No recent file activity".to_string(),
                timestamp: Utc::now(),
            };
        }

        let mut score = 0;
        let mut reasons = Vec::new();
        let mut affected = BTreeSet::new();

        let (rate, rate_files) = self.rate_score(&recent);
        if rate > 0 {
            reasons.push(format!(
                "High modification rate: {} files in {}s",
                rate_files.len(),
                self.time_window_secs
            ));
        }
        score += rate;
        affected.extend(rate_files);

        let (extension, extension_files) = self.extension_score(&recent);
        if extension > 0 {
            reasons.push(format!(
                "Suspicious file extensions detected: {} files",
                extension_files.len()
            ));
        }
        score += extension;
        affected.extend(extension_files);

        let (growth, growth_files) = self.growth_score(&recent);
        if growth > 0 {
            reasons.push(format!(
                "Rapid file size changes: {} files",
                growth_files.len()
            ));
        }
        score += growth;
        affected.extend(growth_files);

        let score = score.min(100);
        let is_threat = score >= THREAT_SCORE_FLOOR;
        let reason = if reasons.is_empty() {
            "No threats detected".to_string()
        } else {
            reasons.join("; ")
        };

        if is_threat {
            warn!(
                "threat detected: score {}/100, {} affected files, {}",
                score,
                affected.len(),
                reason
            );
        } else {
            debug!("no threat: score {}/100", score);
        }

        DetectionResult {
            is_threat,
            score,
            affected_files: affected.into_iter().collect(),
            reason,
            timestamp: Utc::now(),
        }
    }

    /// Check whether a single file name carries a suspicious extension
    pub fn is_suspicious_path(&self, path: &Path) -> bool {
        let lowered = path.to_string_lossy().to_lowercase();
        self.suspicious_extensions
            .iter()
            .any(|ext| lowered.ends_with(ext))
    }

    fn rate_score(&self, events: &[&FileChangeEvent]) -> (u32, Vec<PathBuf>) {
        let hits: Vec<PathBuf> = events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Created | EventKind::Modified))
            .map(|e| e.path.clone())
            .collect();

        if hits.len() >= self.detection_threshold {
            let excess = (hits.len() - self.detection_threshold) as u32;
            let score = (RATE_BASE + excess * RATE_PER_EXCESS).min(RATE_CAP);
            (score, hits)
        } else {
            (0, Vec::new())
        }
    }

    fn extension_score(&self, events: &[&FileChangeEvent]) -> (u32, Vec<PathBuf>) {
        let hits: Vec<PathBuf> = events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Created | EventKind::Modified))
            .filter(|e| self.is_suspicious_path(&e.path))
            .map(|e| e.path.clone())
            .collect();

        if hits.is_empty() {
            (0, Vec::new())
        } else {
            let score = (EXTENSION_BASE + hits.len() as u32 * EXTENSION_PER_HIT).min(EXTENSION_CAP);
            (score, hits)
        }
    }

    fn growth_score(&self, events: &[&FileChangeEvent]) -> (u32, Vec<PathBuf>) {
        let mut by_path: HashMap<&Path, Vec<&FileChangeEvent>> = HashMap::new();
        for &event in events {
            if event.kind == EventKind::Modified {
                by_path.entry(event.path.as_path()).or_default().push(event);
            }
        }

        let mut hits = Vec::new();
        for (path, mut history) in by_path {
            if history.len() < 2 {
                continue;
            }
            history.sort_by_key(|e| e.timestamp);

            for pair in history.windows(2) {
                let previous = pair[0].size;
                let current = pair[1].size;
                if previous > 0
                    && current > previous
                    && current as f64 / previous as f64 > GROWTH_RATIO
                {
                    hits.push(path.to_path_buf());
                    break;
                }
            }
        }

        if hits.is_empty() {
            (0, Vec::new())
        } else {
            let score = (GROWTH_BASE + hits.len() as u32 * GROWTH_PER_PATH).min(GROWTH_CAP);
            (score, hits)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> ThreatDetector {
        ThreatDetector::new(
            5,
            10,
            &[".encrypted".to_string(), ".locked".to_string()],
        )
    }

    fn event(kind: EventKind, path: &str, size: u64) -> FileChangeEvent {
        FileChangeEvent {
            timestamp: Utc::now(),
            path: PathBuf::from(path),
            kind,
            size,
        }
    }

    fn event_at(offset_secs: i64, kind: EventKind, path: &str, size: u64) -> FileChangeEvent {
        let mut e = event(kind, path, size);
        e.timestamp = Utc::now() - chrono::Duration::seconds(offset_secs);
        e
    }

    #[test]
    fn test_empty_batch_is_not_a_threat() {
        let result = detector().analyze(&[]);
        assert!(!result.is_threat);
        assert_eq!(result.score, 0);
        assert_eq!(result.reason, "No recent file activity");
        assert!(result.affected_files.is_empty());
    }

    #[test]
    fn test_stale_events_are_ignored() {
        let events: Vec<_> = (0..10)
            .map(|i| event_at(30, EventKind::Modified, &format!("/data/f{}.txt", i), 100))
            .collect();

        let result = detector().analyze(&events);
        assert_eq!(result.score, 0);
        assert_eq!(result.reason, "No recent file activity");
    }

    #[test]
    fn test_modification_rate_scoring() {
        // 7 events, threshold 5: 30 + 5 * 2 = 40
        let events: Vec<_> = (0..7)
            .map(|i| event(EventKind::Modified, &format!("/data/f{}.txt", i), 100))
            .collect();

        let result = detector().analyze(&events);
        assert_eq!(result.score, 40);
        assert!(!result.is_threat);
        assert_eq!(result.affected_files.len(), 7);
    }

    #[test]
    fn test_rate_sub_score_is_capped() {
        let events: Vec<_> = (0..50)
            .map(|i| event(EventKind::Created, &format!("/data/f{}.txt", i), 100))
            .collect();

        let result = detector().analyze(&events);
        // rate capped at 50
        assert_eq!(result.score, 50);
        assert!(result.is_threat);
    }

    #[test]
    fn test_suspicious_extension_scoring() {
        // 2 hits: min(40 + 2 * 10, 60) = 60, case-insensitive
        let events = vec![
            event(EventKind::Modified, "/data/report.LOCKED", 100),
            event(EventKind::Created, "/data/notes.locked", 100),
        ];

        let result = detector().analyze(&events);
        assert_eq!(result.score, 60);
        assert!(result.is_threat);
        assert!(result.reason.contains("Suspicious file extensions"));
    }

    #[test]
    fn test_growth_heuristic_threshold() {
        // 30% growth flags, 10% does not
        let growing = vec![
            event_at(4, EventKind::Modified, "/data/a.txt", 100),
            event_at(2, EventKind::Modified, "/data/a.txt", 130),
        ];
        let result = detector().analyze(&growing);
        assert_eq!(result.score, 25);
        assert_eq!(result.affected_files, vec![PathBuf::from("/data/a.txt")]);

        let steady = vec![
            event_at(4, EventKind::Modified, "/data/a.txt", 100),
            event_at(2, EventKind::Modified, "/data/a.txt", 110),
        ];
        assert_eq!(detector().analyze(&steady).score, 0);
    }

    #[test]
    fn test_growth_ignores_unknown_previous_size() {
        let events = vec![
            event_at(4, EventKind::Modified, "/data/a.txt", 0),
            event_at(2, EventKind::Modified, "/data/a.txt", 500),
        ];
        assert_eq!(detector().analyze(&events).score, 0);
    }

    #[test]
    fn test_threat_floor_spans_sub_scores() {
        // 5 creations of suspicious files: rate 30 + extension min(40+50,60)=60 -> 90
        let events: Vec<_> = (0..5)
            .map(|i| event(EventKind::Created, &format!("/data/f{}.encrypted", i), 100))
            .collect();

        let result = detector().analyze(&events);
        assert_eq!(result.score, 90);
        assert!(result.is_threat);
        assert!(result.score >= THREAT_SCORE_FLOOR);
    }

    #[test]
    fn test_score_never_exceeds_100() {
        // Saturate every signal at once
        let mut events: Vec<_> = (0..40)
            .map(|i| event(EventKind::Created, &format!("/data/f{}.encrypted", i), 100))
            .collect();
        for i in 0..10 {
            let path = format!("/data/g{}.encrypted", i);
            events.push(event_at(4, EventKind::Modified, &path, 100));
            events.push(event_at(2, EventKind::Modified, &path, 200));
        }

        let result = detector().analyze(&events);
        assert_eq!(result.score, 100);
        assert!(result.is_threat);
    }

    #[test]
    fn test_affected_files_are_deduplicated() {
        let events = vec![
            event_at(4, EventKind::Modified, "/data/a.encrypted", 100),
            event_at(2, EventKind::Modified, "/data/a.encrypted", 200),
        ];

        let result = detector().analyze(&events);
        assert_eq!(
            result.affected_files,
            vec![PathBuf::from("/data/a.encrypted")]
        );
    }
}
