//! Configuration management

use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory tree to watch
    #[serde(default = "default_watch_root")]
    pub watch_root: PathBuf,

    /// Paths/patterns excluded from monitoring
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,

    /// Detection thresholds
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Snapshot storage
    #[serde(default)]
    pub backup: BackupConfig,

    /// Automated response behavior
    #[serde(default)]
    pub response: ResponseConfig,

    /// Daemon configuration
    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch_root: default_watch_root(),
            exclude: default_exclude(),
            detection: DetectionConfig::default(),
            backup: BackupConfig::default(),
            response: ResponseConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject configurations monitoring cannot safely start with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.detection.detection_threshold == 0 {
            bail!("detection_threshold must be positive");
        }
        if self.detection.time_window_seconds == 0 {
            bail!("time_window_seconds must be positive");
        }
        if self.detection.suspicious_extensions.is_empty() {
            bail!("at least one suspicious extension is required");
        }
        for ext in &self.detection.suspicious_extensions {
            if !ext.starts_with('.') || ext.len() < 2 {
                bail!("suspicious extension {:?} must start with a dot", ext);
            }
        }
        if self.backup.retention_count == 0 {
            bail!("backup retention_count must be positive");
        }
        if self.response.response_threshold > 100 {
            bail!("response_threshold must be within 0-100");
        }
        if self.response.poll_interval_seconds == 0 {
            bail!("poll_interval_seconds must be positive");
        }
        if self.response.analysis_window_seconds == 0 {
            bail!("analysis_window_seconds must be positive");
        }

        Ok(())
    }
}

/// Detection thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Created/modified events per window before the rate signal fires
    #[serde(default = "default_detection_threshold")]
    pub detection_threshold: u32,

    /// Analysis window in seconds
    #[serde(default = "default_time_window")]
    pub time_window_seconds: u64,

    /// Extensions treated as encryption markers, case-insensitive
    #[serde(default = "default_suspicious_extensions")]
    pub suspicious_extensions: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            detection_threshold: default_detection_threshold(),
            time_window_seconds: default_time_window(),
            suspicious_extensions: default_suspicious_extensions(),
        }
    }
}

/// Snapshot storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Where snapshot copies are kept
    #[serde(default = "default_backup_directory")]
    pub directory: PathBuf,

    /// Snapshot versions kept per file
    #[serde(default = "default_retention_count")]
    pub retention_count: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            directory: default_backup_directory(),
            retention_count: default_retention_count(),
        }
    }
}

/// Automated response configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Threat score at or above which automated recovery runs (0-100)
    #[serde(default = "default_response_threshold")]
    pub response_threshold: u32,

    /// Seconds between response worker cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Ledger window analyzed each cycle, in seconds
    #[serde(default = "default_analysis_window")]
    pub analysis_window_seconds: u64,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            response_threshold: default_response_threshold(),
            poll_interval_seconds: default_poll_interval(),
            analysis_window_seconds: default_analysis_window(),
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// PID file path
    #[serde(default = "default_pid_path")]
    pub pid_file: PathBuf,

    /// Socket path for IPC
    #[serde(default = "default_socket_path")]
    pub socket: PathBuf,

    /// Log file path
    #[serde(default = "default_log_path")]
    pub log_file: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_path(),
            socket: default_socket_path(),
            log_file: default_log_path(),
        }
    }
}

// Default value functions for serde

fn default_watch_root() -> PathBuf {
    PathBuf::from("/home")
}

fn default_exclude() -> Vec<String> {
    vec![
        "*.log".to_string(),
        "*.tmp".to_string(),
        "/tmp/**".to_string(),
        "/var/lib/fileward/**".to_string(),
    ]
}

fn default_detection_threshold() -> u32 {
    5
}

fn default_time_window() -> u64 {
    10
}

fn default_suspicious_extensions() -> Vec<String> {
    [".encrypted", ".locked", ".crypto", ".crypt", ".enc", ".vault"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_backup_directory() -> PathBuf {
    PathBuf::from("/var/lib/fileward/snapshots")
}

fn default_retention_count() -> usize {
    5
}

fn default_response_threshold() -> u32 {
    50
}

fn default_poll_interval() -> u64 {
    2
}

fn default_analysis_window() -> u64 {
    10
}

fn default_pid_path() -> PathBuf {
    PathBuf::from("/run/fileward.pid")
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/run/fileward.sock")
}

fn default_log_path() -> PathBuf {
    PathBuf::from("/var/log/fileward.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detection.detection_threshold, 5);
        assert_eq!(config.response.response_threshold, 50);
        assert!(!config.detection.suspicious_extensions.is_empty());
    }

    #[test]
    fn test_zero_thresholds_are_rejected() {
        let mut config = Config::default();
        config.detection.detection_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.backup.retention_count = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.response.poll_interval_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_response_threshold_range() {
        let mut config = Config::default();
        config.response.response_threshold = 101;
        assert!(config.validate().is_err());

        config.response.response_threshold = 100;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_extensions_must_be_dot_prefixed() {
        let mut config = Config::default();
        config.detection.suspicious_extensions = vec!["encrypted".to_string()];
        assert!(config.validate().is_err());

        config.detection.suspicious_extensions = Vec::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let mut config = Config::default();
        config.response.response_threshold = 80;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.response.response_threshold, 80);
        assert_eq!(loaded.watch_root, config.watch_root);
    }
}
