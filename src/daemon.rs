//! Daemon management
//!
//! The daemon owns a [`Fileward`] pipeline and serves status, audit and
//! manual backup/restore requests over a Unix socket using
//! length-prefixed JSON messages.

use crate::config::Config;
use crate::recovery::{RecoveryResult, RecoveryStatistics};
use crate::response::{ResponseAction, ResponseStatistics};
use crate::snapshot::{BackupRecord, SnapshotStats};
use crate::Fileward;
use std::path::PathBuf;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{info, warn};

/// Commands that can be sent to the daemon
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Command {
    /// Get current status
    Status,
    /// Get response/snapshot/recovery statistics
    Stats,
    /// Get audit ledger entries from the last N hours
    Actions { hours: i64 },
    /// Snapshot a file manually
    Backup(PathBuf),
    /// Restore files from snapshot history
    Restore { paths: Vec<PathBuf>, verify: bool },
    /// Shutdown the daemon
    Shutdown,
}

/// Response from daemon
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Response {
    Ok,
    Error(String),
    Status(DaemonStatus),
    Stats(StatsReport),
    Actions(Vec<ResponseAction>),
    Backup(BackupRecord),
    Restore(Vec<RecoveryResult>),
}

/// Daemon status information
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: u32,
    pub uptime_secs: u64,
    pub watch_root: PathBuf,
    pub monitor_active: bool,
    pub response_active: bool,
    pub recent_modifications: usize,
    pub threats_detected: u64,
    pub backups_created: u64,
    pub recoveries_performed: u64,
}

/// Combined statistics over every pipeline stage
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StatsReport {
    pub response: ResponseStatistics,
    pub snapshots: SnapshotStats,
    pub recovery: RecoveryStatistics,
}

/// Start the Fileward daemon
pub async fn start(config: Config, foreground: bool) -> anyhow::Result<()> {
    if is_running(&config) {
        anyhow::bail!("fileward is already running");
    }

    if !foreground {
        daemonize(&config)?;
    }

    write_pid_file(&config.daemon.pid_file)?;

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    let _ = std::fs::remove_file(&config.daemon.socket);
    let listener = UnixListener::bind(&config.daemon.socket)?;

    info!(
        "fileward daemon started, listening on {:?}",
        config.daemon.socket
    );

    let fileward = Fileward::new(config.clone())?;
    fileward.start().await?;
    let started = Instant::now();

    loop {
        tokio::select! {
            Ok((stream, _)) = listener.accept() => {
                match handle_client(stream, &fileward, started).await {
                    Ok(true) => {
                        info!("shutdown requested over IPC");
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => warn!("IPC client error: {:#}", e),
                }
            }

            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down...");
                break;
            }

            _ = sigint.recv() => {
                info!("received SIGINT, shutting down...");
                break;
            }
        }
    }

    fileward.stop().await?;
    cleanup(&config);

    Ok(())
}

/// Stop a running daemon via its PID file
pub async fn stop(config: &Config) -> anyhow::Result<()> {
    if !is_running(config) {
        println!("fileward is not running");
        return Ok(());
    }

    let pid = read_pid_file(&config.daemon.pid_file)?;

    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid as i32),
        nix::sys::signal::Signal::SIGTERM,
    )?;

    println!("sent shutdown signal to fileward (PID {})", pid);

    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if !is_running(config) {
            println!("fileward stopped");
            return Ok(());
        }
    }

    warn!("fileward did not stop gracefully, sending SIGKILL");
    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid as i32),
        nix::sys::signal::Signal::SIGKILL,
    )?;

    Ok(())
}

/// Check daemon status
pub async fn status(config: &Config) -> anyhow::Result<()> {
    if !is_running(config) {
        println!("fileward is not running");
        return Ok(());
    }

    match send_command(config, Command::Status).await {
        Ok(()) => {}
        Err(e) => {
            println!("fileward is running but not responding: {}", e);
        }
    }

    Ok(())
}

/// Send a command to the running daemon and print its reply
pub async fn send_command(config: &Config, cmd: Command) -> anyhow::Result<()> {
    let mut stream = UnixStream::connect(&config.daemon.socket).await?;

    let cmd_bytes = serde_json::to_vec(&cmd)?;
    let len = cmd_bytes.len() as u32;
    stream.write_all(&len.to_le_bytes()).await?;
    stream.write_all(&cmd_bytes).await?;

    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    let mut response_bytes = vec![0u8; len];
    stream.read_exact(&mut response_bytes).await?;

    let response: Response = serde_json::from_slice(&response_bytes)?;

    match response {
        Response::Ok => println!("OK"),
        Response::Error(e) => println!("error: {}", e),
        Response::Status(status) => print_status(&status),
        Response::Stats(report) => print_stats(&report),
        Response::Actions(actions) => print_actions(&actions),
        Response::Backup(record) => {
            println!(
                "snapshot created: {} -> {}",
                record.original_path.display(),
                record.backup_path.display()
            );
        }
        Response::Restore(results) => {
            for result in &results {
                if result.success {
                    println!(
                        "restored {} (from {})",
                        result.path.display(),
                        result
                            .backup_used
                            .as_deref()
                            .map(|p| p.display().to_string())
                            .unwrap_or_default()
                    );
                } else {
                    println!(
                        "failed to restore {}: {}",
                        result.path.display(),
                        result.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }
    }

    Ok(())
}

// Helper functions

async fn handle_client(
    mut stream: UnixStream,
    fileward: &Fileward,
    started: Instant,
) -> anyhow::Result<bool> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    let mut cmd_bytes = vec![0u8; len];
    stream.read_exact(&mut cmd_bytes).await?;

    let cmd: Command = serde_json::from_slice(&cmd_bytes)?;
    let mut shutdown = false;

    let response = match cmd {
        Command::Status => {
            let stats = fileward.response().statistics();
            Response::Status(DaemonStatus {
                running: true,
                pid: std::process::id(),
                uptime_secs: started.elapsed().as_secs(),
                watch_root: fileward.monitor().root().to_path_buf(),
                monitor_active: fileward.monitor().is_active(),
                response_active: fileward.response().is_active(),
                recent_modifications: fileward.ledger().modification_count(60),
                threats_detected: stats.total_threats_detected,
                backups_created: stats.automatic_backups_created,
                recoveries_performed: stats.automatic_recoveries_performed,
            })
        }

        Command::Stats => Response::Stats(StatsReport {
            response: fileward.response().statistics(),
            snapshots: fileward.snapshots().statistics(),
            recovery: fileward.recovery().statistics(),
        }),

        Command::Actions { hours } => {
            Response::Actions(fileward.response().recent_actions(hours))
        }

        Command::Backup(path) => match fileward.snapshots().create_backup(&path) {
            Ok(record) => Response::Backup(record),
            Err(e) => Response::Error(format!("{:#}", e)),
        },

        Command::Restore { paths, verify } => {
            Response::Restore(fileward.recovery().restore_many(&paths, verify))
        }

        Command::Shutdown => {
            shutdown = true;
            Response::Ok
        }
    };

    let response_bytes = serde_json::to_vec(&response)?;
    let len = response_bytes.len() as u32;
    stream.write_all(&len.to_le_bytes()).await?;
    stream.write_all(&response_bytes).await?;

    Ok(shutdown)
}

fn daemonize(config: &Config) -> anyhow::Result<()> {
    use daemonize::Daemonize;

    let stdout = std::fs::File::create(&config.daemon.log_file)?;
    let stderr = stdout.try_clone()?;

    let daemonize = Daemonize::new()
        .pid_file(&config.daemon.pid_file)
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr);

    daemonize.start()?;

    Ok(())
}

fn write_pid_file(path: &std::path::Path) -> anyhow::Result<()> {
    let pid = std::process::id();
    std::fs::write(path, pid.to_string())?;
    Ok(())
}

fn read_pid_file(path: &std::path::Path) -> anyhow::Result<u32> {
    let content = std::fs::read_to_string(path)?;
    let pid: u32 = content.trim().parse()?;
    Ok(pid)
}

fn is_running(config: &Config) -> bool {
    if !config.daemon.pid_file.exists() {
        return false;
    }

    if let Ok(pid) = read_pid_file(&config.daemon.pid_file) {
        let proc_path = format!("/proc/{}", pid);
        return std::path::Path::new(&proc_path).exists();
    }

    false
}

fn cleanup(config: &Config) {
    let _ = std::fs::remove_file(&config.daemon.pid_file);
    let _ = std::fs::remove_file(&config.daemon.socket);
}

fn print_status(status: &DaemonStatus) {
    println!("Fileward Status");
    println!("───────────────────────────────");
    println!(
        "Status:            {}",
        if status.running { "● Running" } else { "○ Stopped" }
    );
    println!("PID:               {}", status.pid);
    println!("Uptime:            {} seconds", status.uptime_secs);
    println!("Watch root:        {}", status.watch_root.display());
    println!(
        "Monitor:           {}",
        if status.monitor_active { "active" } else { "inactive" }
    );
    println!(
        "Response:          {}",
        if status.response_active { "active" } else { "inactive" }
    );
    println!("Recent changes:    {} (last 60s)", status.recent_modifications);
    println!("Threats detected:  {}", status.threats_detected);
    println!("Backups created:   {}", status.backups_created);
    println!("Files recovered:   {}", status.recoveries_performed);
}

fn print_stats(report: &StatsReport) {
    println!("Response");
    println!("  threats detected:     {}", report.response.total_threats_detected);
    println!("  backups created:      {}", report.response.automatic_backups_created);
    println!("  recoveries performed: {}", report.response.automatic_recoveries_performed);
    println!("  actions recorded:     {}", report.response.total_response_actions);
    println!(
        "  success rate:         {:.2}%",
        report.response.response_success_rate_percent
    );

    println!("Snapshots");
    println!("  files tracked:        {}", report.snapshots.files_tracked);
    println!("  total versions:       {}", report.snapshots.total_versions);
    println!("  bytes on disk:        {}", report.snapshots.total_bytes_on_disk);
    println!("  retention per file:   {}", report.snapshots.retention_count);

    println!("Recovery");
    println!("  total attempts:       {}", report.recovery.total_attempts);
    println!("  successful:           {}", report.recovery.successful_recoveries);
    println!("  failed:               {}", report.recovery.failed_recoveries);
    println!(
        "  success rate:         {:.2}%",
        report.recovery.success_rate_percent
    );
}

fn print_actions(actions: &[ResponseAction]) {
    if actions.is_empty() {
        println!("no response actions recorded");
        return;
    }

    for action in actions {
        println!(
            "{} {:?} {} {} - {}",
            action.timestamp.format("%Y-%m-%d %H:%M:%S"),
            action.kind,
            if action.success { "OK " } else { "FAIL" },
            action.path.display(),
            action.details
        );
    }
}
