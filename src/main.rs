//! Fileward - ransomware detection with automated snapshot recovery
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon
//! sudo fileward start
//!
//! # Check status and statistics
//! fileward status
//! fileward stats
//!
//! # Restore a file from snapshot history
//! fileward restore /home/user/Documents/report.odt
//! ```

use clap::{Parser, Subcommand};
use fileward::config::Config;
use fileward::daemon;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "fileward")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/fileward/config.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Fileward daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,
    },

    /// Stop the Fileward daemon
    Stop,

    /// Restart the Fileward daemon
    Restart,

    /// Check daemon status
    Status,

    /// Show response, snapshot and recovery statistics
    Stats,

    /// Show the audit ledger of automated response actions
    Actions {
        /// How many hours to look back
        #[arg(long, default_value = "24")]
        hours: i64,
    },

    /// Snapshot a file manually
    Backup {
        /// File to snapshot
        path: PathBuf,
    },

    /// Restore files from snapshot history
    Restore {
        /// Files to restore
        paths: Vec<PathBuf>,

        /// Skip integrity verification after restore
        #[arg(long)]
        no_verify: bool,
    },

    /// Validate the configuration file
    Validate,

    /// Show configuration
    Config,
}

fn setup_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        if cli.config.exists() {
            error!("failed to load config: {}", e);
            std::process::exit(1);
        }
        info!("using default configuration");
        Config::default()
    });

    match cli.command {
        Commands::Start { foreground } => {
            config.validate()?;
            info!("starting fileward daemon...");
            daemon::start(config, foreground).await?;
        }

        Commands::Stop => {
            info!("stopping fileward daemon...");
            daemon::stop(&config).await?;
        }

        Commands::Restart => {
            config.validate()?;
            info!("restarting fileward daemon...");
            daemon::stop(&config).await?;
            daemon::start(config, false).await?;
        }

        Commands::Status => {
            daemon::status(&config).await?;
        }

        Commands::Stats => {
            daemon::send_command(&config, daemon::Command::Stats).await?;
        }

        Commands::Actions { hours } => {
            daemon::send_command(&config, daemon::Command::Actions { hours }).await?;
        }

        Commands::Backup { path } => {
            daemon::send_command(&config, daemon::Command::Backup(path)).await?;
        }

        Commands::Restore { paths, no_verify } => {
            if paths.is_empty() {
                error!("no paths given to restore");
                std::process::exit(1);
            }
            daemon::send_command(
                &config,
                daemon::Command::Restore {
                    paths,
                    verify: !no_verify,
                },
            )
            .await?;
        }

        Commands::Validate => match config.validate() {
            Ok(()) => println!("configuration is valid"),
            Err(e) => {
                error!("invalid configuration: {}", e);
                std::process::exit(1);
            }
        },

        Commands::Config => {
            println!("{}", serde_yaml::to_string(&config)?);
        }
    }

    Ok(())
}
