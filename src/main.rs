// ABOUTME: CLI entry point for ct-replicator
// ABOUTME: Parses environment-backed options, sets up logging and routes to commands

use anyhow::Context;
use clap::{Parser, Subcommand};
use ct_replicator::commands;
use ct_replicator::config::{ReplicatorArgs, ReplicatorConfig};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::MakeWriterExt;

#[derive(Parser)]
#[command(name = "ct-replicator")]
#[command(about = "Incremental SQL Server to BigQuery replication using change tracking", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, env = "LOG_LEVEL", global = true, default_value = "info")]
    log: String,
    /// Also write log output to this file
    #[arg(long = "log-file", env = "REPLICATION_LOG_FILE", global = true)]
    log_file: Option<PathBuf>,
    /// Hide the initial-load progress bar
    #[arg(long = "no-progress", global = true)]
    no_progress: bool,
    #[command(flatten)]
    replicator: ReplicatorArgs,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Replicate every configured table once (default)
    Run,
    /// Show the stored checkpoint of each table
    Status,
}

fn init_logging(level: &str, log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    // 1. RUST_LOG environment variable has highest precedence
    // 2. LOG_LEVEL / --log is used if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_ascii_lowercase()));

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {:?}", path))?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_ansi(false)
                .with_writer(std::io::stdout.and(Mutex::new(file)))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(env_filter).init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log, cli.log_file.as_ref())?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Status => commands::status(&cli.replicator.state_file).await,
        Commands::Run => {
            // Validate before any connection attempt
            let config = ReplicatorConfig::from_args(cli.replicator)?;
            let stats = commands::run(&config, !cli.no_progress).await?;
            if !stats.is_success() {
                anyhow::bail!(
                    "{} of {} table(s) failed to sync: {}",
                    stats.tables_failed,
                    config.tables.len(),
                    stats.failed_tables().join(", ")
                );
            }
            Ok(())
        }
    }
}
