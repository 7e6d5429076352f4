//! Tillsync CLI - operator tooling for the offline queue
//!
//! Inspect queued operations, trigger sync sessions, resolve conflicts,
//! and run retention maintenance from the terminal.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use tillsync_core::models::ResolutionStrategy;

mod commands;
mod error;

use error::CliError;

#[derive(Parser)]
#[command(name = "tillsync")]
#[command(about = "Operate the Till offline queue and sync engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the queue database file
    #[arg(long, value_name = "PATH", global = true)]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List items awaiting sync (pending, claimed, or retrying)
    Pending {
        /// Restrict to one device
        #[arg(long)]
        device: Option<String>,
        /// Number of items to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List conflicts awaiting resolution
    Conflicts {
        #[arg(long)]
        device: Option<String>,
        #[arg(short, long, default_value = "50")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Queue counts by status and operation kind
    Stats {
        #[arg(long)]
        device: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show one queue item in full
    Show {
        /// Queue item id
        id: String,
    },
    /// Run a sync session for a device
    Sync {
        /// Device to sync
        #[arg(long)]
        device: String,
        /// Batch limit for this session
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// List recent sync sessions
    Sessions {
        #[arg(long)]
        device: Option<String>,
        #[arg(short, long, default_value = "20")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Resolve a conflicted item with a strategy
    Resolve {
        /// Queue item id
        id: String,
        /// Resolution strategy
        #[arg(long, value_enum)]
        strategy: StrategyArg,
        /// Who is resolving (for the audit trail)
        #[arg(long, default_value = "cli")]
        actor: String,
        /// Why this disposition was chosen
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Reset a failed or conflicted item for another attempt
    Retry {
        /// Queue item id
        id: String,
    },
    /// Delete synced items past the retention window
    Purge {
        /// Retention window in days
        #[arg(long, default_value = "30")]
        older_than_days: u32,
        #[arg(long)]
        device: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    /// Force-apply the offline version
    KeepOffline,
    /// Discard the offline operation; server state wins
    KeepOnline,
    /// Collaborator-specific reconciliation
    Merge,
    /// Dispose of the item without replay
    Skip,
}

impl From<StrategyArg> for ResolutionStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::KeepOffline => Self::KeepOffline,
            StrategyArg::KeepOnline => Self::KeepOnline,
            StrategyArg::Merge => Self::Merge,
            StrategyArg::Skip => Self::Skip,
        }
    }
}

fn resolve_db_path(cli_path: Option<PathBuf>) -> PathBuf {
    cli_path
        .or_else(|| env::var("TILLSYNC_DB_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("tillsync.db"))
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Pending {
            device,
            limit,
            json,
        } => commands::queue::run_pending(device.as_deref(), limit, json, &db_path).await,
        Commands::Conflicts {
            device,
            limit,
            json,
        } => commands::conflicts::run_conflicts(device.as_deref(), limit, json, &db_path).await,
        Commands::Stats { device, json } => {
            commands::queue::run_stats(device.as_deref(), json, &db_path).await
        }
        Commands::Show { id } => commands::queue::run_show(&id, &db_path).await,
        Commands::Sync { device, limit } => {
            commands::sync::run_sync(&device, limit, &db_path).await
        }
        Commands::Sessions {
            device,
            limit,
            json,
        } => commands::sync::run_sessions(device.as_deref(), limit, json, &db_path).await,
        Commands::Resolve {
            id,
            strategy,
            actor,
            reason,
        } => {
            commands::conflicts::run_resolve(&id, strategy.into(), &actor, &reason, &db_path)
                .await
        }
        Commands::Retry { id } => commands::maintenance::run_retry(&id, &db_path).await,
        Commands::Purge {
            older_than_days,
            device,
        } => commands::maintenance::run_purge(older_than_days, device.as_deref(), &db_path).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_resolve() {
        let cli = Cli::try_parse_from([
            "tillsync",
            "resolve",
            "0192d3a0-0000-7000-8000-000000000000",
            "--strategy",
            "keep-online",
            "--reason",
            "server copy wins",
        ])
        .unwrap();
        match cli.command {
            Commands::Resolve {
                strategy, reason, ..
            } => {
                assert!(matches!(strategy, StrategyArg::KeepOnline));
                assert_eq!(reason, "server copy wins");
            }
            _ => panic!("expected resolve command"),
        }
    }

    #[test]
    fn test_db_path_resolution_prefers_flag() {
        let path = resolve_db_path(Some(PathBuf::from("/tmp/queue.db")));
        assert_eq!(path, PathBuf::from("/tmp/queue.db"));
    }

    #[test]
    fn test_cli_parses_sync_with_limit() {
        let cli =
            Cli::try_parse_from(["tillsync", "sync", "--device", "till-1", "--limit", "5"])
                .unwrap();
        match cli.command {
            Commands::Sync { device, limit } => {
                assert_eq!(device, "till-1");
                assert_eq!(limit, Some(5));
            }
            _ => panic!("expected sync command"),
        }
    }
}
