//! Command-line entry point.
//!
//! `sync` runs one pass and exits; `watch` keeps a poller alive and
//! invalidates folder config when `.linear.json` files change on disk.
//! Settings live in a JSON file under the config directory and are
//! re-read at the start of every pass, so edits take effect without a
//! restart.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::Notify;

use linearvault::linear::LinearClient;
use linearvault::settings::SettingsStore;
use linearvault::sync::poller::run_sync_poller;
use linearvault::sync::SyncEngine;
use linearvault::vault::FsVault;
use linearvault::watcher::start_config_watcher;
use linearvault::{Result, SyncError};

#[derive(Parser)]
#[command(name = "linearvault", version, about = "Sync Linear issues with a markdown vault")]
struct Cli {
    /// Settings directory (default: ~/.linearvault)
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single sync pass and print the report
    Sync {
        /// Emit the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run passes on the configured interval until interrupted
    Watch,
    /// Create a Linear issue from an unlinked vault note
    Create {
        /// Vault-relative path of the note, e.g. "inbox/fix-login.md"
        path: String,
    },
    /// Check the configured API key against the remote service
    Status,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let dir = match cli.config_dir {
        Some(dir) => dir,
        None => SettingsStore::default_dir()?,
    };
    let settings = Arc::new(SettingsStore::open(dir));
    let snapshot = settings.snapshot();

    if snapshot.vault_path.is_empty() {
        return Err(SyncError::Settings(
            "no vault path configured; set \"vaultPath\" in settings.json".to_string(),
        ));
    }
    let api_key = snapshot.api_key.clone().ok_or_else(|| {
        SyncError::Settings("no API key configured; set \"apiKey\" in settings.json".to_string())
    })?;

    let store = Arc::new(FsVault::new(&snapshot.vault_path));
    let remote = Arc::new(LinearClient::new(&api_key));
    let engine = Arc::new(SyncEngine::new(store, remote.clone(), settings));

    match cli.command {
        Commands::Sync { json } => {
            let report = engine.run_pass().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
            } else {
                println!("Sync complete: {}", report.summary());
                for item in &report.errors {
                    eprintln!("  {}: {}", item.identifier, item.error);
                }
            }
            Ok(())
        }
        Commands::Watch => {
            start_config_watcher(PathBuf::from(&snapshot.vault_path), engine.resolver().clone());
            // First pass runs immediately; the poller takes over from there.
            match engine.run_pass().await {
                Ok(report) => log::info!("Sync complete: {}", report.summary()),
                Err(err) => log::warn!("Sync pass failed: {}", err),
            }
            let wake = Arc::new(Notify::new());
            run_sync_poller(engine, wake).await;
            Ok(())
        }
        Commands::Create { path } => {
            let issue = engine.create_issue_from_note(&path).await?;
            println!("Created {}: {}", issue.identifier, issue.url);
            Ok(())
        }
        Commands::Status => {
            let viewer = remote.viewer().await?;
            println!("Authenticated as {} <{}>", viewer.name, viewer.email);
            Ok(())
        }
    }
}
