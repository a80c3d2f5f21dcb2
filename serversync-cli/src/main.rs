//! ServerSync command-line tool
//!
//! Keeps a server directory in step across machines through a shared
//! Google Drive folder (or a mounted directory).
//!
//! Usage:
//!   serversync setup --container <FOLDER_ID>
//!   serversync authenticate
//!   serversync publish
//!   serversync apply --backup

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serversync_cli::{
    describe_apply, describe_publish, exit_code_for, parse_confirmation, render_status,
    setup_config,
};
use serversync_sync::cloud::google_drive_from_config;
use serversync_sync::{BackendConfig, CloudStorage, SyncConfig, SyncOrchestrator, open_storage};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "serversync")]
#[command(about = "Synchronize server files through a shared cloud folder")]
struct Args {
    /// Path to the config file
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a config file
    Setup {
        /// Remote folder id; prompted for when omitted
        #[arg(long)]
        container: Option<String>,

        /// Directory holding `server_files/` and `backup/`
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,

        /// Directory for sync state, credentials and tokens
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Use a mounted directory as the remote instead of Google Drive
        #[arg(long)]
        local_root: Option<PathBuf>,
    },

    /// Authorize access to Google Drive and save the tokens
    Authenticate {
        /// Authorization code; prompted for when omitted
        #[arg(long)]
        code: Option<String>,
    },

    /// Upload local changes
    #[command(visible_alias = "upload")]
    Publish,

    /// Download and apply remote changes
    #[command(visible_alias = "download")]
    Apply {
        /// Back up the server files first without asking
        #[arg(long, conflicts_with = "no_backup")]
        backup: bool,

        /// Skip the backup without asking
        #[arg(long)]
        no_backup: bool,
    },

    /// Show lock state and pending changes
    Status,

    /// Remove a stuck lock
    Unlock,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

async fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Setup {
            container,
            base_dir,
            state_dir,
            local_root,
        } => setup(&args.config, container, &base_dir, state_dir.as_deref(), local_root),
        Command::Authenticate { code } => authenticate(&load_config(&args.config)?, code).await,
        Command::Publish => {
            let orchestrator = orchestrator(&args.config).await?;
            let outcome = orchestrator.publish().await.context("publish failed")?;
            println!("{}", describe_publish(&outcome));
            Ok(())
        }
        Command::Apply { backup, no_backup } => {
            let orchestrator = orchestrator(&args.config).await?;
            let backup = if backup {
                true
            } else if no_backup {
                false
            } else {
                wants_backup(&orchestrator.config().server_files_dir)?
            };
            let outcome = orchestrator.apply(backup).await.context("apply failed")?;
            println!("{}", describe_apply(&outcome));
            Ok(())
        }
        Command::Status => {
            let orchestrator = orchestrator(&args.config).await?;
            let report = orchestrator.status().await.context("status failed")?;
            print!("{}", render_status(&report));
            Ok(())
        }
        Command::Unlock => {
            let orchestrator = orchestrator(&args.config).await?;
            let removed = orchestrator.unlock().await.context("unlock failed")?;
            if removed == 0 {
                println!("Lock was not held.");
            } else {
                println!("Lock removed.");
            }
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<SyncConfig> {
    Ok(SyncConfig::load(path)?)
}

async fn orchestrator(config_path: &Path) -> Result<SyncOrchestrator> {
    let config = load_config(config_path)?;
    let storage = open_storage(&config).await?;
    info!("Using {} storage, container {}", storage.provider_name(), config.container_id);
    Ok(SyncOrchestrator::new(config, storage))
}

fn setup(
    config_path: &Path,
    container: Option<String>,
    base_dir: &Path,
    state_dir: Option<&Path>,
    local_root: Option<PathBuf>,
) -> Result<()> {
    let container = match container {
        Some(id) => id,
        None => prompt("Enter the Google Drive folder ID for synchronization: ")?,
    };
    let base_dir = std::path::absolute(base_dir)
        .with_context(|| format!("invalid base directory {}", base_dir.display()))?;

    let config = setup_config(&container, &base_dir, state_dir, local_root);
    config.save(config_path)?;
    println!("Configuration saved to {}", config_path.display());
    Ok(())
}

async fn authenticate(config: &SyncConfig, code: Option<String>) -> Result<()> {
    if let BackendConfig::Local { root } = &config.backend {
        let mut storage = serversync_sync::LocalStorage::new(root);
        storage.authenticate().await?;
        println!("Local storage at {} is reachable; nothing to authorize.", root.display());
        return Ok(());
    }

    let mut storage = google_drive_from_config(config)?;
    storage.load_tokens(&config.token_file).await?;

    if let Some(url) = storage.authenticate().await? {
        println!("Open this URL in a browser and authorize access:\n\n  {url}\n");
        let code = match code {
            Some(code) => code,
            None => prompt("Enter the authorization code: ")?,
        };
        storage
            .complete_auth(code.trim())
            .await
            .context("authorization failed")?;
        storage.save_tokens(&config.token_file).await?;
    }

    println!("Authentication successful.");
    Ok(())
}

/// Asks before backing up a populated directory. Nothing to back up means
/// no question.
fn wants_backup(server_files_dir: &Path) -> Result<bool> {
    let populated = std::fs::read_dir(server_files_dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false);
    if !populated {
        return Ok(false);
    }

    loop {
        let answer = prompt("Do you want to create a backup? (yes/no): ")?;
        match parse_confirmation(&answer) {
            Some(choice) => return Ok(choice),
            None => println!("Invalid input. Please enter 'yes' or 'no'."),
        }
    }
}

fn prompt(message: &str) -> Result<String> {
    print!("{message}");
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        bail!("no input available for prompt");
    }
    Ok(line.trim().to_string())
}
