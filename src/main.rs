use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use homesync::core::{Orchestrator, SyncOutcome};
use homesync::logging::{self, LogConfig, LogThrottle};
use homesync::{config, context};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "homesync")]
#[command(about = "Copy your home folder onto a removable drive", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./homesync.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: GlobalArgs,
}

#[derive(Args, Serialize)]
struct GlobalArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    simulation: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    json_logs: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    source: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch for removable drives until interrupted
    Watch,
    /// List the removable drives currently mounted
    Devices {
        #[arg(long)]
        json: bool,
    },
    /// Copy the home folder onto a removable drive
    Migrate {
        /// Drive name, label, or mount path
        #[arg(long)]
        device: Option<String>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match config::AppConfig::new(cli.config.as_deref(), Some(&cli.overrides)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    logging::init(LogConfig::from(&config));

    match run(cli.command, config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config: config::AppConfig) -> Result<ExitCode> {
    match command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Watch => run_watch(&mut orchestrator(config)?).await,
        Commands::Devices { json } => run_devices(&mut orchestrator(config)?, json).await,
        Commands::Migrate { device } => run_migrate(&mut orchestrator(config)?, device).await,
    }
}

fn orchestrator(config: config::AppConfig) -> Result<Orchestrator> {
    let ctx = context::AppContext::new(config)?;
    Ok(Orchestrator::new(ctx))
}

async fn run_watch(orchestrator: &mut Orchestrator) -> Result<ExitCode> {
    let cancel = CancellationToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping");
            ctrl_c.cancel();
        }
    });

    orchestrator
        .watch(cancel)
        .await
        .context("Failed to watch devices")?;
    Ok(ExitCode::SUCCESS)
}

async fn run_devices(orchestrator: &mut Orchestrator, json: bool) -> Result<ExitCode> {
    orchestrator
        .discover()
        .await
        .context("Failed to list removable devices")?;

    let devices = orchestrator.registry().devices();
    if json {
        println!("{}", serde_json::to_string_pretty(devices)?);
    } else if devices.is_empty() {
        println!("No removable devices found");
    } else {
        for device in devices {
            println!("{}\t{}", device.label(), device.mount_path.display());
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn run_migrate(orchestrator: &mut Orchestrator, query: Option<String>) -> Result<ExitCode> {
    orchestrator
        .discover()
        .await
        .context("Failed to list removable devices")?;

    if let Some(query) = &query {
        orchestrator.registry_mut().select(query)?;
    } else if !orchestrator.registry().is_empty() {
        for device in orchestrator.registry().devices() {
            info!("  {}", device.label());
        }
    }

    let mut handle = orchestrator
        .migrator()
        .start(orchestrator.registry().selected())?;

    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current file");
            cancel.cancel();
        }
    });

    let throttle = LogThrottle::new(Duration::from_millis(500));
    while let Some(progress) = handle.progress.recv().await {
        if throttle.should_log() || progress.files_copied == progress.total_files {
            info!(
                files_copied = progress.files_copied,
                total_files = progress.total_files,
                "Migration progress {}%",
                progress.percentage()
            );
        }
    }

    let destination = handle.request.destination_root.clone();
    match handle.wait().await? {
        SyncOutcome::Success => {
            info!(destination = %destination.display(), "Home folder migration completed!");
            Ok(ExitCode::SUCCESS)
        }
        SyncOutcome::Failure(e) => {
            if e.is_device_removed() {
                error!("The drive appears to have been removed");
            }
            bail!("Migration failed: {}", e)
        }
    }
}
