//! SQExt CLI - Main entry point

mod commands;

use clap::{Parser, Subcommand};
use sqext_core::plugin::{run_worker, NativeModuleLoader, WORKER_COMMAND};
use sqext_core::{InstallerOptions, PluginInstaller};
use sqext_foundation::{ExtensionConfig, IsolationMode, JsonSettingsStore, JsonStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// SQExt - extension host for analysis, menu, tracker and source control modules
#[derive(Parser, Debug)]
#[command(name = "sqext")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Extension directory (overrides config)
    #[arg(long)]
    extension_dir: Option<PathBuf>,

    /// Validate archives inside this process instead of a worker process
    #[arg(long)]
    in_process: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install an extension archive (.zip)
    Install {
        archive: PathBuf,
    },
    /// Remove an installed extension
    Remove {
        name: String,
    },
    /// List installed extensions
    List {
        /// Print descriptors as JSON
        #[arg(long)]
        json: bool,
    },
    /// Enable an extension
    Enable {
        name: String,
    },
    /// Disable an extension
    Disable {
        name: String,
    },
    /// List active instances of a contract (analysis, menu, tracker, scm)
    Lookup {
        kind: String,
    },
    /// Validation worker (internal)
    #[command(name = WORKER_COMMAND, hide = true)]
    Validate {
        #[arg(long = "search-dir")]
        search_dirs: Vec<PathBuf>,

        #[arg(last = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // stdout은 명령 결과와 워커 리포트 전용
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if let Command::Validate { search_dirs, files } = args.command {
        let report = tokio::task::spawn_blocking(move || {
            run_worker(files, search_dirs, Arc::new(NativeModuleLoader::new()))
        })
        .await?;
        println!("{}", serde_json::to_string(&report)?);
        return Ok(());
    }

    // Load configuration
    let mut config = ExtensionConfig::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}", e);
        ExtensionConfig::default()
    });
    if let Some(dir) = args.extension_dir {
        config = config.with_extension_dir(dir);
    }
    if args.in_process {
        config = config.with_isolation(IsolationMode::InProcess);
    }

    let settings = Arc::new(JsonSettingsStore::open(JsonStore::new(
        config.extension_dir(),
    ))?);
    let options = InstallerOptions::from_config(&config, settings)?;
    let installer = PluginInstaller::open(options, Arc::new(NativeModuleLoader::new())).await?;

    let scan = installer.discover().await?;
    for failure in &scan.failures {
        tracing::warn!("{}", failure);
    }

    match args.command {
        Command::Install { archive } => commands::install(&installer, &archive).await,
        Command::Remove { name } => commands::remove(&installer, &name).await,
        Command::List { json } => commands::list(&installer, json).await,
        Command::Enable { name } => commands::set_enabled(&installer, &name, true).await,
        Command::Disable { name } => commands::set_enabled(&installer, &name, false).await,
        Command::Lookup { kind } => commands::lookup(&installer, &kind).await,
        Command::Validate { .. } => Ok(()),
    }
}
