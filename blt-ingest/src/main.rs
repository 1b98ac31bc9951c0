//! blt-ingest - building lead ingest service and CLI
//!
//! Startup: config file → logging → root folder → database → registries →
//! pipeline, then either serve the HTTP API or run one CLI command.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blt_common::config::{
    default_config_path, load_or_default, resolve_app_token, RootFolderInitializer,
    RootFolderResolver,
};
use blt_ingest::config::PipelineConfig;
use blt_ingest::keys::{Bbl, BuildingRef};
use blt_ingest::pipeline::Pipeline;
use blt_ingest::registries::Registries;
use blt_ingest::store::{LeadStore, SqliteLeadStore};
use blt_ingest::types::{Era, ManualEntry};
use blt_ingest::{seed, AppState};

#[derive(Parser, Debug)]
#[command(name = "blt-ingest")]
#[command(about = "Building lead data waterfall and penalty projection")]
#[command(version)]
struct Cli {
    /// Root folder holding the database
    #[arg(long, global = true)]
    root_folder: Option<PathBuf>,

    /// TOML config file (default: platform config dir)
    #[arg(long, global = true, env = "BLT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value = "127.0.0.1:5780", env = "BLT_BIND")]
        bind: SocketAddr,
    },
    /// Run the pipeline for one building
    Run {
        /// 10-digit BBL or street address
        reference: String,
        /// JSON file of manual values
        #[arg(long)]
        manual: Option<PathBuf>,
        /// Ignore a fresh stored record
        #[arg(long)]
        force: bool,
    },
    /// Run the pipeline for every reference in a file, one per line
    Batch {
        file: PathBuf,
        #[arg(long)]
        force: bool,
    },
    /// Print the stored lead record
    Show { key: String },
    /// Load the covered-buildings CSV into the compliance registry
    LoadCompliance { csv: PathBuf },
    /// Replace one audit window from a CSV export
    LoadAudits {
        csv: PathBuf,
        /// "2019-2024" or "2012-2018"
        #[arg(long, value_parser = parse_era)]
        era: Era,
    },
    /// Review recent runs
    Runs {
        #[arg(long, default_value_t = 50)]
        limit: u32,
        /// Only aborted runs
        #[arg(long)]
        failed: bool,
    },
}

fn parse_era(label: &str) -> Result<Era, String> {
    Era::parse(label).ok_or_else(|| format!("unknown era '{}', expected 2019-2024 or 2012-2018", label))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Non-empty lines that are not `#` comments
fn read_references(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config first: it carries the default log level
    let config_path = cli.config.clone().or_else(default_config_path);
    let toml_config = load_or_default(config_path.as_deref());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml_config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("blt-ingest {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        info!("Config path: {}", path.display());
    }

    let root_folder = RootFolderResolver::new(&toml_config)
        .with_cli_arg(cli.root_folder.clone())
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let pool = blt_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    // Seed commands need only the database
    match &cli.command {
        Command::LoadCompliance { csv } => {
            let summary = seed::load_compliance_csv(&pool, csv).await?;
            return print_json(&summary);
        }
        Command::LoadAudits { csv, era } => {
            let summary = seed::load_audits_csv(&pool, csv, *era).await?;
            return print_json(&summary);
        }
        _ => {}
    }

    let pipeline_config = PipelineConfig::from_toml(&toml_config).context("Invalid pipeline configuration")?;
    let registries = Registries::connect(
        pool.clone(),
        &toml_config.registries,
        resolve_app_token(&toml_config),
    )
    .map_err(|e| anyhow::anyhow!("Failed to set up registries: {}", e))?;
    let store: Arc<dyn LeadStore> = Arc::new(SqliteLeadStore::new(pool));
    let pipeline = Arc::new(Pipeline::new(registries, store.clone(), pipeline_config));

    match cli.command {
        Command::Serve { bind } => serve(pipeline, bind).await,
        Command::Run {
            reference,
            manual,
            force,
        } => {
            let reference = BuildingRef::parse(&reference)?;
            let manual: Option<ManualEntry> = match manual {
                Some(path) => {
                    let content = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    Some(serde_json::from_str(&content).context("Invalid manual entry JSON")?)
                }
                None => None,
            };

            if force {
                print_json(&pipeline.run(&reference, manual.as_ref()).await?)
            } else {
                print_json(&pipeline.run_if_stale(&reference, manual.as_ref()).await?)
            }
        }
        Command::Batch { file, force } => {
            let references = read_references(&file)?;
            let report = pipeline.run_batch(&references, force).await;
            print_json(&report)?;
            if !report.failed.is_empty() {
                anyhow::bail!("{} of {} buildings failed", report.failed.len(), report.total());
            }
            Ok(())
        }
        Command::Show { key } => {
            let key = Bbl::parse(&key)?;
            match store.get(&key).await? {
                Some(record) => print_json(&record),
                None => anyhow::bail!("No lead record for {}", key),
            }
        }
        Command::Runs { limit, failed } => print_json(&store.recent_runs(limit, failed).await?),
        Command::LoadCompliance { .. } | Command::LoadAudits { .. } => Ok(()),
    }
}

async fn serve(pipeline: Arc<Pipeline>, bind: SocketAddr) -> Result<()> {
    let app = blt_ingest::build_router(AppState::new(pipeline));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
