//! labdock supervisor and operator commands.
//!
//! ```bash
//! labdock supervisor          # run the idle reapers until interrupted
//! labdock deploy <project>
//! labdock stop <project>
//! labdock logs <project> --tail 50
//! labdock sweep
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use labdock::config::{self, RuntimeConfig};
use labdock::db::{self, Database};
use labdock::{LabdockError, RuntimeCore};

const LOG_FORMAT_ENV_VAR: &str = "LABDOCK_LOG_FORMAT";

#[derive(Parser)]
#[command(name = "labdock")]
#[command(about = "Deploys archived student projects as isolated container workloads", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to $LABDOCK_CONFIG or ~/.labdock/config.json)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the deployment and cache reapers until interrupted
    Supervisor,

    /// Deploy a project, or confirm its running deployment
    Deploy {
        #[arg(value_name = "PROJECT_ID")]
        project: String,

        /// Fail unless the project belongs to this owner
        #[arg(long)]
        owner: Option<String>,
    },

    /// Stop a project's deployment
    Stop {
        #[arg(value_name = "PROJECT_ID")]
        project: String,
    },

    /// Print the deploy log and runtime log tail
    Logs {
        #[arg(value_name = "PROJECT_ID")]
        project: String,

        #[arg(short, long)]
        tail: Option<usize>,
    },

    /// Run both idle sweeps once
    Sweep,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("labdock=info"));
    let json = std::env::var(LOG_FORMAT_ENV_VAR)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        tracing::subscriber::set_global_default(registry.with(fmt::layer().json()))
    } else {
        tracing::subscriber::set_global_default(registry.with(fmt::layer()))
    };
    if let Err(e) = result {
        eprintln!("Failed to install tracing subscriber: {}", e);
    }
    if let Err(e) = LogTracer::init() {
        eprintln!("Failed to bridge log records: {}", e);
    }
}

fn load(cli_path: Option<PathBuf>) -> Result<RuntimeConfig, LabdockError> {
    let path = cli_path.or_else(config::default_config_path).ok_or_else(|| {
        labdock::ConfigError::Validation {
            message: "No configuration path given and no home directory found".to_string(),
        }
    })?;
    log::debug!("Loading configuration from {}", path.display());
    Ok(config::load_config(&path)?)
}

fn open_store(config: &RuntimeConfig) -> Result<Database, LabdockError> {
    let path = config
        .database_path
        .clone()
        .or_else(db::default_database_path)
        .ok_or_else(|| labdock::ConfigError::Validation {
            message: "No database path configured and no home directory found".to_string(),
        })?;
    Ok(Database::open(&path)?)
}

async fn run(cli: Cli) -> Result<(), LabdockError> {
    let config = load(cli.config)?;
    let store = Arc::new(open_store(&config)?);
    let core = RuntimeCore::from_config(&config, store)?;

    match cli.command {
        Commands::Supervisor => supervise(&core).await,
        Commands::Deploy { project, owner } => {
            let outcome = core.deploy(&project, owner.as_deref()).await?;
            match outcome.admin_url {
                Some(admin) => println!("{}\nadmin: {}", outcome.url, admin),
                None => println!("{}", outcome.url),
            }
            Ok(())
        }
        Commands::Stop { project } => {
            core.stop(&project).await?;
            println!("Stopped {}", project);
            Ok(())
        }
        Commands::Logs { project, tail } => {
            println!("{}", core.logs(&project, tail).await?);
            Ok(())
        }
        Commands::Sweep => {
            let deployments = core.reaper().sweep_deployments().await;
            let cache = core.reaper().sweep_cache().await;
            println!(
                "deployments: {} examined, {} reaped, {} failed\ncache: {} evicted, {} orphans removed",
                deployments.examined,
                deployments.reaped,
                deployments.failed,
                cache.evicted,
                cache.orphans_removed
            );
            Ok(())
        }
    }
}

async fn supervise(core: &RuntimeCore) -> Result<(), LabdockError> {
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(true);
    }) {
        log::warn!("Failed to install interrupt handler: {}", e);
    }

    let handles = core.scheduler().start();
    log::info!("Supervisor started, reapers running");

    while !*shutdown_rx.borrow() {
        if shutdown_rx.changed().await.is_err() {
            break;
        }
    }

    log::info!("Shutting down reapers");
    core.scheduler().stop();
    for handle in handles {
        if let Err(e) = handle.await {
            log::warn!("Reaper task ended abnormally: {}", e);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
