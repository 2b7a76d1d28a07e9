//! docflow CLI: run, validate and inspect document-processing pipelines.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use docflow::{builtin_registry, init_tracing, AppError, Config, Dependencies, LogFormat};

#[derive(Parser)]
#[command(name = "docflow")]
#[command(about = "Run documents from connectors through pipelines into a search index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to $DOCFLOW_CONFIG, then docflow.yaml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute every configured connector in order
    Run {
        /// Run id to use instead of a generated one
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Check the configuration without moving any documents
    Validate,
    /// Print the effective configuration as JSON
    Render,
    /// Process documents for a pipeline from Kafka
    #[cfg(feature = "kafka")]
    Worker {
        #[arg(long)]
        pipeline: String,
    },
    /// Index processed documents for a pipeline from Kafka
    #[cfg(feature = "kafka")]
    Indexer {
        #[arg(long)]
        pipeline: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match execute(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "docflow failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<bool, AppError> {
    let config = Config::from_env(cli.config)?;

    match cli.command {
        Commands::Run { run_id } => {
            let deps = Dependencies::new(config)?;
            let result = deps.runner.run(&deps.config.connectors, run_id).await?;
            println!("{}", result);
            Ok(result.success)
        }
        Commands::Validate => {
            config.validate(&builtin_registry())?;
            info!("Configuration is valid");
            println!("Configuration is valid.");
            Ok(true)
        }
        Commands::Render => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(true)
        }
        #[cfg(feature = "kafka")]
        Commands::Worker { pipeline } => {
            let deps = Dependencies::new(config)?;
            deps.runner.run_workers(&pipeline, shutdown_token()).await?;
            Ok(true)
        }
        #[cfg(feature = "kafka")]
        Commands::Indexer { pipeline } => {
            let deps = Dependencies::new(config)?;
            let metrics = deps.runner.run_indexer(&pipeline, shutdown_token()).await?;
            info!(indexed = metrics.indexed, failed = metrics.failed, "Indexer stopped");
            Ok(true)
        }
    }
}

/// Token cancelled on Ctrl-C.
#[cfg(feature = "kafka")]
fn shutdown_token() -> tokio_util::sync::CancellationToken {
    let cancel = tokio_util::sync::CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            token.cancel();
        }
    });
    cancel
}
