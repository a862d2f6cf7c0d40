//! tap-config command line interface

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use tap_config::cli::commands::{apply, check, metadata, plan};
use tap_config::models::Change;

#[derive(Parser)]
#[command(name = "tap-config")]
#[command(about = "Reconcile a TAP schema configuration with a live database", long_about = None)]
#[command(version)]
struct Cli {
    /// Database settings file (TOML); defaults to the document's options
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a document without contacting the database
    Check {
        /// Document path, or '-' for stdin
        input: String,
    },
    /// Print the document as it would become current
    Current { input: String },
    /// Show the operations needed to reconcile the database
    Plan {
        input: String,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Reconcile the database within the given change level
    Apply {
        input: String,
        /// Highest change level allowed: none, update, reindex, drop
        #[arg(short, long, default_value = "update")]
        level: Change,
    },
    /// Rebuild the document from the database
    Export { input: String },
    /// Compare the document with the persisted TAP metadata
    Verify { input: String },
    /// Print the persisted TAP metadata as a document
    Metadata,
    /// Create the TAP metadata catalog tables
    InitCatalog,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tap_config=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = cli.settings.as_deref();

    let result = match &cli.command {
        Commands::Check { input } => check::handle_check(input),
        Commands::Current { input } => check::handle_current(input),
        Commands::Plan { input, json } => plan::handle_plan(input, settings, *json).await,
        Commands::Apply { input, level } => apply::handle_apply(input, settings, *level).await,
        Commands::Export { input } => apply::handle_export(input, settings).await,
        Commands::Verify { input } => match plan::handle_verify(input, settings).await {
            Ok(true) => Ok(()),
            Ok(false) => return Ok(ExitCode::from(2)),
            Err(e) => Err(e),
        },
        Commands::Metadata => metadata::handle_metadata(settings).await,
        Commands::InitCatalog => metadata::handle_init_catalog(settings).await,
    };

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("Error: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}
