//! # iris-sync CLI
//!
//! Scheduled batch job that mirrors a directory of local text files into the
//! `iris` table and appends user feedback from S3 to `user_feedback`.
//!
//! ## Usage
//!
//! ```bash
//! ENV=prod iris-sync --config ./config/iris-sync.toml
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `iris-sync` / `iris-sync run` | File sync, then feedback ingestion |
//! | `iris-sync init` | Create the tables (idempotent) |
//! | `iris-sync files` | File sync only |
//! | `iris-sync feedback` | Feedback ingestion only |
//! | `iris-sync stats` | Row counts per table |
//!
//! Stage failures are logged and summarized but do not change the exit status
//! unless `--strict` (or `sync.strict = true`) is set. Configuration errors
//! always abort before any stage runs.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use iris_sync::config::{load_config, Profile};
use iris_sync::connector_s3::AwsCredentials;
use iris_sync::ingest;
use iris_sync::migrate;
use iris_sync::report::RunSummary;

const CREDENTIALS_HELP: &str = "\
S3 credentials are read from AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY
(plus AWS_SESSION_TOKEN when set). Instance profiles and the bucket's
role_arn are not used to obtain credentials; without the variables the
feedback stage collects nothing.";

/// Sync local files and S3 user feedback into the relational store.
#[derive(Parser)]
#[command(name = "iris-sync", version, about, after_help = CREDENTIALS_HELP)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/iris-sync.toml")]
    config: PathBuf,

    /// Profile to use (`dev` or `prod`). Overrides the `ENV` variable.
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Exit with status 1 when any stage records a failure.
    #[arg(long, global = true)]
    strict: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Create the pipeline tables if they do not exist.
    Init,
    /// Run file sync, then feedback ingestion (default).
    Run,
    /// Sync the local files directory into the `iris` table.
    Files,
    /// Ingest user feedback objects from S3.
    Feedback,
    /// Show row counts for the pipeline tables.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("iris_sync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let profile = match cli.profile {
        Some(ref name) => name.parse()?,
        None => Profile::from_env()?,
    };
    let config = load_config(&cli.config, profile)?;
    info!(
        "Loaded profile '{}' from {}",
        config.profile,
        cli.config.display()
    );

    let command = cli.command.unwrap_or(Commands::Run);
    let summary = match command {
        Commands::Init => {
            migrate::run_migrations(&config).await?;
            println!("Database initialized.");
            return Ok(());
        }
        Commands::Stats => {
            let counts = migrate::table_counts(&config).await?;
            println!("{:<22} {:>10}", "TABLE", "ROWS");
            println!("{:<22} {:>10}", "iris", counts.files);
            println!("{:<22} {:>10}", "user_feedback", counts.feedback);
            println!("{:<22} {:>10}", "feedback_checkpoints", counts.checkpoints);
            return Ok(());
        }
        Commands::Run => {
            let credentials = AwsCredentials::from_env();
            ingest::run_all(&config, credentials.as_ref()).await
        }
        Commands::Files => RunSummary {
            files: Some(ingest::sync_files(&config).await),
            feedback: None,
        },
        Commands::Feedback => {
            let credentials = AwsCredentials::from_env();
            RunSummary {
                files: None,
                feedback: Some(ingest::ingest_feedback(&config, credentials.as_ref()).await),
            }
        }
    };

    print!("{}", summary);

    if (cli.strict || config.sync.strict) && !summary.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}
