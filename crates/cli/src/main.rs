//! `labportal` admin CLI.
//!
//! This binary is the composition root. It:
//!
//! 1. **Parses configuration**: loads `labportal.toml` (or `--config`) and
//!    validates it before anything else starts.
//! 2. **Wires observability**: installs the `tracing-subscriber` stack, with an
//!    optional OpenTelemetry OTLP exporter.
//! 3. **Constructs infrastructure**: a [`github::GithubContentStore`] and a
//!    [`local_store::FileCache`], injected into a [`sync_engine::SyncEngine`].
//! 4. **Runs one command** and drains the write queue before exiting.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use portal::{CollectionKind, PortalError, RecordId, RetryPolicy, StoreError, Timestamp};

mod commands;
mod config;
mod observability;

use config::CliConfig;

#[derive(Parser)]
#[command(name = "labportal")]
#[command(about = "Manage the lab website's content collections stored on GitHub", long_about = None)]
#[command(version)]
struct Cli {
    /// Path of the configuration file.
    #[arg(long, short, global = true, default_value = "labportal.toml")]
    config: PathBuf,

    /// Keep cached collections in memory only, for this run.
    #[arg(long, global = true)]
    no_cache: bool,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load collections into the local cache
    Pull {
        /// Ignore fresh cache entries and read from GitHub
        #[arg(long)]
        refresh: bool,
        /// Collections to pull (all when omitted)
        kinds: Vec<CollectionKind>,
    },
    /// Print the records of a collection
    List {
        kind: CollectionKind,
        /// Print the raw JSON array
        #[arg(long)]
        json: bool,
    },
    /// Print one record
    Get { kind: CollectionKind, id: RecordId },
    /// Insert or update one record
    Put {
        kind: CollectionKind,
        /// The record as a JSON object
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        data: Option<String>,
        /// File holding the record as a JSON object
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Delete one record
    Delete { kind: CollectionKind, id: RecordId },
    /// Replace a whole collection with the contents of a JSON file
    Import {
        kind: CollectionKind,
        #[arg(long)]
        file: PathBuf,
    },
    /// Show the state of every collection
    Status,
    /// Show the GitHub API rate limit
    RateLimit,
    /// Verify and store a personal access token
    Login {
        #[arg(long)]
        token: String,
    },
    /// Forget the stored access token
    Logout,
    /// Show the account the access token belongs to
    Whoami,
    /// Manage the local cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Delete every cached collection
    Clear,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start the async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            if let Some(hint) = retry_hint(&e, Timestamp::now()) {
                eprintln!("hint: {hint}");
            }
            ExitCode::FAILURE
        }
    }
}

/// Tells the user whether running the command again may help, based on the
/// first domain error in the chain.
fn retry_hint(error: &anyhow::Error, now: Timestamp) -> Option<String> {
    let policy = error.chain().find_map(|cause| {
        cause
            .downcast_ref::<PortalError>()
            .map(|e| e.retry_policy(now))
            .or_else(|| cause.downcast_ref::<StoreError>().map(|e| e.retry_policy(now)))
    })?;
    match policy {
        RetryPolicy::Retryable { after: Some(wait) } if !wait.is_zero() => {
            Some(format!("try again in {}s", wait.as_secs().max(1)))
        }
        RetryPolicy::Retryable { .. } => Some("the failure looks temporary; try again".to_string()),
        RetryPolicy::NonRetryable => None,
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = CliConfig::load(&cli.config)?;
    let _telemetry = observability::init(&config.observability, cli.verbose)?;

    let app = commands::App::connect(config, cli.no_cache).await?;
    let result = dispatch(&app, cli.command).await;
    let drained = app.close().await;
    result.and(drained)
}

async fn dispatch(app: &commands::App, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Pull { refresh, kinds } => app.pull(refresh, kinds).await,
        Commands::List { kind, json } => app.list(kind, json).await,
        Commands::Get { kind, id } => app.get(kind, id).await,
        Commands::Put { kind, data, file } => app.put(kind, data, file).await,
        Commands::Delete { kind, id } => app.delete(kind, id).await,
        Commands::Import { kind, file } => app.import(kind, &file).await,
        Commands::Status => app.status().await,
        Commands::RateLimit => app.rate_limit().await,
        Commands::Login { token } => app.login(&token).await,
        Commands::Logout => app.logout().await,
        Commands::Whoami => app.whoami().await,
        Commands::Cache { action: CacheAction::Clear } => app.clear_cache().await,
    }
}
