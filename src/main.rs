//! # Main — CLI Entry Point
//!
//! Routes subcommands to the CICD bridge. Handles shared concerns: `.env`
//! loading, structured logging, database connection and provider client
//! construction.
//!
//! ## Subcommands
//!
//! - `serve`: HTTP API, startup reconcile and the run-status poller.
//! - `propagate`: push a project's applied parameters as repository secrets.
//! - `rerun`: rerun an agent's workflow, or a project workflow by name.
//! - `reconcile`: sync workflow catalogs (one project or all).
//! - `poll-once`: run a single poller sweep.
//! - `migrate`: apply the bundled schema.
//!
//! ## Global Options
//!
//! - `--database-url` / `DATABASE_URL`: PostgreSQL connection.
//! - `--github-api-url` / `GITHUB_API_URL`: REST base URL.
//! - `--http-timeout-secs`, `--search-timeout-secs`: provider timeouts.
//! - `LOG_FORMAT=json` switches logs to JSON; `RUST_LOG` sets the filter.

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use paramstore::config::{DEFAULT_API_URL, DEFAULT_OAUTH_URL};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(
    name = "paramstore",
    version,
    about = "Propagate parameters to CI secrets and track workflow reruns"
)]
struct Cli {
    /// PostgreSQL connection URL (or set DATABASE_URL env var)
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// GitHub REST API base URL
    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_API_URL, global = true)]
    github_api_url: String,

    /// GitHub OAuth access-token endpoint
    #[arg(long, env = "GITHUB_OAUTH_URL", default_value = DEFAULT_OAUTH_URL, global = true)]
    github_oauth_url: String,

    /// OAuth application client id
    #[arg(long, env = "GITHUB_CLIENT_ID", global = true)]
    github_client_id: Option<String>,

    /// OAuth application client secret
    #[arg(long, env = "GITHUB_CLIENT_SECRET", hide_env_values = true, global = true)]
    github_client_secret: Option<String>,

    /// Per-request provider timeout in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 10, global = true)]
    http_timeout_secs: u64,

    /// Timeout for code search requests in seconds
    #[arg(long, env = "SEARCH_TIMEOUT_SECS", default_value_t = 30, global = true)]
    search_timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API with the startup reconcile and the run-status poller
    Serve {
        /// Port to listen on
        #[arg(long, env = "PORT", default_value_t = 8080)]
        port: u16,
        /// Seconds between poller sweeps
        #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 30)]
        poll_interval_secs: u64,
        /// Apply the bundled schema before serving
        #[arg(long)]
        migrate: bool,
    },
    /// Push a project's applied parameters as encrypted repository secrets
    Propagate {
        #[arg(long)]
        project_id: i64,
    },
    /// Rerun the latest run of a workflow
    Rerun {
        /// Rerun the workflow bound to this agent
        #[arg(long, conflicts_with_all = ["project_id", "workflow"])]
        agent_id: Option<i64>,
        /// Project owning the workflow (with --workflow)
        #[arg(long, requires = "workflow")]
        project_id: Option<i64>,
        /// Workflow name (with --project-id)
        #[arg(long, requires = "project_id")]
        workflow: Option<String>,
    },
    /// Sync workflow catalogs from the provider
    Reconcile {
        /// Only this project (default: every active project)
        #[arg(long)]
        project_id: Option<i64>,
    },
    /// Run a single run-status poller sweep
    PollOnce,
    /// Apply the bundled database schema
    Migrate,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Initialize structured logging: LOG_FORMAT=json for K8s, human-readable otherwise
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve {
            port,
            poll_interval_secs,
            migrate,
        } => cli::run_serve(&cli, *port, *poll_interval_secs, *migrate),
        Commands::Propagate { project_id } => cli::run_propagate(&cli, *project_id),
        Commands::Rerun {
            agent_id,
            project_id,
            workflow,
        } => cli::run_rerun(&cli, *agent_id, *project_id, workflow.as_deref()),
        Commands::Reconcile { project_id } => cli::run_reconcile(&cli, *project_id),
        Commands::PollOnce => cli::run_poll_once(&cli),
        Commands::Migrate => cli::run_migrate(&cli),
    }
}
