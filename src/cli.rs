//! # CLI Execution Functions
//!
//! Extracted from `main.rs` to keep the entry point slim. Each subcommand
//! builds a tokio runtime, connects the store, constructs the provider client
//! and calls into the core. Operations run under a cancellation token that
//! fires on Ctrl-C.

use anyhow::{Context, Result};
use paramstore::cicd::rerun::RerunTarget;
use paramstore::cicd::Cicd;
use paramstore::config::{PollerConfig, ProviderConfig};
use paramstore::db::Database;
use paramstore::github::GithubClient;
use paramstore::prom_metrics::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Cli;

fn provider_config(cli: &Cli) -> ProviderConfig {
    ProviderConfig {
        api_url: cli.github_api_url.trim_end_matches('/').to_string(),
        oauth_url: cli.github_oauth_url.clone(),
        client_id: cli.github_client_id.clone(),
        client_secret: cli.github_client_secret.clone(),
        timeout: Duration::from_secs(cli.http_timeout_secs),
        search_timeout: Duration::from_secs(cli.search_timeout_secs),
    }
}

async fn connect(cli: &Cli) -> Result<Database> {
    let database_url = cli.database_url.as_deref().ok_or_else(|| {
        anyhow::anyhow!("DATABASE_URL is required (set via --database-url or env)")
    })?;
    Database::connect(database_url)
        .await
        .context("failed to connect to database")
}

async fn build_cicd(cli: &Cli, metrics: Arc<Metrics>) -> Result<Cicd> {
    let database = connect(cli).await?;
    let github = GithubClient::new(&provider_config(cli))?;
    Ok(Cicd::new(Arc::new(database), Arc::new(github), metrics))
}

/// Token cancelled on Ctrl-C, for one-shot commands.
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("received SIGINT, cancelling");
            child.cancel();
        }
    });
    token
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── Subcommands ─────────────────────────────────────────────────

pub fn run_serve(cli: &Cli, port: u16, poll_interval_secs: u64, migrate: bool) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let metrics = Arc::new(Metrics::new());
        let database = connect(cli).await?;
        if migrate {
            database.migrate().await.context("schema migration failed")?;
            info!("schema applied");
        }
        let github = GithubClient::new(&provider_config(cli))?;
        let cicd = Cicd::new(Arc::new(database), Arc::new(github), Arc::clone(&metrics));
        let poller = PollerConfig {
            interval: Duration::from_secs(poll_interval_secs.max(1)),
        };
        paramstore::api::run(port, cicd, metrics, poller).await
    })
}

pub fn run_propagate(cli: &Cli, project_id: i64) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let cicd = build_cicd(cli, Arc::new(Metrics::new())).await?;
        let cancel = ctrl_c_token();
        let report = cicd.propagate_parameters(project_id, None, &cancel).await?;
        info!(project_id, summary = %report.summary(), "propagation finished");
        print_json(&report)
    })
}

pub fn run_rerun(
    cli: &Cli,
    agent_id: Option<i64>,
    project_id: Option<i64>,
    workflow: Option<&str>,
) -> Result<()> {
    let target = match (agent_id, project_id, workflow) {
        (Some(agent_id), _, _) => RerunTarget::Agent { agent_id },
        (None, Some(project_id), Some(name)) => RerunTarget::Workflow {
            project_id,
            workflow_name: name.to_string(),
            user_id: None,
        },
        _ => anyhow::bail!("either --agent-id or --project-id with --workflow is required"),
    };
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let cicd = build_cicd(cli, Arc::new(Metrics::new())).await?;
        let cancel = ctrl_c_token();
        let outcome = cicd.rerun(target, &cancel).await?;
        print_json(&outcome)
    })
}

pub fn run_reconcile(cli: &Cli, project_id: Option<i64>) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let cicd = build_cicd(cli, Arc::new(Metrics::new())).await?;
        let cancel = ctrl_c_token();
        match project_id {
            Some(id) => {
                let report = cicd.reconcile_project(id, &cancel).await?;
                print_json(&report)
            }
            None => {
                let count = cicd.reconcile_all(&cancel).await?;
                info!(count, "reconciled projects");
                Ok(())
            }
        }
    })
}

pub fn run_poll_once(cli: &Cli) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let cicd = build_cicd(cli, Arc::new(Metrics::new())).await?;
        let cancel = ctrl_c_token();
        let stats = cicd.sweep(&cancel).await?;
        print_json(&stats)
    })
}

pub fn run_migrate(cli: &Cli) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let database = connect(cli).await?;
        database.migrate().await?;
        info!("schema applied");
        Ok(())
    })
}
