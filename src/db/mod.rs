//! # Database — PostgreSQL Storage Layer
//!
//! Async storage for the CICD bridge via `sqlx::PgPool`.
//!
//! ## Schema
//!
//! - `projects`, `agents`, `parameters`: owned by the CRUD layer, read here
//! - `workflows`: local catalog of repository workflows, one row per
//!   `(project_id, provider_workflow_id)`
//! - `workflow_logs`: one row per `(workflow_run_id, attempt_number)`, state
//!   moves `queued → in_progress → completed` and never back
//! - `agent_logs`, `project_logs`: append-only audit trail
//!
//! ## Module Structure
//!
//! - [`projects`] — project, agent and applied-parameter reads
//! - [`workflows`] — workflow upserts and workflow-log lifecycle
//! - [`audit`] — agent/project audit log appends and reads
//! - [`memory`] — in-process [`CicdStore`] with the same semantics
//!
//! The core never talks to `Database` directly; it goes through the
//! [`CicdStore`] trait so the components can run against [`memory::MemoryStore`].

mod audit;
pub mod memory;
mod projects;
mod workflows;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

// ── Entity rows ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: i64,
    pub name: String,
    /// `<host>/<owner>/<name>`
    pub repo_coordinate: Option<String>,
    #[serde(skip_serializing)]
    pub repo_api_token: Option<String>,
    pub is_archived: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AgentRow {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub workflow_name: Option<String>,
    pub stage_id: Option<i64>,
    pub environment_id: Option<i64>,
    #[serde(skip_serializing)]
    pub api_token: String,
    pub is_archived: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ParameterRow {
    pub id: i64,
    pub project_id: i64,
    pub stage_id: i64,
    pub environment_id: i64,
    pub name: String,
    #[serde(skip_serializing)]
    pub value: String,
    pub is_applied: bool,
    pub is_archived: bool,
}

// ── Workflow rows ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WorkflowRow {
    pub id: i64,
    pub project_id: i64,
    pub provider_workflow_id: i64,
    pub name: String,
    pub path: String,
    pub state: String,
    /// Attempt counter of the workflow's most recent run (tracks runs, not
    /// the attempts of one specific run).
    pub last_attempt_number: i32,
    pub is_up_to_date: bool,
    pub updated_at: DateTime<Utc>,
}

/// Reconciler input for one remote workflow.
#[derive(Debug, Clone)]
pub struct WorkflowUpsert {
    pub project_id: i64,
    pub provider_workflow_id: i64,
    pub name: String,
    pub path: String,
    pub state: String,
    pub last_attempt_number: i32,
}

/// Lifecycle of a workflow log entry. Ordered: a log only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    InProgress,
    Completed,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Queued => "queued",
            RunState::InProgress => "in_progress",
            RunState::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(RunState::Queued),
            "in_progress" => Some(RunState::InProgress),
            "completed" => Some(RunState::Completed),
            _ => None,
        }
    }

    pub(crate) fn rank(self) -> i32 {
        match self {
            RunState::Queued => 0,
            RunState::InProgress => 1,
            RunState::Completed => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WorkflowLogRow {
    pub id: i64,
    pub project_id: i64,
    pub provider_workflow_id: i64,
    pub workflow_run_id: i64,
    pub attempt_number: i32,
    pub state: String,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowLogRow {
    pub fn run_state(&self) -> Option<RunState> {
        RunState::parse(&self.state)
    }
}

/// A dispatched rerun, recorded once per `(workflow_run_id, attempt_number)`.
#[derive(Debug, Clone)]
pub struct NewWorkflowLog {
    pub project_id: i64,
    pub provider_workflow_id: i64,
    pub workflow_name: String,
    pub workflow_run_id: i64,
    pub attempt_number: i32,
}

// ── Audit rows ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AgentLogRow {
    pub id: i64,
    pub agent_id: i64,
    pub project_id: i64,
    pub action: String,
    pub response_status: i32,
    pub latency_ms: i64,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAgentLog {
    pub agent_id: i64,
    pub project_id: i64,
    pub action: String,
    pub response_status: i32,
    pub latency_ms: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProjectLogRow {
    pub id: i64,
    pub project_id: i64,
    pub user_id: Option<i64>,
    pub action: String,
    pub response_status: i32,
    pub latency_ms: i64,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProjectLog {
    pub project_id: i64,
    pub user_id: Option<i64>,
    pub action: String,
    pub response_status: i32,
    pub latency_ms: i64,
    pub message: String,
}

// ── Store seam ──────────────────────────────────────────────────

/// Persistent-store operations consumed by the CICD core.
#[async_trait]
pub trait CicdStore: Send + Sync {
    async fn get_project(&self, id: i64) -> Result<Option<ProjectRow>>;

    /// Non-archived projects in database-default order.
    async fn get_active_projects(&self) -> Result<Vec<ProjectRow>>;

    async fn get_agent(&self, id: i64) -> Result<Option<AgentRow>>;

    /// `is_applied ∧ ¬is_archived`, ordered by `(stage_id, environment_id, name)`.
    async fn get_applied_parameters(&self, project_id: i64) -> Result<Vec<ParameterRow>>;

    /// Insert, or refresh name/path/state and raise `last_attempt_number`.
    async fn upsert_workflow(&self, workflow: &WorkflowUpsert) -> Result<WorkflowRow>;

    async fn get_workflows(&self, project_id: i64) -> Result<Vec<WorkflowRow>>;

    async fn get_workflow(
        &self,
        project_id: i64,
        provider_workflow_id: i64,
    ) -> Result<Option<WorkflowRow>>;

    /// Workflows of a project with `is_up_to_date = false`.
    async fn get_outdated_workflows(&self, project_id: i64) -> Result<Vec<WorkflowRow>>;

    /// Insert a queued log and flag its workflow outdated. Returns `None` when
    /// a log for the same `(workflow_run_id, attempt_number)` already exists.
    async fn record_dispatch(&self, log: &NewWorkflowLog) -> Result<Option<WorkflowLogRow>>;

    /// Non-completed logs of one workflow, in insertion order.
    async fn get_open_workflow_logs(
        &self,
        project_id: i64,
        provider_workflow_id: i64,
    ) -> Result<Vec<WorkflowLogRow>>;

    /// Move a log forward to `state`. Returns false if the log was already at
    /// or past `state` (completed logs are never touched).
    async fn advance_workflow_log(
        &self,
        id: i64,
        state: RunState,
        started_at: Option<DateTime<Utc>>,
        duration_ms: Option<i64>,
    ) -> Result<bool>;

    /// Set `is_up_to_date = true` only if no open log remains for the workflow.
    async fn settle_workflow(&self, project_id: i64, provider_workflow_id: i64) -> Result<bool>;

    async fn insert_agent_log(&self, log: &NewAgentLog) -> Result<AgentLogRow>;

    async fn insert_project_log(&self, log: &NewProjectLog) -> Result<ProjectLogRow>;

    async fn get_agent_logs(&self, agent_id: i64, limit: i64) -> Result<Vec<AgentLogRow>>;

    async fn get_project_logs(&self, project_id: i64, limit: i64) -> Result<Vec<ProjectLogRow>>;

    /// Most recent first.
    async fn get_workflow_logs(&self, project_id: i64, limit: i64) -> Result<Vec<WorkflowLogRow>>;

    async fn health_check(&self) -> Result<()>;
}

// ── Database struct and connection ──────────────────────────────

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL using the provided database URL.
    ///
    /// Manually parses the URL to preserve the full username; sqlx's built-in
    /// parser strips the ".project-ref" suffix that poolers such as Supabase's
    /// require.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let url = url::Url::parse(database_url)?;
        let username = urlencoding::decode(url.username())?.into_owned();
        let password = url
            .password()
            .map(|p| urlencoding::decode(p).map(|s| s.into_owned()))
            .transpose()?;
        let mut opts = PgConnectOptions::new()
            .host(url.host_str().unwrap_or("localhost"))
            .port(url.port().unwrap_or(5432))
            .database(url.path().trim_start_matches('/'))
            .username(&username)
            .statement_cache_capacity(0);
        if let Some(ref pw) = password {
            opts = opts.password(pw);
        }
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_with(opts)
            .await?;
        Ok(Database { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema. Statements are idempotent.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../../migrations/001_cicd_core.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Execute `SELECT 1` to verify database connectivity.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CicdStore for Database {
    async fn get_project(&self, id: i64) -> Result<Option<ProjectRow>> {
        self.fetch_project(id).await
    }

    async fn get_active_projects(&self) -> Result<Vec<ProjectRow>> {
        self.fetch_active_projects().await
    }

    async fn get_agent(&self, id: i64) -> Result<Option<AgentRow>> {
        self.fetch_agent(id).await
    }

    async fn get_applied_parameters(&self, project_id: i64) -> Result<Vec<ParameterRow>> {
        self.fetch_applied_parameters(project_id).await
    }

    async fn upsert_workflow(&self, workflow: &WorkflowUpsert) -> Result<WorkflowRow> {
        self.upsert_workflow_row(workflow).await
    }

    async fn get_workflows(&self, project_id: i64) -> Result<Vec<WorkflowRow>> {
        self.fetch_workflows(project_id).await
    }

    async fn get_workflow(
        &self,
        project_id: i64,
        provider_workflow_id: i64,
    ) -> Result<Option<WorkflowRow>> {
        self.fetch_workflow(project_id, provider_workflow_id).await
    }

    async fn get_outdated_workflows(&self, project_id: i64) -> Result<Vec<WorkflowRow>> {
        self.fetch_outdated_workflows(project_id).await
    }

    async fn record_dispatch(&self, log: &NewWorkflowLog) -> Result<Option<WorkflowLogRow>> {
        self.insert_dispatch(log).await
    }

    async fn get_open_workflow_logs(
        &self,
        project_id: i64,
        provider_workflow_id: i64,
    ) -> Result<Vec<WorkflowLogRow>> {
        self.fetch_open_workflow_logs(project_id, provider_workflow_id)
            .await
    }

    async fn advance_workflow_log(
        &self,
        id: i64,
        state: RunState,
        started_at: Option<DateTime<Utc>>,
        duration_ms: Option<i64>,
    ) -> Result<bool> {
        self.update_workflow_log_state(id, state, started_at, duration_ms)
            .await
    }

    async fn settle_workflow(&self, project_id: i64, provider_workflow_id: i64) -> Result<bool> {
        self.mark_workflow_up_to_date(project_id, provider_workflow_id)
            .await
    }

    async fn insert_agent_log(&self, log: &NewAgentLog) -> Result<AgentLogRow> {
        self.append_agent_log(log).await
    }

    async fn insert_project_log(&self, log: &NewProjectLog) -> Result<ProjectLogRow> {
        self.append_project_log(log).await
    }

    async fn get_agent_logs(&self, agent_id: i64, limit: i64) -> Result<Vec<AgentLogRow>> {
        self.fetch_agent_logs(agent_id, limit).await
    }

    async fn get_project_logs(&self, project_id: i64, limit: i64) -> Result<Vec<ProjectLogRow>> {
        self.fetch_project_logs(project_id, limit).await
    }

    async fn get_workflow_logs(&self, project_id: i64, limit: i64) -> Result<Vec<WorkflowLogRow>> {
        self.fetch_workflow_logs(project_id, limit).await
    }

    async fn health_check(&self) -> Result<()> {
        self.ping().await
    }
}

// ── Tests ───────────────────────────────────────────────────────
