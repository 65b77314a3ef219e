//! Shared test helpers for integration tests.
//!
//! - [`ScriptedProvider`]: an in-process [`CicdProvider`] with configurable
//!   responses and a call log, so core components run without the network.
//! - [`fixture`]: a [`MemoryStore`] + [`ScriptedProvider`] pair wired into a
//!   [`Cicd`] context.
//! - PostgreSQL helpers gated on `TEST_DATABASE_URL`.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use crypto_box::aead::OsRng;
use crypto_box::SecretKey;
use paramstore::cicd::Cicd;
use paramstore::db::memory::MemoryStore;
use paramstore::github::{
    CicdProvider, CodeSearchItem, Collaborator, GithubUser, ProviderError, PublicKeyResponse,
    RemoteWorkflow, RepoInfo, RerunResponse, RunAttempt, SecretUpsert, WorkflowRun,
};
use paramstore::prom_metrics::Metrics;
use paramstore::repo_url::RepoRef;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Scripted provider ───────────────────────────────────────────

/// Responses served by [`ScriptedProvider`]. Fields are public so tests can
/// rewrite the script between calls.
pub struct Script {
    pub repo: Result<RepoInfo, ProviderError>,
    /// `None` serves the provider's own generated key.
    pub public_key: Option<Result<PublicKeyResponse, ProviderError>>,
    /// Per-secret override; anything not listed answers `Created`.
    pub upserts: HashMap<String, Result<SecretUpsert, ProviderError>>,
    pub workflows: Result<Vec<RemoteWorkflow>, ProviderError>,
    pub runs: Result<Vec<WorkflowRun>, ProviderError>,
    pub attempts: HashMap<(i64, i32), Result<RunAttempt, ProviderError>>,
    pub rerun: Result<RerunResponse, ProviderError>,
    pub files: HashMap<String, Vec<u8>>,
    pub search: Vec<CodeSearchItem>,
    pub collaborators: Vec<Collaborator>,
    pub oauth_token: Result<String, ProviderError>,
    pub user: GithubUser,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            repo: Ok(RepoInfo {
                id: 1,
                full_name: "acme/widgets".to_string(),
                private: true,
                default_branch: Some("main".to_string()),
            }),
            public_key: None,
            upserts: HashMap::new(),
            workflows: Ok(Vec::new()),
            runs: Ok(Vec::new()),
            attempts: HashMap::new(),
            rerun: Ok(RerunResponse {
                status: 201,
                body: String::new(),
            }),
            files: HashMap::new(),
            search: Vec::new(),
            collaborators: Vec::new(),
            oauth_token: Ok("gho_test".to_string()),
            user: GithubUser {
                login: "octocat".to_string(),
                id: 583231,
                name: Some("The Octocat".to_string()),
                email: None,
            },
        }
    }
}

/// One recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: &'static str,
    pub repo: Option<String>,
    pub arg: String,
    pub token: String,
}

#[derive(Default)]
struct Journal {
    calls: Vec<Call>,
    /// `(secret name, base64 envelope, key_id)` for each upsert.
    sealed: Vec<(String, String, String)>,
    in_flight: usize,
    max_in_flight: usize,
}

pub struct ScriptedProvider {
    script: Mutex<Script>,
    journal: Mutex<Journal>,
    secret_key: SecretKey,
    key_id: String,
    /// Simulated latency of secret upserts and rerun dispatches.
    latency: Duration,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            script: Mutex::new(Script::default()),
            journal: Mutex::new(Journal::default()),
            secret_key: SecretKey::generate(&mut OsRng),
            key_id: "568250167242549743".to_string(),
            latency,
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn public_key_b64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.secret_key.public_key().as_bytes())
    }

    /// Edit the script in place.
    pub fn script<R>(&self, f: impl FnOnce(&mut Script) -> R) -> R {
        f(&mut self.script.lock().unwrap())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.journal.lock().unwrap().calls.clone()
    }

    pub fn ops(&self) -> Vec<&'static str> {
        self.calls().into_iter().map(|c| c.op).collect()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls().iter().filter(|c| c.op == op).count()
    }

    /// Secret names in upsert order.
    pub fn upserted_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.op == "upsert_secret")
            .map(|c| c.arg)
            .collect()
    }

    /// Open the envelope uploaded for `name` (latest upload wins).
    pub fn opened_secret(&self, name: &str) -> Option<Vec<u8>> {
        let journal = self.journal.lock().unwrap();
        let (_, envelope, _) = journal.sealed.iter().rev().find(|(n, _, _)| n == name)?;
        let raw = base64::engine::general_purpose::STANDARD
            .decode(envelope)
            .ok()?;
        self.secret_key.unseal(&raw).ok()
    }

    pub fn upload_key_ids(&self) -> Vec<String> {
        self.journal
            .lock()
            .unwrap()
            .sealed
            .iter()
            .map(|(_, _, k)| k.clone())
            .collect()
    }

    pub fn max_concurrent_upserts(&self) -> usize {
        self.journal.lock().unwrap().max_in_flight
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn record(&self, op: &'static str, repo: Option<&RepoRef>, arg: impl Into<String>, token: &str) {
        self.journal.lock().unwrap().calls.push(Call {
            op,
            repo: repo.map(|r| r.as_slug()),
            arg: arg.into(),
            token: token.to_string(),
        });
    }
}

#[async_trait]
impl CicdProvider for ScriptedProvider {
    async fn get_repo(&self, repo: &RepoRef, token: &str) -> Result<RepoInfo, ProviderError> {
        self.record("get_repo", Some(repo), "", token);
        self.script(|s| s.repo.clone())
    }

    async fn get_repo_public_key(
        &self,
        repo: &RepoRef,
        token: &str,
    ) -> Result<PublicKeyResponse, ProviderError> {
        self.record("get_repo_public_key", Some(repo), "", token);
        match self.script(|s| s.public_key.clone()) {
            Some(scripted) => scripted,
            None => Ok(PublicKeyResponse {
                key_id: self.key_id.clone(),
                key: self.public_key_b64(),
            }),
        }
    }

    async fn upsert_secret(
        &self,
        repo: &RepoRef,
        secret_name: &str,
        encrypted_value_b64: &str,
        key_id: &str,
        token: &str,
    ) -> Result<SecretUpsert, ProviderError> {
        self.record("upsert_secret", Some(repo), secret_name, token);
        {
            let mut journal = self.journal.lock().unwrap();
            journal.sealed.push((
                secret_name.to_string(),
                encrypted_value_b64.to_string(),
                key_id.to_string(),
            ));
            journal.in_flight += 1;
            journal.max_in_flight = journal.max_in_flight.max(journal.in_flight);
        }
        self.pause().await;
        self.journal.lock().unwrap().in_flight -= 1;
        self.script(|s| {
            s.upserts
                .get(secret_name)
                .cloned()
                .unwrap_or(Ok(SecretUpsert::Created))
        })
    }

    async fn list_workflows(
        &self,
        repo: &RepoRef,
        token: &str,
    ) -> Result<Vec<RemoteWorkflow>, ProviderError> {
        self.record("list_workflows", Some(repo), "", token);
        self.script(|s| s.workflows.clone())
    }

    async fn list_workflow_runs(
        &self,
        repo: &RepoRef,
        token: &str,
    ) -> Result<Vec<WorkflowRun>, ProviderError> {
        self.record("list_workflow_runs", Some(repo), "", token);
        self.script(|s| s.runs.clone())
    }

    async fn get_workflow_run(
        &self,
        repo: &RepoRef,
        run_id: i64,
        token: &str,
    ) -> Result<WorkflowRun, ProviderError> {
        self.record("get_workflow_run", Some(repo), run_id.to_string(), token);
        self.script(|s| match &s.runs {
            Ok(runs) => runs
                .iter()
                .find(|r| r.id == run_id)
                .cloned()
                .ok_or_else(|| ProviderError::NotFound(format!("run {}", run_id))),
            Err(e) => Err(e.clone()),
        })
    }

    async fn get_run_attempt(
        &self,
        repo: &RepoRef,
        run_id: i64,
        attempt: i32,
        token: &str,
    ) -> Result<RunAttempt, ProviderError> {
        self.record(
            "get_run_attempt",
            Some(repo),
            format!("{}/{}", run_id, attempt),
            token,
        );
        self.script(|s| {
            s.attempts
                .get(&(run_id, attempt))
                .cloned()
                .unwrap_or_else(|| Err(ProviderError::NotFound(format!("{}/{}", run_id, attempt))))
        })
    }

    async fn rerun_workflow(
        &self,
        repo: &RepoRef,
        run_id: i64,
        token: &str,
    ) -> Result<RerunResponse, ProviderError> {
        self.record("rerun_workflow", Some(repo), run_id.to_string(), token);
        self.pause().await;
        self.script(|s| s.rerun.clone())
    }

    async fn get_file_content(
        &self,
        repo: &RepoRef,
        path: &str,
        token: &str,
    ) -> Result<Vec<u8>, ProviderError> {
        self.record("get_file_content", Some(repo), path, token);
        self.script(|s| {
            s.files
                .get(path)
                .cloned()
                .ok_or_else(|| ProviderError::NotFound(path.to_string()))
        })
    }

    async fn search_code(
        &self,
        repo: &RepoRef,
        query: &str,
        token: &str,
    ) -> Result<Vec<CodeSearchItem>, ProviderError> {
        self.record("search_code", Some(repo), query, token);
        self.script(|s| Ok(s.search.clone()))
    }

    async fn list_collaborators(
        &self,
        repo: &RepoRef,
        token: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<Collaborator>, ProviderError> {
        self.record(
            "list_collaborators",
            Some(repo),
            format!("{}/{}", page, per_page),
            token,
        );
        self.script(|s| Ok(s.collaborators.clone()))
    }

    async fn exchange_oauth_code(&self, code: &str) -> Result<String, ProviderError> {
        self.record("exchange_oauth_code", None, code, "");
        self.script(|s| s.oauth_token.clone())
    }

    async fn get_authenticated_user(&self, token: &str) -> Result<GithubUser, ProviderError> {
        self.record("get_authenticated_user", None, "", token);
        self.script(|s| Ok(s.user.clone()))
    }
}

// ── Fixtures ────────────────────────────────────────────────────

pub const COORDINATE: &str = "github.com/acme/widgets";
pub const TOKEN: &str = "ghp_project_token";

pub struct Fixture {
    pub cicd: Cicd,
    pub store: Arc<MemoryStore>,
    pub provider: Arc<ScriptedProvider>,
    pub metrics: Arc<Metrics>,
}

pub fn fixture() -> Fixture {
    fixture_with(ScriptedProvider::new())
}

pub fn fixture_with(provider: ScriptedProvider) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(provider);
    let metrics = Arc::new(Metrics::new());
    let cicd = Cicd::new(store.clone(), provider.clone(), metrics.clone());
    Fixture {
        cicd,
        store,
        provider,
        metrics,
    }
}

pub fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

pub fn run(id: i64, name: &str, workflow_id: i64, run_attempt: i32) -> WorkflowRun {
    WorkflowRun {
        id,
        name: name.to_string(),
        workflow_id,
        run_attempt,
        status: Some("completed".to_string()),
        created_at: None,
        updated_at: None,
    }
}

pub fn remote_workflow(id: i64, name: &str, path: &str) -> RemoteWorkflow {
    RemoteWorkflow {
        id,
        name: name.to_string(),
        path: path.to_string(),
        state: "active".to_string(),
    }
}

/// A finished attempt: positive duration, update after start.
pub fn completed_attempt(run_attempt: i32, duration_ms: i64) -> RunAttempt {
    RunAttempt {
        run_attempt,
        run_started_at: Some(ts("2024-05-01T12:00:00Z")),
        updated_at: Some(ts("2024-05-01T12:05:00Z")),
        status: Some("completed".to_string()),
        conclusion: Some("success".to_string()),
        duration_ms,
    }
}

pub fn running_attempt(run_attempt: i32) -> RunAttempt {
    RunAttempt {
        run_attempt,
        run_started_at: Some(ts("2024-05-01T12:00:00Z")),
        updated_at: Some(ts("2024-05-01T12:00:00Z")),
        status: Some("in_progress".to_string()),
        conclusion: None,
        duration_ms: 0,
    }
}

pub fn transport_500() -> ProviderError {
    ProviderError::Transport {
        status: Some(500),
        message: "provider returned 500: boom".to_string(),
    }
}

// ── PostgreSQL ──────────────────────────────────────────────────

/// Returns the test database URL from the `TEST_DATABASE_URL` environment variable.
/// Panics if the variable is not set.
pub fn test_db_url() -> String {
    std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set for integration tests")
}

/// Returns true if the test database URL is configured.
pub fn has_test_db() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

static SCHEMA_INIT: tokio::sync::OnceCell<()> = tokio::sync::OnceCell::const_new();

/// Connect to the test database with every table emptied. The schema is
/// applied once per test binary.
pub async fn setup_test_db() -> paramstore::db::Database {
    let db = paramstore::db::Database::connect(&test_db_url())
        .await
        .expect("Failed to connect to test database");
    SCHEMA_INIT
        .get_or_init(|| async {
            db.migrate().await.expect("Failed to apply schema");
        })
        .await;
    sqlx::raw_sql(
        "TRUNCATE TABLE agent_logs, project_logs, workflow_logs, workflows,
                        parameters, agents, projects
         RESTART IDENTITY CASCADE",
    )
    .execute(db.pool())
    .await
    .unwrap();
    db
}

/// Insert a project row and return its id.
pub async fn seed_project(
    db: &paramstore::db::Database,
    name: &str,
    coordinate: Option<&str>,
    token: Option<&str>,
) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO projects (name, repo_coordinate, repo_api_token) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(name)
    .bind(coordinate)
    .bind(token)
    .fetch_one(db.pool())
    .await
    .unwrap()
}

pub async fn seed_agent(db: &paramstore::db::Database, project_id: i64, workflow: &str) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO agents (project_id, name, workflow_name) VALUES ($1, 'agent', $2) RETURNING id",
    )
    .bind(project_id)
    .bind(workflow)
    .fetch_one(db.pool())
    .await
    .unwrap()
}

pub async fn seed_parameter(
    db: &paramstore::db::Database,
    project_id: i64,
    stage_id: i64,
    environment_id: i64,
    name: &str,
    is_applied: bool,
) {
    sqlx::query(
        "INSERT INTO parameters (project_id, stage_id, environment_id, name, value, is_applied)
         VALUES ($1, $2, $3, $4, 'v', $5)",
    )
    .bind(project_id)
    .bind(stage_id)
    .bind(environment_id)
    .bind(name)
    .bind(is_applied)
    .execute(db.pool())
    .await
    .unwrap();
}
