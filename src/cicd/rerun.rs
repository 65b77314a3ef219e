//! Rerun Dispatcher: trigger a rerun of a workflow's latest run.
//!
//! The workflow is resolved from an agent binding or given directly. The
//! newest run whose name matches is rerun; on 201/202 a queued workflow log
//! is recorded for attempt `run_attempt + 1` and the workflow is marked
//! outdated so the poller picks it up. Every dispatch on a resolved agent or
//! project writes exactly one audit row, including failures.
//!
//! Reruns do not take the per-project lock.

use super::{elapsed_ms, Cicd, CicdError, RepoAccess};
use crate::db::{NewAgentLog, NewProjectLog, NewWorkflowLog, ProjectRow};
use serde::Serialize;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const ACTION: &str = "Rerun Workflow";

/// Who asked for the rerun, and of what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RerunTarget {
    Agent {
        agent_id: i64,
    },
    Workflow {
        project_id: i64,
        workflow_name: String,
        user_id: Option<i64>,
    },
}

/// User-visible text for a rerun response status.
pub fn rerun_status_message(status: u16) -> Option<&'static str> {
    match status {
        201 => Some("Created: CICD is starting rerun"),
        202 => Some("Accepted: CICD is already running"),
        401 => Some("Unauthorized"),
        404 => Some("Not Found"),
        s if s >= 500 => Some("Internal provider error"),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RerunOutcome {
    pub status: u16,
    pub latency_ms: i64,
    pub message: String,
    pub workflow_run_id: i64,
    pub attempt_number: i32,
    /// False when a log for this `(run, attempt)` already existed.
    pub log_created: bool,
}

enum Auditor {
    Agent { agent_id: i64 },
    User { user_id: Option<i64> },
}

impl Cicd {
    pub async fn rerun(
        &self,
        target: RerunTarget,
        cancel: &CancellationToken,
    ) -> Result<RerunOutcome, CicdError> {
        let (project, workflow_name, auditor) = match target {
            RerunTarget::Agent { agent_id } => {
                let agent = self
                    .store
                    .get_agent(agent_id)
                    .await?
                    .ok_or_else(|| CicdError::NotFound(format!("agent {} not found", agent_id)))?;
                let project = self.load_project(agent.project_id).await?;
                (project, agent.workflow_name, Auditor::Agent { agent_id })
            }
            RerunTarget::Workflow {
                project_id,
                workflow_name,
                user_id,
            } => {
                let project = self.load_project(project_id).await?;
                (project, Some(workflow_name), Auditor::User { user_id })
            }
        };

        let started = Instant::now();
        let outcome = self
            .dispatch(&project, workflow_name.as_deref(), started, cancel)
            .await;

        let (status, latency_ms, message) = match &outcome {
            Ok(o) => (o.status, o.latency_ms, o.message.clone()),
            Err(e) => (e.http_status(), elapsed_ms(started), e.to_string()),
        };
        self.metrics.rerun(status);

        match auditor {
            Auditor::Agent { agent_id } => {
                self.store
                    .insert_agent_log(&NewAgentLog {
                        agent_id,
                        project_id: project.id,
                        action: ACTION.to_string(),
                        response_status: i32::from(status),
                        latency_ms,
                        message: message.clone(),
                    })
                    .await?;
            }
            Auditor::User { user_id } => {
                self.store
                    .insert_project_log(&NewProjectLog {
                        project_id: project.id,
                        user_id,
                        action: ACTION.to_string(),
                        response_status: i32::from(status),
                        latency_ms,
                        message: message.clone(),
                    })
                    .await?;
            }
        }

        match &outcome {
            Ok(o) => info!(
                project_id = project.id,
                workflow_run_id = o.workflow_run_id,
                attempt = o.attempt_number,
                status,
                latency_ms,
                "rerun dispatched"
            ),
            Err(e) => warn!(project_id = project.id, status, error = %e, "rerun failed"),
        }
        outcome
    }

    async fn dispatch(
        &self,
        project: &ProjectRow,
        workflow_name: Option<&str>,
        started: Instant,
        cancel: &CancellationToken,
    ) -> Result<RerunOutcome, CicdError> {
        let workflow_name = workflow_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| CicdError::InvalidInput("no workflow name bound".to_string()))?;
        let access = RepoAccess::for_project(project)?;
        let (repo, token) = (&access.repo, access.token.as_str());

        let runs = self
            .call(cancel, self.provider.list_workflow_runs(repo, token))
            .await
            .map_err(with_rerun_message)?;
        let run = runs
            .into_iter()
            .find(|r| r.name == workflow_name)
            .ok_or_else(|| {
                CicdError::NotFound(format!("not found workflow name {}", workflow_name))
            })?;

        let response = self
            .call(cancel, self.provider.rerun_workflow(repo, run.id, token))
            .await
            .map_err(with_rerun_message)?;
        let latency_ms = elapsed_ms(started);

        let attempt_number = run.run_attempt + 1;
        let inserted = self
            .store
            .record_dispatch(&NewWorkflowLog {
                project_id: project.id,
                provider_workflow_id: run.workflow_id,
                workflow_name: run.name.clone(),
                workflow_run_id: run.id,
                attempt_number,
            })
            .await?;

        let message = rerun_status_message(response.status)
            .map(str::to_string)
            .unwrap_or_else(|| format!("provider answered {}", response.status));
        Ok(RerunOutcome {
            status: response.status,
            latency_ms,
            message,
            workflow_run_id: run.id,
            attempt_number,
            log_created: inserted.is_some(),
        })
    }
}

fn with_rerun_message(e: CicdError) -> CicdError {
    match rerun_status_message(e.http_status()) {
        Some(message) => e.with_message(message),
        None => e,
    }
}
