//! Workflow Reconciler: bring the local `workflows` catalog in line with the
//! repository.
//!
//! Runs at startup for every active project and on each workflow-list read.
//! Logs are never touched; the only column shared with the dispatcher is
//! `last_attempt_number`, which the store only ever raises.

use super::{elapsed_ms, Cicd, CicdError, RepoAccess};
use crate::db::{NewProjectLog, ProjectRow, WorkflowRow, WorkflowUpsert};
use serde::Serialize;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const ACTION: &str = "Sync Workflows";

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub project_id: i64,
    /// True when the project has no coordinate or token and nothing was done.
    pub skipped: bool,
    pub workflows: Vec<WorkflowRow>,
}

impl Cicd {
    pub async fn reconcile_project(
        &self,
        project_id: i64,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport, CicdError> {
        let project = self.load_project(project_id).await?;
        self.reconcile(&project, cancel).await
    }

    /// Reconcile every non-archived project, one at a time. Failures are
    /// logged and do not stop the pass. Returns the number reconciled.
    pub async fn reconcile_all(&self, cancel: &CancellationToken) -> Result<usize, CicdError> {
        let projects = self.store.get_active_projects().await?;
        let mut reconciled = 0;
        for project in &projects {
            if cancel.is_cancelled() {
                return Err(CicdError::Canceled);
            }
            match self.reconcile(project, cancel).await {
                Ok(report) if !report.skipped => reconciled += 1,
                Ok(_) => {}
                Err(CicdError::Canceled) => return Err(CicdError::Canceled),
                Err(e) => warn!(project_id = project.id, error = %e, "workflow reconcile failed"),
            }
        }
        Ok(reconciled)
    }

    pub async fn reconcile(
        &self,
        project: &ProjectRow,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport, CicdError> {
        let access = match RepoAccess::for_project(project) {
            Ok(access) => access,
            Err(CicdError::PreconditionFailed(reason)) => {
                warn!(project_id = project.id, %reason, "skipping workflow reconcile");
                return Ok(ReconcileReport {
                    project_id: project.id,
                    skipped: true,
                    workflows: Vec::new(),
                });
            }
            Err(e) => return Err(e),
        };

        let started = Instant::now();
        let outcome = self.sync_workflows(project.id, &access, cancel).await;
        let latency_ms = elapsed_ms(started);

        let (status, message) = match &outcome {
            Ok(rows) => (200u16, format!("synced {} workflows", rows.len())),
            Err(e) => (e.http_status(), e.to_string()),
        };
        self.store
            .insert_project_log(&NewProjectLog {
                project_id: project.id,
                user_id: None,
                action: ACTION.to_string(),
                response_status: i32::from(status),
                latency_ms,
                message,
            })
            .await?;

        let rows = outcome?;
        info!(project_id = project.id, count = rows.len(), latency_ms, "workflows reconciled");
        Ok(ReconcileReport {
            project_id: project.id,
            skipped: false,
            workflows: rows,
        })
    }

    async fn sync_workflows(
        &self,
        project_id: i64,
        access: &RepoAccess,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkflowRow>, CicdError> {
        let (repo, token) = (&access.repo, access.token.as_str());
        let remote = self
            .call(cancel, self.provider.list_workflows(repo, token))
            .await?;
        let runs = self
            .call(cancel, self.provider.list_workflow_runs(repo, token))
            .await?;

        let mut rows = Vec::with_capacity(remote.len());
        for workflow in remote {
            // Runs come newest first; the first match is the latest run.
            let last_attempt_number = match runs.iter().find(|r| r.workflow_id == workflow.id) {
                Some(run) => {
                    self.call(cancel, self.provider.get_workflow_run(repo, run.id, token))
                        .await?
                        .run_attempt
                }
                None => 0,
            };
            let row = self
                .store
                .upsert_workflow(&WorkflowUpsert {
                    project_id,
                    provider_workflow_id: workflow.id,
                    name: workflow.name,
                    path: workflow.path,
                    state: workflow.state,
                    last_attempt_number,
                })
                .await?;
            rows.push(row);
        }
        Ok(rows)
    }
}
