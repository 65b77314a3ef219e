//! Run-Status Poller: advance open workflow logs from provider attempt data.
//!
//! One sweep walks active projects, their outdated workflows, and each
//! workflow's open logs in insertion order. Per log it fetches the attempt:
//!
//! - positive duration and `updated_at > run_started_at`: log → `completed`
//!   with authoritative `started_at` / `duration`
//! - provider status `in_progress`: a queued log → `in_progress`
//! - provider failure: logged and skipped; the next sweep retries
//!
//! After a workflow's logs are handled it is settled: `is_up_to_date` flips
//! back to true only if no open log remains. A workflow flagged outdated with
//! no open logs at all is healed the same way.
//!
//! Sweeps run back to back with a fixed sleep in between and no parallelism
//! across projects, which bounds provider QPS. On cancellation the in-flight
//! attempt fetch completes, then the sweep stops before the next log.

use super::{Cicd, CicdError, RepoAccess};
use crate::config::PollerConfig;
use crate::db::{RunState, WorkflowLogRow};
use crate::github::RunAttempt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub projects: usize,
    pub workflows: usize,
    pub logs_checked: usize,
    pub started: usize,
    pub completed: usize,
    pub settled: usize,
    pub errors: usize,
    /// True when the sweep stopped early on cancellation.
    pub interrupted: bool,
}

/// What a fetched attempt means for a log in its current state.
fn next_state(log: &WorkflowLogRow, attempt: &RunAttempt) -> Option<RunState> {
    let current = log.run_state().unwrap_or(RunState::Queued);
    if attempt.is_complete() {
        return Some(RunState::Completed);
    }
    if attempt.status.as_deref() == Some("in_progress") && current < RunState::InProgress {
        return Some(RunState::InProgress);
    }
    None
}

impl Cicd {
    /// Run one sweep.
    pub async fn sweep(&self, cancel: &CancellationToken) -> Result<SweepStats, CicdError> {
        let mut stats = SweepStats::default();
        let projects = self.store.get_active_projects().await?;

        'projects: for project in &projects {
            let workflows = self.store.get_outdated_workflows(project.id).await?;
            if workflows.is_empty() {
                continue;
            }
            stats.projects += 1;
            let access = RepoAccess::for_project(project);

            for workflow in &workflows {
                stats.workflows += 1;
                let logs = self
                    .store
                    .get_open_workflow_logs(project.id, workflow.provider_workflow_id)
                    .await?;

                if !logs.is_empty() {
                    let access = match &access {
                        Ok(access) => access,
                        Err(e) => {
                            warn!(project_id = project.id, error = %e, "cannot poll workflow runs");
                            stats.errors += 1;
                            continue 'projects;
                        }
                    };
                    for log in &logs {
                        if cancel.is_cancelled() {
                            stats.interrupted = true;
                            break 'projects;
                        }
                        self.poll_log(access, log, &mut stats).await?;
                    }
                }

                if self
                    .store
                    .settle_workflow(project.id, workflow.provider_workflow_id)
                    .await?
                {
                    stats.settled += 1;
                    debug!(
                        project_id = project.id,
                        workflow_id = workflow.provider_workflow_id,
                        "workflow up to date"
                    );
                }
            }
        }

        self.metrics.poll_sweeps.inc();
        Ok(stats)
    }

    async fn poll_log(
        &self,
        access: &RepoAccess,
        log: &WorkflowLogRow,
        stats: &mut SweepStats,
    ) -> Result<(), CicdError> {
        stats.logs_checked += 1;
        // Not raced against cancellation: the current call is allowed to finish.
        let attempt = match self
            .provider
            .get_run_attempt(
                &access.repo,
                log.workflow_run_id,
                log.attempt_number,
                &access.token,
            )
            .await
        {
            Ok(attempt) => attempt,
            Err(e) => {
                self.metrics.provider_error(e.kind());
                warn!(
                    workflow_run_id = log.workflow_run_id,
                    attempt = log.attempt_number,
                    error = %e,
                    "failed to fetch run attempt"
                );
                stats.errors += 1;
                return Ok(());
            }
        };

        match next_state(log, &attempt) {
            Some(RunState::Completed) => {
                let advanced = self
                    .store
                    .advance_workflow_log(
                        log.id,
                        RunState::Completed,
                        attempt.run_started_at,
                        Some(attempt.duration_ms),
                    )
                    .await?;
                if advanced {
                    stats.completed += 1;
                    self.metrics.workflow_logs_completed.inc();
                    info!(
                        workflow_run_id = log.workflow_run_id,
                        attempt = log.attempt_number,
                        duration_ms = attempt.duration_ms,
                        "workflow run completed"
                    );
                }
            }
            Some(state) => {
                if self
                    .store
                    .advance_workflow_log(log.id, state, attempt.run_started_at, None)
                    .await?
                {
                    stats.started += 1;
                }
            }
            None => {}
        }
        Ok(())
    }
}

/// Sweep until `cancel` fires, sleeping `config.interval` between sweeps.
pub async fn run_poller(cicd: Cicd, config: PollerConfig, cancel: CancellationToken) {
    info!(interval_secs = config.interval.as_secs(), "run-status poller started");
    loop {
        match cicd.sweep(&cancel).await {
            Ok(stats) if stats.logs_checked > 0 || stats.settled > 0 => info!(
                logs = stats.logs_checked,
                completed = stats.completed,
                settled = stats.settled,
                errors = stats.errors,
                "poll sweep finished"
            ),
            Ok(_) => debug!("poll sweep found nothing outstanding"),
            Err(e) => warn!(error = %e, "poll sweep failed"),
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.interval) => {}
        }
    }
    info!("run-status poller stopped");
}

pub fn spawn_poller(cicd: Cicd, config: PollerConfig, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(run_poller(cicd, config, cancel))
}
