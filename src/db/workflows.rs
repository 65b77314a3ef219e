//! Workflow catalog and workflow-log lifecycle.
//!
//! Workflows are upserted by the reconciler and keyed by
//! `(project_id, provider_workflow_id)`. `last_attempt_number` only grows
//! (`GREATEST`), so the reconciler and the dispatcher can race on it safely.
//!
//! Workflow logs are created by the rerun dispatcher (`queued`) and advanced
//! by the poller. The state guard in `update_workflow_log_state` makes every
//! transition monotone: a completed log is never rewritten.

use super::{Database, NewWorkflowLog, RunState, WorkflowLogRow, WorkflowRow, WorkflowUpsert};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};

const WORKFLOW_COLUMNS: &str = "id, project_id, provider_workflow_id, name, path, state,
                                last_attempt_number, is_up_to_date, updated_at";

const LOG_COLUMNS: &str = "id, project_id, provider_workflow_id, workflow_run_id, attempt_number,
                           state, started_at, duration AS duration_ms, created_at, updated_at";

impl Database {
    pub async fn upsert_workflow_row(&self, w: &WorkflowUpsert) -> Result<WorkflowRow> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            "INSERT INTO workflows (project_id, provider_workflow_id, name, path, state, last_attempt_number)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (project_id, provider_workflow_id) DO UPDATE SET
               name = EXCLUDED.name, path = EXCLUDED.path, state = EXCLUDED.state,
               last_attempt_number = GREATEST(workflows.last_attempt_number, EXCLUDED.last_attempt_number),
               updated_at = NOW()
             RETURNING {}",
            WORKFLOW_COLUMNS
        ))
        .bind(w.project_id)
        .bind(w.provider_workflow_id)
        .bind(&w.name)
        .bind(&w.path)
        .bind(&w.state)
        .bind(w.last_attempt_number)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn fetch_workflows(&self, project_id: i64) -> Result<Vec<WorkflowRow>> {
        let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM workflows WHERE project_id = $1 ORDER BY name, provider_workflow_id",
            WORKFLOW_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn fetch_workflow(
        &self,
        project_id: i64,
        provider_workflow_id: i64,
    ) -> Result<Option<WorkflowRow>> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM workflows WHERE project_id = $1 AND provider_workflow_id = $2",
            WORKFLOW_COLUMNS
        ))
        .bind(project_id)
        .bind(provider_workflow_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn fetch_outdated_workflows(&self, project_id: i64) -> Result<Vec<WorkflowRow>> {
        let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM workflows WHERE project_id = $1 AND NOT is_up_to_date ORDER BY id",
            WORKFLOW_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Insert the queued log and flag the workflow in one transaction.
    ///
    /// The workflow row is locked before the log is written so a concurrent
    /// settle of the same workflow either runs before the log exists or
    /// waits for this commit. If the workflow has not been reconciled yet a
    /// placeholder row is created from the run's name; the next reconcile
    /// fills in path/state.
    pub async fn insert_dispatch(&self, log: &NewWorkflowLog) -> Result<Option<WorkflowLogRow>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO workflows (project_id, provider_workflow_id, name)
             VALUES ($1, $2, $3)
             ON CONFLICT (project_id, provider_workflow_id) DO NOTHING",
        )
        .bind(log.project_id)
        .bind(log.provider_workflow_id)
        .bind(&log.workflow_name)
        .execute(&mut *tx)
        .await?;
        lock_workflow(&mut tx, log.project_id, log.provider_workflow_id).await?;

        let inserted = sqlx::query_as::<_, WorkflowLogRow>(&format!(
            "INSERT INTO workflow_logs (project_id, provider_workflow_id, workflow_run_id, attempt_number, state)
             VALUES ($1, $2, $3, $4, 'queued')
             ON CONFLICT (workflow_run_id, attempt_number) DO NOTHING
             RETURNING {}",
            LOG_COLUMNS
        ))
        .bind(log.project_id)
        .bind(log.provider_workflow_id)
        .bind(log.workflow_run_id)
        .bind(log.attempt_number)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_some() {
            sqlx::query(
                "UPDATE workflows SET
                   last_attempt_number = GREATEST(last_attempt_number, $3),
                   is_up_to_date = FALSE,
                   updated_at = NOW()
                 WHERE project_id = $1 AND provider_workflow_id = $2",
            )
            .bind(log.project_id)
            .bind(log.provider_workflow_id)
            .bind(log.attempt_number)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn fetch_open_workflow_logs(
        &self,
        project_id: i64,
        provider_workflow_id: i64,
    ) -> Result<Vec<WorkflowLogRow>> {
        let rows = sqlx::query_as::<_, WorkflowLogRow>(&format!(
            "SELECT {} FROM workflow_logs
             WHERE project_id = $1 AND provider_workflow_id = $2 AND state <> 'completed'
             ORDER BY id",
            LOG_COLUMNS
        ))
        .bind(project_id)
        .bind(provider_workflow_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Move a log forward. Only `state`, `started_at`, `duration` and
    /// `updated_at` are written.
    pub async fn update_workflow_log_state(
        &self,
        id: i64,
        state: RunState,
        started_at: Option<DateTime<Utc>>,
        duration_ms: Option<i64>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE workflow_logs SET
               state = $2,
               started_at = COALESCE($3, started_at),
               duration = COALESCE($4, duration),
               updated_at = NOW()
             WHERE id = $1
               AND state <> 'completed'
               AND (CASE state WHEN 'queued' THEN 0 WHEN 'in_progress' THEN 1 ELSE 2 END) < $5",
        )
        .bind(id)
        .bind(state.as_str())
        .bind(started_at)
        .bind(duration_ms)
        .bind(state.rank())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Compare-and-set `is_up_to_date = true` when no open log remains.
    ///
    /// Takes the workflow row lock first; the open-log check is a separate
    /// statement so it sees any dispatch that committed while we waited.
    pub async fn mark_workflow_up_to_date(
        &self,
        project_id: i64,
        provider_workflow_id: i64,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let Some(up_to_date) = lock_workflow(&mut tx, project_id, provider_workflow_id).await? else {
            return Ok(false);
        };
        if up_to_date {
            return Ok(false);
        }
        let (open,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (
               SELECT 1 FROM workflow_logs
               WHERE project_id = $1 AND provider_workflow_id = $2 AND state <> 'completed'
             )",
        )
        .bind(project_id)
        .bind(provider_workflow_id)
        .fetch_one(&mut *tx)
        .await?;
        if open {
            return Ok(false);
        }
        sqlx::query(
            "UPDATE workflows SET is_up_to_date = TRUE, updated_at = NOW()
             WHERE project_id = $1 AND provider_workflow_id = $2",
        )
        .bind(project_id)
        .bind(provider_workflow_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    pub async fn fetch_workflow_logs(&self, project_id: i64, limit: i64) -> Result<Vec<WorkflowLogRow>> {
        let rows = sqlx::query_as::<_, WorkflowLogRow>(&format!(
            "SELECT {} FROM workflow_logs WHERE project_id = $1 ORDER BY id DESC LIMIT $2",
            LOG_COLUMNS
        ))
        .bind(project_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// `SELECT ... FOR UPDATE` on one workflow row. Returns its `is_up_to_date`,
/// or `None` when the row does not exist.
async fn lock_workflow(
    tx: &mut Transaction<'_, Postgres>,
    project_id: i64,
    provider_workflow_id: i64,
) -> Result<Option<bool>> {
    let row: Option<(bool,)> = sqlx::query_as(
        "SELECT is_up_to_date FROM workflows
         WHERE project_id = $1 AND provider_workflow_id = $2
         FOR UPDATE",
    )
    .bind(project_id)
    .bind(provider_workflow_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.map(|(up_to_date,)| up_to_date))
}
