//! Append-only audit trail for agent- and project-initiated actions.

use super::{AgentLogRow, Database, NewAgentLog, NewProjectLog, ProjectLogRow};
use anyhow::Result;

impl Database {
    pub async fn append_agent_log(&self, log: &NewAgentLog) -> Result<AgentLogRow> {
        let row = sqlx::query_as::<_, AgentLogRow>(
            "INSERT INTO agent_logs (agent_id, project_id, action, response_status, latency_ms, message)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id, agent_id, project_id, action, response_status, latency_ms, message, created_at",
        )
        .bind(log.agent_id)
        .bind(log.project_id)
        .bind(&log.action)
        .bind(log.response_status)
        .bind(log.latency_ms)
        .bind(&log.message)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn append_project_log(&self, log: &NewProjectLog) -> Result<ProjectLogRow> {
        let row = sqlx::query_as::<_, ProjectLogRow>(
            "INSERT INTO project_logs (project_id, user_id, action, response_status, latency_ms, message)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id, project_id, user_id, action, response_status, latency_ms, message, created_at",
        )
        .bind(log.project_id)
        .bind(log.user_id)
        .bind(&log.action)
        .bind(log.response_status)
        .bind(log.latency_ms)
        .bind(&log.message)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Most recent first.
    pub async fn fetch_agent_logs(&self, agent_id: i64, limit: i64) -> Result<Vec<AgentLogRow>> {
        let rows = sqlx::query_as::<_, AgentLogRow>(
            "SELECT id, agent_id, project_id, action, response_status, latency_ms, message, created_at
             FROM agent_logs WHERE agent_id = $1
             ORDER BY id DESC LIMIT $2",
        )
        .bind(agent_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Most recent first.
    pub async fn fetch_project_logs(&self, project_id: i64, limit: i64) -> Result<Vec<ProjectLogRow>> {
        let rows = sqlx::query_as::<_, ProjectLogRow>(
            "SELECT id, project_id, user_id, action, response_status, latency_ms, message, created_at
             FROM project_logs WHERE project_id = $1
             ORDER BY id DESC LIMIT $2",
        )
        .bind(project_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
