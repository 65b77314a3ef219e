//! Project, agent and parameter reads.
//!
//! These tables belong to the CRUD layer; the bridge only reads them.

use super::{AgentRow, Database, ParameterRow, ProjectRow};
use anyhow::Result;

impl Database {
    pub async fn fetch_project(&self, id: i64) -> Result<Option<ProjectRow>> {
        let row = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, name, repo_coordinate, repo_api_token, is_archived
             FROM projects WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn fetch_active_projects(&self) -> Result<Vec<ProjectRow>> {
        let rows = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, name, repo_coordinate, repo_api_token, is_archived
             FROM projects WHERE NOT is_archived ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn fetch_agent(&self, id: i64) -> Result<Option<AgentRow>> {
        let row = sqlx::query_as::<_, AgentRow>(
            "SELECT id, project_id, name, workflow_name, stage_id, environment_id,
                    api_token, is_archived
             FROM agents WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Currently-applied parameters in deterministic upload order.
    pub async fn fetch_applied_parameters(&self, project_id: i64) -> Result<Vec<ParameterRow>> {
        let rows = sqlx::query_as::<_, ParameterRow>(
            "SELECT id, project_id, stage_id, environment_id, name, value,
                    is_applied, is_archived
             FROM parameters
             WHERE project_id = $1 AND is_applied AND NOT is_archived
             ORDER BY stage_id, environment_id, name",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
