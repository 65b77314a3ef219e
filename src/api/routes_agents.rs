//! Agent-scoped API — rerun the bound workflow, read the agent's audit trail.

use axum::extract::{Path as AxumPath, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

use super::{error_response, status_or_ok, AppState, LimitQuery};
use crate::cicd::rerun::RerunTarget;
use crate::cicd::CicdError;

/// POST /api/agents/{id}/rerun — rerun the agent's workflow.
///
/// Provider outcomes (201/202) come back with their own status; failures
/// carry the mapped message, e.g. `Unauthorized` or `Internal provider error`.
pub(super) async fn handler_agent_rerun(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
) -> impl IntoResponse {
    let cancel = state.shutdown.child_token();
    match state
        .cicd
        .rerun(RerunTarget::Agent { agent_id: id }, &cancel)
        .await
    {
        Ok(outcome) => (status_or_ok(outcome.status), Json(serde_json::json!(outcome))).into_response(),
        Err(e) => error_response(&e),
    }
}

pub(super) async fn handler_agent_logs(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
    Query(q): Query<LimitQuery>,
) -> impl IntoResponse {
    match state.cicd.store().get_agent_logs(id, q.limit()).await {
        Ok(rows) => Json(serde_json::json!(rows)).into_response(),
        Err(e) => error_response(&CicdError::from(e)),
    }
}
