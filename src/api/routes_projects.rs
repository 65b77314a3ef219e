//! Project-scoped CICD API — secret sync, repo check, workflows, logs,
//! secret usages, collaborators.

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use super::{error_response, status_or_ok, AppState, LimitQuery};
use crate::cicd::repo::DEFAULT_PER_PAGE;
use crate::cicd::rerun::RerunTarget;
use crate::cicd::CicdError;

#[derive(Deserialize)]
pub(super) struct ActorQuery {
    user_id: Option<i64>,
}

/// POST /api/projects/{id}/secrets/sync — propagate applied parameters.
pub(super) async fn handler_secrets_sync(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
    Query(actor): Query<ActorQuery>,
) -> impl IntoResponse {
    let cancel = state.shutdown.child_token();
    match state
        .cicd
        .propagate_parameters(id, actor.user_id, &cancel)
        .await
    {
        Ok(report) => (
            status_or_ok(report.overall.http_status()),
            Json(serde_json::json!(report)),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /api/projects/{id}/repo/validate — check coordinate + token access.
pub(super) async fn handler_repo_validate(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
) -> impl IntoResponse {
    let cancel = state.shutdown.child_token();
    match state.cicd.validate_repo(id, &cancel).await {
        Ok(repo) => Json(serde_json::json!({"valid": true, "repository": repo})).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /api/projects/{id}/workflows — reconcile, then list the local catalog.
pub(super) async fn handler_workflows_list(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
) -> impl IntoResponse {
    let cancel = state.shutdown.child_token();
    if let Err(e) = state.cicd.reconcile_project(id, &cancel).await {
        return error_response(&e);
    }
    match state.cicd.store().get_workflows(id).await {
        Ok(rows) => Json(serde_json::json!(rows)).into_response(),
        Err(e) => error_response(&CicdError::from(e)),
    }
}

#[derive(Deserialize)]
pub(super) struct RerunPayload {
    workflow_name: String,
    #[serde(default)]
    user_id: Option<i64>,
}

/// POST /api/projects/{id}/workflows/rerun — rerun a workflow by name.
pub(super) async fn handler_workflow_rerun(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
    Json(payload): Json<RerunPayload>,
) -> impl IntoResponse {
    let cancel = state.shutdown.child_token();
    let target = RerunTarget::Workflow {
        project_id: id,
        workflow_name: payload.workflow_name,
        user_id: payload.user_id,
    };
    match state.cicd.rerun(target, &cancel).await {
        Ok(outcome) => (status_or_ok(outcome.status), Json(serde_json::json!(outcome))).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /api/projects/{id}/workflows/{wid}/definition — workflow YAML.
pub(super) async fn handler_workflow_definition(
    State(state): State<Arc<AppState>>,
    AxumPath((id, wid)): AxumPath<(i64, i64)>,
) -> impl IntoResponse {
    let cancel = state.shutdown.child_token();
    match state.cicd.workflow_definition(id, wid, &cancel).await {
        Ok(def) => Json(serde_json::json!(def)).into_response(),
        Err(e) => error_response(&e),
    }
}

pub(super) async fn handler_workflow_logs(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
    Query(q): Query<LimitQuery>,
) -> impl IntoResponse {
    match state.cicd.store().get_workflow_logs(id, q.limit()).await {
        Ok(rows) => Json(serde_json::json!(rows)).into_response(),
        Err(e) => error_response(&CicdError::from(e)),
    }
}

pub(super) async fn handler_project_logs(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
    Query(q): Query<LimitQuery>,
) -> impl IntoResponse {
    match state.cicd.store().get_project_logs(id, q.limit()).await {
        Ok(rows) => Json(serde_json::json!(rows)).into_response(),
        Err(e) => error_response(&CicdError::from(e)),
    }
}

/// GET /api/projects/{id}/parameters/{name}/usages — files referencing
/// `secrets.<name>`.
pub(super) async fn handler_parameter_usages(
    State(state): State<Arc<AppState>>,
    AxumPath((id, name)): AxumPath<(i64, String)>,
) -> impl IntoResponse {
    let cancel = state.shutdown.child_token();
    match state.cicd.parameter_usages(id, &name, &cancel).await {
        Ok(items) => Json(serde_json::json!(items)).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
pub(super) struct PageQuery {
    page: Option<u32>,
    per_page: Option<u32>,
}

pub(super) async fn handler_collaborators(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
    Query(q): Query<PageQuery>,
) -> impl IntoResponse {
    let cancel = state.shutdown.child_token();
    let page = q.page.unwrap_or(1);
    let per_page = q.per_page.unwrap_or(DEFAULT_PER_PAGE);
    match state.cicd.collaborators(id, page, per_page, &cancel).await {
        Ok(list) => (StatusCode::OK, Json(serde_json::json!(list))).into_response(),
        Err(e) => error_response(&e),
    }
}
