//! GitHub OAuth web-flow callback.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use super::{error_response, AppState};

#[derive(Deserialize)]
pub(super) struct OAuthPayload {
    code: String,
}

/// POST /api/github/oauth — exchange `code` for a token and resolve the user.
pub(super) async fn handler_oauth(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<OAuthPayload>,
) -> impl IntoResponse {
    let cancel = state.shutdown.child_token();
    match state.cicd.oauth_login(&payload.code, &cancel).await {
        Ok(login) => Json(serde_json::json!(login)).into_response(),
        Err(e) => error_response(&e),
    }
}
