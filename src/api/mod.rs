//! # API — HTTP Surface for the CICD Bridge
//!
//! Runs an Axum HTTP server exposing the core operations as thin handlers,
//! plus Kubernetes health probes and the Prometheus scrape endpoint.
//! `serve` also reconciles every project once at startup and runs the
//! run-status poller until shutdown.
//!
//! Errors render as `{"error": message}` with the status from
//! [`CicdError::http_status`](crate::cicd::CicdError::http_status).

mod routes_agents;
mod routes_github;
mod routes_health;
mod routes_projects;

use crate::cicd::{poller, Cicd, CicdError};
use crate::config::PollerConfig;
use crate::prom_metrics::Metrics;
use anyhow::Result;
use axum::extract::{MatchedPath, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Instrument};

pub struct AppState {
    pub cicd: Cicd,
    pub prom_metrics: Arc<Metrics>,
    /// Cancelled on shutdown; every request runs under a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(cicd: Cicd, prom_metrics: Arc<Metrics>) -> Arc<Self> {
        Arc::new(Self {
            cicd,
            prom_metrics,
            shutdown: CancellationToken::new(),
        })
    }
}

/// Render a core error as `{"error": ...}`.
pub(super) fn error_response(e: &CicdError) -> Response {
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(serde_json::json!({"error": e.to_string()}))).into_response()
}

pub(super) fn status_or_ok(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::OK)
}

#[derive(Deserialize)]
pub(super) struct LimitQuery {
    limit: Option<i64>,
}

impl LimitQuery {
    pub(super) fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 500)
    }
}

/// Records request duration, generates (or propagates) a request ID, and
/// wraps the request in a tracing span.
async fn metrics_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let method = req.method().to_string();
    let raw_path = req.uri().path().to_string();
    let norm_path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| normalize_path(&raw_path));
    let start = std::time::Instant::now();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %raw_path,
    );
    let mut response = next.run(req).instrument(span).await;

    state
        .prom_metrics
        .observe_request(&method, &norm_path, start.elapsed().as_secs_f64());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Collapse numeric path segments so histogram labels stay bounded when no
/// route matched.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if !seg.is_empty() && seg.chars().all(|c| c.is_ascii_digit()) {
                ":id"
            } else {
                seg
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(routes_health::handler_healthz))
        .route("/readyz", get(routes_health::handler_readyz))
        .route("/metrics", get(routes_health::handler_metrics))
        .route(
            "/api/projects/{id}/secrets/sync",
            post(routes_projects::handler_secrets_sync),
        )
        .route(
            "/api/projects/{id}/repo/validate",
            post(routes_projects::handler_repo_validate),
        )
        .route(
            "/api/projects/{id}/workflows",
            get(routes_projects::handler_workflows_list),
        )
        .route(
            "/api/projects/{id}/workflows/rerun",
            post(routes_projects::handler_workflow_rerun),
        )
        .route(
            "/api/projects/{id}/workflows/{wid}/definition",
            get(routes_projects::handler_workflow_definition),
        )
        .route(
            "/api/projects/{id}/workflow-logs",
            get(routes_projects::handler_workflow_logs),
        )
        .route(
            "/api/projects/{id}/logs",
            get(routes_projects::handler_project_logs),
        )
        .route(
            "/api/projects/{id}/parameters/{name}/usages",
            get(routes_projects::handler_parameter_usages),
        )
        .route(
            "/api/projects/{id}/collaborators",
            get(routes_projects::handler_collaborators),
        )
        .route(
            "/api/agents/{id}/rerun",
            post(routes_agents::handler_agent_rerun),
        )
        .route(
            "/api/agents/{id}/logs",
            get(routes_agents::handler_agent_logs),
        )
        .route("/api/github/oauth", post(routes_github::handler_oauth))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(CatchPanicLayer::new())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(120),
        ))
        .with_state(state)
}

/// Serve the API until SIGINT/SIGTERM, with the startup reconcile and the
/// poller running alongside.
pub async fn run(port: u16, cicd: Cicd, prom_metrics: Arc<Metrics>, poller_config: PollerConfig) -> Result<()> {
    let state = AppState::new(cicd.clone(), prom_metrics);
    let app = build_router(state.clone());
    let shutdown = state.shutdown.clone();

    let reconcile_cicd = cicd.clone();
    let reconcile_cancel = shutdown.child_token();
    tokio::spawn(async move {
        match reconcile_cicd.reconcile_all(&reconcile_cancel).await {
            Ok(n) => info!(count = n, "startup workflow reconcile finished"),
            Err(e) => warn!(error = %e, "startup workflow reconcile failed"),
        }
    });

    let poller = poller::spawn_poller(cicd, poller_config, shutdown.child_token());

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "paramstore api running");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_token.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = poller.await {
        warn!(error = %e, "poller task ended abnormally");
    }
    info!("paramstore api shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
                info!("received SIGINT, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT, shutting down");
    }
}
