//! # CICD — Workflow Integration Core
//!
//! Mediates between stored parameters and the remote CI provider. Every
//! externally-observable action follows the same path: resolve project,
//! derive repo coordinate, call the provider, classify the response, persist
//! an audit row. The audit row is committed before the caller sees a result.
//!
//! ## Components
//!
//! - [`propagate`] — parameter → encrypted repository secret
//! - [`rerun`] — rerun dispatch by agent or by workflow name
//! - [`reconcile`] — remote workflow catalog → local `workflows`
//! - [`poller`] — background run-status sweeps over open workflow logs
//! - [`repo`] — read-only repository queries and OAuth login
//!
//! All components hang off [`Cicd`], a cheap-to-clone context holding the
//! store, the provider client, the per-project lock table and the metrics
//! registry. Each operation takes a [`CancellationToken`]; provider calls are
//! raced against it and surface [`CicdError::Canceled`]. Store writes that
//! already committed are not rolled back.

pub mod locks;
pub mod poller;
pub mod propagate;
pub mod reconcile;
pub mod repo;
pub mod rerun;

use crate::db::{CicdStore, ProjectRow};
use crate::github::{CicdProvider, ProviderError};
use crate::prom_metrics::Metrics;
use crate::repo_url::{RepoRef, RepoUrlError};
use crate::sealed::EnvelopeError;
use locks::ProjectLocks;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Core-wide error taxonomy. The message is what callers and audit rows see.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CicdError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    PreconditionFailed(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    RateLimited(String),
    #[error("{message}")]
    Transport { status: Option<u16>, message: String },
    #[error("{0}")]
    CryptoFailure(String),
    #[error("{0}")]
    InvalidKey(String),
    #[error("operation canceled")]
    Canceled,
    #[error("{0}")]
    Internal(String),
}

impl CicdError {
    /// HTTP status surfaced in audit rows and API responses.
    pub fn http_status(&self) -> u16 {
        match self {
            CicdError::InvalidInput(_) => 400,
            CicdError::PreconditionFailed(_) => 412,
            CicdError::Unauthorized(_) => 401,
            CicdError::NotFound(_) => 404,
            CicdError::Conflict(_) => 409,
            CicdError::RateLimited(_) => 429,
            CicdError::Transport {
                status: Some(s), ..
            } if *s >= 500 => *s,
            // No upstream status (DNS, TLS, timeout, undecodable body).
            CicdError::Transport { .. } => 502,
            CicdError::InvalidKey(_) => 502,
            CicdError::CryptoFailure(_) => 500,
            CicdError::Canceled => 499,
            CicdError::Internal(_) => 500,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CicdError::InvalidInput(_) => "invalid_input",
            CicdError::PreconditionFailed(_) => "precondition_failed",
            CicdError::Unauthorized(_) => "unauthorized",
            CicdError::NotFound(_) => "not_found",
            CicdError::Conflict(_) => "conflict",
            CicdError::RateLimited(_) => "rate_limited",
            CicdError::Transport { .. } => "transport",
            CicdError::CryptoFailure(_) => "crypto_failure",
            CicdError::InvalidKey(_) => "invalid_key",
            CicdError::Canceled => "canceled",
            CicdError::Internal(_) => "internal",
        }
    }

    /// Same variant, different user-visible message. `Canceled` is unchanged.
    pub fn with_message(self, message: impl Into<String>) -> Self {
        let message = message.into();
        match self {
            CicdError::InvalidInput(_) => CicdError::InvalidInput(message),
            CicdError::PreconditionFailed(_) => CicdError::PreconditionFailed(message),
            CicdError::Unauthorized(_) => CicdError::Unauthorized(message),
            CicdError::NotFound(_) => CicdError::NotFound(message),
            CicdError::Conflict(_) => CicdError::Conflict(message),
            CicdError::RateLimited(_) => CicdError::RateLimited(message),
            CicdError::Transport { status, .. } => CicdError::Transport { status, message },
            CicdError::CryptoFailure(_) => CicdError::CryptoFailure(message),
            CicdError::InvalidKey(_) => CicdError::InvalidKey(message),
            CicdError::Canceled => CicdError::Canceled,
            CicdError::Internal(_) => CicdError::Internal(message),
        }
    }
}

impl From<ProviderError> for CicdError {
    fn from(e: ProviderError) -> Self {
        let message = e.to_string();
        match e {
            ProviderError::Unauthorized(_) => CicdError::Unauthorized(message),
            ProviderError::NotFound(_) => CicdError::NotFound(message),
            ProviderError::Conflict(_) => CicdError::Conflict(message),
            ProviderError::RateLimited(_) => CicdError::RateLimited(message),
            ProviderError::Rejected { .. } => CicdError::InvalidInput(message),
            ProviderError::Transport { status, .. } => CicdError::Transport { status, message },
            ProviderError::Decode(_) => CicdError::Transport {
                status: None,
                message,
            },
            ProviderError::NotConfigured(_) => CicdError::PreconditionFailed(message),
        }
    }
}

impl From<EnvelopeError> for CicdError {
    fn from(e: EnvelopeError) -> Self {
        match e {
            EnvelopeError::InvalidKey(_) => CicdError::InvalidKey(e.to_string()),
            EnvelopeError::CryptoFailure(_) => CicdError::CryptoFailure(e.to_string()),
        }
    }
}

impl From<RepoUrlError> for CicdError {
    fn from(e: RepoUrlError) -> Self {
        CicdError::InvalidInput(format!("invalid repository coordinate: {}", e))
    }
}

/// Store failures. The detail goes to the log, not to the caller.
impl From<anyhow::Error> for CicdError {
    fn from(e: anyhow::Error) -> Self {
        tracing::error!(error = %e, "store operation failed");
        CicdError::Internal("internal storage error".to_string())
    }
}

/// Shared context for every core operation.
#[derive(Clone)]
pub struct Cicd {
    store: Arc<dyn CicdStore>,
    provider: Arc<dyn CicdProvider>,
    locks: Arc<ProjectLocks>,
    metrics: Arc<Metrics>,
}

impl Cicd {
    pub fn new(
        store: Arc<dyn CicdStore>,
        provider: Arc<dyn CicdProvider>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            provider,
            locks: Arc::new(ProjectLocks::default()),
            metrics,
        }
    }

    pub fn store(&self) -> &dyn CicdStore {
        self.store.as_ref()
    }

    pub fn provider(&self) -> &dyn CicdProvider {
        self.provider.as_ref()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Run one provider call, aborting it if `cancel` fires first.
    pub async fn call<T, F>(&self, cancel: &CancellationToken, fut: F) -> Result<T, CicdError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CicdError::Canceled),
            result = fut => result.map_err(|e| {
                self.metrics.provider_error(e.kind());
                CicdError::from(e)
            }),
        }
    }

    pub async fn load_project(&self, project_id: i64) -> Result<ProjectRow, CicdError> {
        self.store
            .get_project(project_id)
            .await?
            .ok_or_else(|| CicdError::NotFound(format!("project {} not found", project_id)))
    }
}

/// Coordinate and bearer token of a project, validated for a provider call.
#[derive(Debug, Clone)]
pub struct RepoAccess {
    pub repo: RepoRef,
    pub token: String,
}

impl RepoAccess {
    /// `PreconditionFailed` if either field is unset, `InvalidInput` if the
    /// coordinate does not parse.
    pub fn for_project(project: &ProjectRow) -> Result<Self, CicdError> {
        let coordinate = project
            .repo_coordinate
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let token = project
            .repo_api_token
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let (Some(coordinate), Some(token)) = (coordinate, token) else {
            return Err(CicdError::PreconditionFailed(format!(
                "project {} has no repository coordinate or token",
                project.id
            )));
        };
        Ok(Self {
            repo: RepoRef::parse(coordinate)?,
            token: token.to_string(),
        })
    }
}

fn elapsed_ms(started: std::time::Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}
