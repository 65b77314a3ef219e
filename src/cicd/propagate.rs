//! Parameter Propagator: publish a project's applied parameters as encrypted
//! repository secrets.
//!
//! The repo public key is fetched once per run and reused for every
//! parameter. Upserts are issued serially in `(stage_id, environment_id,
//! name)` order; a failed upsert is recorded and the batch continues. Two
//! propagations of the same project never interleave.

use super::{elapsed_ms, Cicd, CicdError, RepoAccess};
use crate::db::{NewProjectLog, ProjectRow};
use crate::github::{truncate_for_error, SecretUpsert};
use crate::sealed::RepoPublicKey;
use serde::Serialize;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const ACTION: &str = "Propagate Parameters";

/// Provider messages attached to failed secrets are cut to this many bytes.
pub const FAILURE_MESSAGE_LIMIT: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretStatus {
    Created,
    Updated,
    Failed,
}

impl SecretStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SecretStatus::Created => "created",
            SecretStatus::Updated => "updated",
            SecretStatus::Failed => "failed",
        }
    }
}

impl From<SecretUpsert> for SecretStatus {
    fn from(u: SecretUpsert) -> Self {
        match u {
            SecretUpsert::Created => SecretStatus::Created,
            SecretUpsert::Updated => SecretStatus::Updated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretResult {
    pub name: String,
    pub status: SecretStatus,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    AllSuccess,
    Partial,
    TotalFailure,
}

impl OverallStatus {
    /// An empty batch counts as success.
    pub fn from_results(results: &[SecretResult]) -> Self {
        let failed = results
            .iter()
            .filter(|r| r.status == SecretStatus::Failed)
            .count();
        match failed {
            0 => OverallStatus::AllSuccess,
            n if n == results.len() => OverallStatus::TotalFailure,
            _ => OverallStatus::Partial,
        }
    }

    pub fn http_status(self) -> u16 {
        match self {
            OverallStatus::AllSuccess => 200,
            OverallStatus::Partial => 207,
            OverallStatus::TotalFailure => 502,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PropagationReport {
    pub project_id: i64,
    pub overall: OverallStatus,
    pub results: Vec<SecretResult>,
    pub latency_ms: i64,
}

impl PropagationReport {
    pub fn count(&self, status: SecretStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn summary(&self) -> String {
        format!(
            "created {}, updated {}, failed {}",
            self.count(SecretStatus::Created),
            self.count(SecretStatus::Updated),
            self.count(SecretStatus::Failed)
        )
    }
}

impl Cicd {
    /// Propagate every applied parameter of `project_id` to the repository.
    ///
    /// Writes exactly one `Propagate Parameters` project log once the project
    /// is resolved, whatever the outcome.
    pub async fn propagate_parameters(
        &self,
        project_id: i64,
        user_id: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<PropagationReport, CicdError> {
        let project = self.load_project(project_id).await?;

        let started = Instant::now();
        let guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            guard = self.locks.lock(project_id) => Some(guard),
        };
        let outcome = match guard {
            Some(_) => self.propagate_locked(&project, cancel).await,
            None => Err(CicdError::Canceled),
        };
        let latency_ms = elapsed_ms(started);
        let outcome = outcome.map(|results| PropagationReport {
            project_id,
            overall: OverallStatus::from_results(&results),
            results,
            latency_ms,
        });

        let (status, message) = match &outcome {
            Ok(report) => (report.overall.http_status(), report.summary()),
            Err(e) => (e.http_status(), e.to_string()),
        };
        self.store
            .insert_project_log(&NewProjectLog {
                project_id,
                user_id,
                action: ACTION.to_string(),
                response_status: i32::from(status),
                latency_ms,
                message: message.clone(),
            })
            .await?;

        match &outcome {
            Ok(_) => info!(project_id, status, latency_ms, %message, "parameters propagated"),
            Err(e) => warn!(project_id, status, error = %e, "parameter propagation failed"),
        }
        outcome
    }

    async fn propagate_locked(
        &self,
        project: &ProjectRow,
        cancel: &CancellationToken,
    ) -> Result<Vec<SecretResult>, CicdError> {
        let access = RepoAccess::for_project(project)?;
        let (repo, token) = (&access.repo, access.token.as_str());

        self.call(cancel, self.provider.get_repo(repo, token)).await?;
        let key = self
            .call(cancel, self.provider.get_repo_public_key(repo, token))
            .await?;
        let key = RepoPublicKey::from_base64(&key.key_id, &key.key)?;

        let params = self.store.get_applied_parameters(project.id).await?;
        let mut results = Vec::with_capacity(params.len());
        for param in &params {
            let upsert = match key.seal(param.value.as_bytes()) {
                Ok(sealed) => {
                    self.call(
                        cancel,
                        self.provider
                            .upsert_secret(repo, &param.name, &sealed, &key.key_id, token),
                    )
                    .await
                }
                Err(e) => Err(CicdError::from(e)),
            };
            let result = match upsert {
                Ok(u) => SecretResult {
                    name: param.name.clone(),
                    status: u.into(),
                    message: String::new(),
                },
                Err(CicdError::Canceled) => return Err(CicdError::Canceled),
                Err(e) => {
                    warn!(project_id = project.id, secret = %param.name, error = %e, "secret upsert failed");
                    SecretResult {
                        name: param.name.clone(),
                        status: SecretStatus::Failed,
                        message: truncate_for_error(&e.to_string(), FAILURE_MESSAGE_LIMIT),
                    }
                }
            };
            self.metrics.secret_synced(result.status.as_str());
            results.push(result);
        }
        Ok(results)
    }
}
