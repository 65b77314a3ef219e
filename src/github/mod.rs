//! # GitHub — Provider Client for Actions and Repository APIs
//!
//! Typed, side-effect-free wrapper over the GitHub REST endpoints the CICD
//! bridge needs. Each call issues exactly one authenticated request (except
//! collaborator listing, which pages) and never retries.
//!
//! ## Failure taxonomy
//!
//! | Response | Error |
//! |----------|-------|
//! | 401, 403 | [`ProviderError::Unauthorized`] |
//! | 403 with exhausted rate limit, 429 | [`ProviderError::RateLimited`] |
//! | 404 | [`ProviderError::NotFound`] |
//! | 409, 422 | [`ProviderError::Conflict`] |
//! | other 4xx | [`ProviderError::Rejected`] |
//! | 5xx, DNS, TLS, connect, timeout | [`ProviderError::Transport`] |
//!
//! Every request carries `Accept: application/vnd.github+json`,
//! `Authorization: Bearer <token>` and `X-GitHub-Api-Version: 2022-11-28`.
//! The per-project token is attached per request so one pooled
//! [`reqwest::Client`] serves all tenants.

mod oauth;
pub mod types;

pub use types::*;

use crate::config::ProviderConfig;
use crate::repo_url::RepoRef;
use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

pub const API_VERSION: &str = "2022-11-28";
const MEDIA_TYPE: &str = "application/vnd.github+json";
const MAX_PER_PAGE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("provider rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("transport failure: {message}")]
    Transport { status: Option<u16>, message: String },
    #[error("unexpected provider response: {0}")]
    Decode(String),
    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Unauthorized(_) => "unauthorized",
            ProviderError::NotFound(_) => "not_found",
            ProviderError::Conflict(_) => "conflict",
            ProviderError::RateLimited(_) => "rate_limited",
            ProviderError::Rejected { .. } => "rejected",
            ProviderError::Transport { .. } => "transport",
            ProviderError::Decode(_) => "decode",
            ProviderError::NotConfigured(_) => "not_configured",
        }
    }

    /// HTTP status the provider answered with, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Unauthorized(_) => Some(401),
            ProviderError::NotFound(_) => Some(404),
            ProviderError::Conflict(_) => Some(409),
            ProviderError::RateLimited(_) => Some(429),
            ProviderError::Rejected { status, .. } => Some(*status),
            ProviderError::Transport { status, .. } => *status,
            ProviderError::Decode(_) | ProviderError::NotConfigured(_) => None,
        }
    }
}

/// Classify a non-success response into the provider taxonomy.
pub fn classify_status(status: u16, rate_limit_exhausted: bool, body: &str) -> ProviderError {
    let body = truncate_for_error(body, 512);
    match status {
        401 => ProviderError::Unauthorized(body),
        403 if rate_limit_exhausted => ProviderError::RateLimited(body),
        403 => ProviderError::Unauthorized(body),
        404 => ProviderError::NotFound(body),
        409 | 422 => ProviderError::Conflict(body),
        429 => ProviderError::RateLimited(body),
        s if s >= 500 => ProviderError::Transport {
            status: Some(s),
            message: format!("provider returned {}: {}", s, body),
        },
        s => ProviderError::Rejected { status: s, body },
    }
}

/// Truncate `text` to at most `max` bytes on a char boundary.
pub fn truncate_for_error(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// The provider operations the CICD core consumes.
///
/// [`GithubClient`] is the production implementation; tests substitute a
/// scripted one.
#[async_trait]
pub trait CicdProvider: Send + Sync {
    async fn get_repo(&self, repo: &RepoRef, token: &str) -> Result<RepoInfo, ProviderError>;

    async fn get_repo_public_key(
        &self,
        repo: &RepoRef,
        token: &str,
    ) -> Result<PublicKeyResponse, ProviderError>;

    async fn upsert_secret(
        &self,
        repo: &RepoRef,
        secret_name: &str,
        encrypted_value_b64: &str,
        key_id: &str,
        token: &str,
    ) -> Result<SecretUpsert, ProviderError>;

    async fn list_workflows(
        &self,
        repo: &RepoRef,
        token: &str,
    ) -> Result<Vec<RemoteWorkflow>, ProviderError>;

    /// Most recent first.
    async fn list_workflow_runs(
        &self,
        repo: &RepoRef,
        token: &str,
    ) -> Result<Vec<WorkflowRun>, ProviderError>;

    async fn get_workflow_run(
        &self,
        repo: &RepoRef,
        run_id: i64,
        token: &str,
    ) -> Result<WorkflowRun, ProviderError>;

    async fn get_run_attempt(
        &self,
        repo: &RepoRef,
        run_id: i64,
        attempt: i32,
        token: &str,
    ) -> Result<RunAttempt, ProviderError>;

    async fn rerun_workflow(
        &self,
        repo: &RepoRef,
        run_id: i64,
        token: &str,
    ) -> Result<RerunResponse, ProviderError>;

    /// Decoded file bytes.
    async fn get_file_content(
        &self,
        repo: &RepoRef,
        path: &str,
        token: &str,
    ) -> Result<Vec<u8>, ProviderError>;

    async fn search_code(
        &self,
        repo: &RepoRef,
        query: &str,
        token: &str,
    ) -> Result<Vec<CodeSearchItem>, ProviderError>;

    /// Pages from `page` until a short page and returns the concatenation.
    async fn list_collaborators(
        &self,
        repo: &RepoRef,
        token: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<Collaborator>, ProviderError>;

    /// Exchange an OAuth authorization code for an access token.
    async fn exchange_oauth_code(&self, code: &str) -> Result<String, ProviderError>;

    async fn get_authenticated_user(&self, token: &str) -> Result<GithubUser, ProviderError>;
}

/// Production provider client backed by one pooled `reqwest::Client`.
#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_url: String,
    oauth_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    timeout: Duration,
    search_timeout: Duration,
}

impl GithubClient {
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("paramstore/", env!("CARGO_PKG_VERSION"))),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("failed to build github http client")?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            oauth_url: config.oauth_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            timeout: config.timeout,
            search_timeout: config.search_timeout,
        })
    }

    fn repo_path(repo: &RepoRef) -> String {
        format!(
            "/repos/{}/{}",
            urlencoding::encode(&repo.owner),
            urlencoding::encode(&repo.name)
        )
    }

    fn request(&self, method: Method, path: &str, token: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_url, path))
            .bearer_auth(token)
            .header(ACCEPT, MEDIA_TYPE)
            .header("X-GitHub-Api-Version", API_VERSION)
            .timeout(self.timeout)
    }

    /// Send a request and return the response if its status is a success.
    async fn send(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = request.send().await.map_err(|e| transport_error(operation, &e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let exhausted = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim() == "0");
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), exhausted, &body))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T, ProviderError> {
        let response = self.send(operation, request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Decode(format!("{}: {}", operation, e)))
    }
}

fn transport_error(operation: &str, e: &reqwest::Error) -> ProviderError {
    let message = if e.is_timeout() {
        format!("{}: request timed out", operation)
    } else if e.is_connect() {
        format!("{}: connection failed: {}", operation, e)
    } else {
        format!("{}: {}", operation, e)
    };
    ProviderError::Transport {
        status: e.status().map(|s| s.as_u16()),
        message,
    }
}

/// Encode each segment of a repository file path, keeping the separators.
fn encode_content_path(path: &str) -> String {
    path.trim_start_matches('/')
        .split('/')
        .map(|seg| urlencoding::encode(seg).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl CicdProvider for GithubClient {
    async fn get_repo(&self, repo: &RepoRef, token: &str) -> Result<RepoInfo, ProviderError> {
        let req = self.request(Method::GET, &Self::repo_path(repo), token);
        self.get_json("get repo", req).await
    }

    async fn get_repo_public_key(
        &self,
        repo: &RepoRef,
        token: &str,
    ) -> Result<PublicKeyResponse, ProviderError> {
        let path = format!("{}/actions/secrets/public-key", Self::repo_path(repo));
        let req = self.request(Method::GET, &path, token);
        self.get_json("get repo public key", req).await
    }

    async fn upsert_secret(
        &self,
        repo: &RepoRef,
        secret_name: &str,
        encrypted_value_b64: &str,
        key_id: &str,
        token: &str,
    ) -> Result<SecretUpsert, ProviderError> {
        let path = format!(
            "{}/actions/secrets/{}",
            Self::repo_path(repo),
            urlencoding::encode(secret_name)
        );
        let req = self.request(Method::PUT, &path, token).json(&SecretPayload {
            encrypted_value: encrypted_value_b64,
            key_id,
        });
        let response = self.send("upsert secret", req).await?;
        match response.status() {
            StatusCode::CREATED => Ok(SecretUpsert::Created),
            StatusCode::NO_CONTENT => Ok(SecretUpsert::Updated),
            other => Err(ProviderError::Rejected {
                status: other.as_u16(),
                body: truncate_for_error(&response.text().await.unwrap_or_default(), 512),
            }),
        }
    }

    async fn list_workflows(
        &self,
        repo: &RepoRef,
        token: &str,
    ) -> Result<Vec<RemoteWorkflow>, ProviderError> {
        let path = format!("{}/actions/workflows", Self::repo_path(repo));
        let req = self.request(Method::GET, &path, token);
        let list: WorkflowList = self.get_json("list workflows", req).await?;
        Ok(list.workflows)
    }

    async fn list_workflow_runs(
        &self,
        repo: &RepoRef,
        token: &str,
    ) -> Result<Vec<WorkflowRun>, ProviderError> {
        let path = format!("{}/actions/runs", Self::repo_path(repo));
        let req = self.request(Method::GET, &path, token);
        let list: WorkflowRunList = self.get_json("list workflow runs", req).await?;
        Ok(list.workflow_runs)
    }

    async fn get_workflow_run(
        &self,
        repo: &RepoRef,
        run_id: i64,
        token: &str,
    ) -> Result<WorkflowRun, ProviderError> {
        let path = format!("{}/actions/runs/{}", Self::repo_path(repo), run_id);
        let req = self.request(Method::GET, &path, token);
        self.get_json("get workflow run", req).await
    }

    async fn get_run_attempt(
        &self,
        repo: &RepoRef,
        run_id: i64,
        attempt: i32,
        token: &str,
    ) -> Result<RunAttempt, ProviderError> {
        let path = format!(
            "{}/actions/runs/{}/attempts/{}",
            Self::repo_path(repo),
            run_id,
            attempt
        );
        let req = self.request(Method::GET, &path, token);
        let raw: RawRunAttempt = self.get_json("get run attempt", req).await?;
        Ok(raw.into())
    }

    async fn rerun_workflow(
        &self,
        repo: &RepoRef,
        run_id: i64,
        token: &str,
    ) -> Result<RerunResponse, ProviderError> {
        let path = format!("{}/actions/runs/{}/rerun", Self::repo_path(repo), run_id);
        let req = self.request(Method::POST, &path, token);
        let response = self.send("rerun workflow", req).await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(RerunResponse { status, body })
    }

    async fn get_file_content(
        &self,
        repo: &RepoRef,
        path: &str,
        token: &str,
    ) -> Result<Vec<u8>, ProviderError> {
        let url_path = format!(
            "{}/contents/{}",
            Self::repo_path(repo),
            encode_content_path(path)
        );
        let req = self.request(Method::GET, &url_path, token);
        let content: ContentResponse = self.get_json("get file content", req).await?;
        if content.encoding != "base64" {
            return Err(ProviderError::Decode(format!(
                "get file content: unsupported encoding `{}`",
                content.encoding
            )));
        }
        // GitHub wraps the payload at 60 columns.
        let compact: String = content
            .content
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| ProviderError::Decode(format!("get file content: {}", e)))
    }

    async fn search_code(
        &self,
        repo: &RepoRef,
        query: &str,
        token: &str,
    ) -> Result<Vec<CodeSearchItem>, ProviderError> {
        let q = format!("{} in:file repo:{}/{}", query, repo.owner, repo.name);
        let req = self
            .request(Method::GET, "/search/code", token)
            .query(&[("q", q)])
            .timeout(self.search_timeout);
        let found: CodeSearchResponse = self.get_json("search code", req).await?;
        Ok(found.items)
    }

    async fn list_collaborators(
        &self,
        repo: &RepoRef,
        token: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<Collaborator>, ProviderError> {
        let per_page = per_page.clamp(1, MAX_PER_PAGE);
        let path = format!("{}/collaborators", Self::repo_path(repo));
        let mut page = page.max(1);
        let mut all = Vec::new();
        loop {
            let req = self
                .request(Method::GET, &path, token)
                .query(&[("page", page), ("per_page", per_page)]);
            let batch: Vec<Collaborator> = self.get_json("list collaborators", req).await?;
            let short = (batch.len() as u32) < per_page;
            all.extend(batch);
            if short {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    async fn exchange_oauth_code(&self, code: &str) -> Result<String, ProviderError> {
        oauth::exchange_code(self, code).await
    }

    async fn get_authenticated_user(&self, token: &str) -> Result<GithubUser, ProviderError> {
        let req = self.request(Method::GET, "/user", token);
        self.get_json("get authenticated user", req).await
    }
}
