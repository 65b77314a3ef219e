//! Wire types for the GitHub REST endpoints the bridge calls.
//!
//! Only the fields the core consumes are modelled; serde ignores the rest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `GET /repos/{o}/{r}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoInfo {
    pub id: i64,
    pub full_name: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub default_branch: Option<String>,
}

/// `GET /repos/{o}/{r}/actions/secrets/public-key`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyResponse {
    pub key_id: String,
    /// Base64-encoded 32-byte curve25519 key.
    pub key: String,
}

/// Successful outcome of `PUT /repos/{o}/{r}/actions/secrets/{name}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretUpsert {
    /// 201
    Created,
    /// 204
    Updated,
}

#[derive(Debug, Serialize)]
pub(crate) struct SecretPayload<'a> {
    pub encrypted_value: &'a str,
    pub key_id: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteWorkflow {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WorkflowList {
    #[serde(default)]
    pub workflows: Vec<RemoteWorkflow>,
}

/// A workflow run as listed by `actions/runs` (newest first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub workflow_id: i64,
    #[serde(default = "first_attempt")]
    pub run_attempt: i32,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn first_attempt() -> i32 {
    1
}

#[derive(Debug, Deserialize)]
pub(crate) struct WorkflowRunList {
    #[serde(default)]
    pub workflow_runs: Vec<WorkflowRun>,
}

/// `GET /repos/{o}/{r}/actions/runs/{id}/attempts/{n}` as returned on the wire.
#[derive(Debug, Deserialize)]
pub(crate) struct RawRunAttempt {
    #[serde(default = "first_attempt")]
    pub run_attempt: i32,
    #[serde(default)]
    pub run_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub duration: Option<i64>,
}

/// Timing of a single run attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunAttempt {
    pub run_attempt: i32,
    pub run_started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub conclusion: Option<String>,
    pub duration_ms: i64,
}

impl RunAttempt {
    /// An attempt is finished once it reports a positive duration and its
    /// last update is strictly after its start.
    pub fn is_complete(&self) -> bool {
        match (self.run_started_at, self.updated_at) {
            (Some(started), Some(updated)) => self.duration_ms > 0 && updated > started,
            _ => false,
        }
    }
}

impl From<RawRunAttempt> for RunAttempt {
    fn from(raw: RawRunAttempt) -> Self {
        // The attempt endpoint omits `duration` on some API versions; derive it
        // from the timestamps once the attempt is reported as completed.
        let duration_ms = match raw.duration {
            Some(d) => d,
            None if raw.status.as_deref() == Some("completed") => {
                match (raw.run_started_at, raw.updated_at) {
                    (Some(s), Some(u)) => (u - s).num_milliseconds().max(0),
                    _ => 0,
                }
            }
            None => 0,
        };
        RunAttempt {
            run_attempt: raw.run_attempt,
            run_started_at: raw.run_started_at,
            updated_at: raw.updated_at,
            status: raw.status,
            conclusion: raw.conclusion,
            duration_ms,
        }
    }
}

/// Raw outcome of `POST .../rerun`: 201 starting, 202 already running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RerunResponse {
    pub status: u16,
    pub body: String,
}

/// `GET /repos/{o}/{r}/contents/{path}`
#[derive(Debug, Deserialize)]
pub(crate) struct ContentResponse {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub encoding: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSearchItem {
    pub path: String,
    #[serde(default)]
    pub score: f64,
    pub sha: String,
    pub html_url: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CodeSearchResponse {
    #[serde(default)]
    pub items: Vec<CodeSearchItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collaborator {
    pub login: String,
    pub id: i64,
    #[serde(default)]
    pub role_name: Option<String>,
}

/// `GET /user`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubUser {
    pub login: String,
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OAuthTokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}
