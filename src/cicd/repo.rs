//! Read-only repository queries on behalf of a project: access check,
//! workflow definitions, secret usages, collaborators, and the OAuth login
//! exchange. None of these write audit rows.

use super::{Cicd, CicdError, RepoAccess};
use crate::github::{CodeSearchItem, Collaborator, GithubUser, RepoInfo};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_PER_PAGE: u32 = 30;

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowDefinition {
    pub provider_workflow_id: i64,
    pub name: String,
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OAuthLogin {
    pub access_token: String,
    pub user: GithubUser,
}

/// Search expression matching workflow references to a secret.
pub fn secret_usage_query(parameter_name: &str) -> String {
    format!("secrets.{}", parameter_name)
}

impl Cicd {
    async fn access_for(&self, project_id: i64) -> Result<RepoAccess, CicdError> {
        let project = self.load_project(project_id).await?;
        RepoAccess::for_project(&project)
    }

    /// Check that the project's coordinate and token reach the repository.
    pub async fn validate_repo(
        &self,
        project_id: i64,
        cancel: &CancellationToken,
    ) -> Result<RepoInfo, CicdError> {
        let access = self.access_for(project_id).await?;
        self.call(cancel, self.provider.get_repo(&access.repo, &access.token))
            .await
    }

    /// Fetch the YAML of a catalogued workflow.
    pub async fn workflow_definition(
        &self,
        project_id: i64,
        provider_workflow_id: i64,
        cancel: &CancellationToken,
    ) -> Result<WorkflowDefinition, CicdError> {
        let access = self.access_for(project_id).await?;
        let workflow = self
            .store
            .get_workflow(project_id, provider_workflow_id)
            .await?
            .ok_or_else(|| {
                CicdError::NotFound(format!("workflow {} not found", provider_workflow_id))
            })?;
        if workflow.path.is_empty() {
            return Err(CicdError::NotFound(format!(
                "workflow {} has no known path",
                provider_workflow_id
            )));
        }
        let bytes = self
            .call(
                cancel,
                self.provider
                    .get_file_content(&access.repo, &workflow.path, &access.token),
            )
            .await?;
        Ok(WorkflowDefinition {
            provider_workflow_id,
            name: workflow.name,
            path: workflow.path,
            content: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }

    /// Files in the repository that reference `secrets.<parameter_name>`.
    pub async fn parameter_usages(
        &self,
        project_id: i64,
        parameter_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CodeSearchItem>, CicdError> {
        if parameter_name.trim().is_empty() {
            return Err(CicdError::InvalidInput("parameter name is empty".to_string()));
        }
        let access = self.access_for(project_id).await?;
        let query = secret_usage_query(parameter_name.trim());
        self.call(
            cancel,
            self.provider
                .search_code(&access.repo, &query, &access.token),
        )
        .await
    }

    pub async fn collaborators(
        &self,
        project_id: i64,
        page: u32,
        per_page: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<Collaborator>, CicdError> {
        let access = self.access_for(project_id).await?;
        self.call(
            cancel,
            self.provider
                .list_collaborators(&access.repo, &access.token, page.max(1), per_page),
        )
        .await
    }

    /// Exchange an OAuth code and resolve the user it belongs to.
    pub async fn oauth_login(
        &self,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<OAuthLogin, CicdError> {
        if code.trim().is_empty() {
            return Err(CicdError::InvalidInput("oauth code is empty".to_string()));
        }
        let access_token = self
            .call(cancel, self.provider.exchange_oauth_code(code.trim()))
            .await?;
        let user = self
            .call(cancel, self.provider.get_authenticated_user(&access_token))
            .await?;
        Ok(OAuthLogin { access_token, user })
    }
}
