//! OAuth web-flow code exchange.
//!
//! GitHub answers the token endpoint with HTTP 200 even for rejected codes and
//! reports the failure in an `error` field, so the body is inspected rather
//! than the status alone.

use super::{transport_error, GithubClient, OAuthTokenResponse, ProviderError};
use reqwest::header::ACCEPT;

pub(super) async fn exchange_code(client: &GithubClient, code: &str) -> Result<String, ProviderError> {
    let (client_id, client_secret) = match (&client.client_id, &client.client_secret) {
        (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => (id, secret),
        _ => {
            return Err(ProviderError::NotConfigured(
                "GITHUB_CLIENT_ID and GITHUB_CLIENT_SECRET must be set".to_string(),
            ))
        }
    };

    let params = [
        ("client_id", client_id.as_str()),
        ("client_secret", client_secret.as_str()),
        ("code", code),
    ];
    let response = client
        .http
        .post(&client.oauth_url)
        .header(ACCEPT, "application/json")
        .form(&params)
        .timeout(client.timeout)
        .send()
        .await
        .map_err(|e| transport_error("oauth code exchange", &e))?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(super::classify_status(status.as_u16(), false, &body));
    }

    let token: OAuthTokenResponse = serde_json::from_str(&body)
        .map_err(|e| ProviderError::Decode(format!("oauth code exchange: {}", e)))?;
    if let Some(error) = token.error {
        let desc = token.error_description.unwrap_or_default();
        return Err(ProviderError::Unauthorized(format!("{}: {}", error, desc)));
    }
    token
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ProviderError::Decode("oauth code exchange: no access_token in response".to_string()))
}
