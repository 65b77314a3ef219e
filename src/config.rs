//! Runtime configuration shared by the CLI subcommands and the server.
//!
//! Values come from clap (flags or environment, `.env` loaded by `dotenvy`
//! in `main`); this module only holds the resolved settings and defaults.

use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_OAUTH_URL: &str = "https://github.com/login/oauth/access_token";

/// Settings for the GitHub provider client.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// REST base URL, without trailing slash.
    pub api_url: String,
    /// OAuth access-token endpoint.
    pub oauth_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Per-request timeout for every call except code search.
    pub timeout: Duration,
    pub search_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            oauth_url: DEFAULT_OAUTH_URL.to_string(),
            client_id: None,
            client_secret: None,
            timeout: Duration::from_secs(10),
            search_timeout: Duration::from_secs(30),
        }
    }
}

impl ProviderConfig {
    /// Point the client at another base URL (GitHub Enterprise, test mocks).
    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }
}

/// Settings for the background run-status poller.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Sleep between consecutive sweeps.
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_provider_contract() {
        let cfg = ProviderConfig::default();
        assert_eq!(cfg.api_url, "https://api.github.com");
        assert_eq!(cfg.timeout, Duration::from_secs(10));
        assert_eq!(cfg.search_timeout, Duration::from_secs(30));
        assert_eq!(PollerConfig::default().interval, Duration::from_secs(30));
    }

    #[test]
    fn api_url_trailing_slash_is_trimmed() {
        let cfg = ProviderConfig::default().with_api_url("http://127.0.0.1:9000/");
        assert_eq!(cfg.api_url, "http://127.0.0.1:9000");
    }
}
