//! GitHub connection settings.

use std::fmt;
use std::time::Duration;

use crate::error::GitHubConfigError;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const API_VERSION: &str = "2022-11-28";

#[derive(Clone)]
pub struct GitHubConfig {
    /// REST API root, without trailing slash.
    pub api_url: String,
    pub token: String,
    pub user_agent: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl GitHubConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: token.into(),
            user_agent: format!("fleetops/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Read `GITHUB_TOKEN` (required) and `GITHUB_API_URL` (optional).
    pub fn from_env() -> Result<Self, GitHubConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, GitHubConfigError> {
        let token = lookup("GITHUB_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or(GitHubConfigError::MissingToken)?;
        let mut config = Self::new(token.trim());
        if let Some(url) = lookup("GITHUB_API_URL").filter(|u| !u.trim().is_empty()) {
            config = config.with_api_url(&url);
        }
        Ok(config)
    }

    /// Point at another API root, e.g. a GitHub Enterprise server.
    pub fn with_api_url(mut self, url: &str) -> Self {
        self.api_url = url.trim().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("api_url", &self.api_url)
            .field("token", &"<redacted>")
            .field("user_agent", &self.user_agent)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
