//! Error types for the GitHub gateway

use fleetops_core::GatewayError;
use thiserror::Error;

/// Errors raised while setting up the gateway.
#[derive(Error, Debug)]
pub enum GitHubConfigError {
    /// No token in the environment
    #[error("GITHUB_TOKEN is not set")]
    MissingToken,

    /// The HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl From<reqwest::Error> for GitHubConfigError {
    fn from(err: reqwest::Error) -> Self {
        GitHubConfigError::Client(err.to_string())
    }
}

/// Transport failure, including request timeouts.
pub(crate) fn transport_error(err: reqwest::Error) -> GatewayError {
    GatewayError::Http(err.to_string())
}

/// Map a non-success response status to a gateway error.
pub(crate) fn status_error(status: u16, endpoint: &str, body: &str) -> GatewayError {
    if status == 404 {
        return GatewayError::NotFound(endpoint.to_string());
    }
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    GatewayError::Api {
        status,
        endpoint: endpoint.to_string(),
        message,
    }
}
