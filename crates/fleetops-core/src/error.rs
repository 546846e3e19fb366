//! Error types for fleet orchestration.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by a [`crate::gateway::RepoGateway`] implementation.
///
/// Lives in the core so every gateway (GitHub, in-memory fake) reports
/// failures with the same vocabulary.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The repository, branch, file or run does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The write precondition (content SHA) is stale or missing.
    #[error("concurrency conflict on {repo}:{path}: {detail}")]
    Conflict {
        repo: String,
        path: String,
        detail: String,
    },

    /// The branch to be created is already there.
    #[error("branch {branch} already exists in {repo}")]
    AlreadyExists { repo: String, branch: String },

    /// The hosting platform answered with an unexpected status.
    #[error("api error {status} on {endpoint}: {message}")]
    Api {
        status: u16,
        endpoint: String,
        message: String,
    },

    /// Transport-level failure (DNS, TLS, timeout).
    #[error("http error: {0}")]
    Http(String),

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl GatewayError {
    /// `true` for errors worth retrying at the transport level.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Api { status, .. } => *status == 429 || *status >= 500,
            GatewayError::Http(_) => true,
            _ => false,
        }
    }
}

/// Errors produced by the orchestration layer.
#[derive(Debug, Error)]
pub enum FleetError {
    /// The fleet configuration is missing required data or is inconsistent.
    #[error("invalid fleet config: {0}")]
    InvalidConfig(String),

    /// The fleet configuration file could not be read.
    #[error("failed to read fleet config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration template could not be loaded.
    #[error("failed to load template '{key}' from {path}: {source}")]
    Template {
        key: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A build manifest could not be parsed.
    #[error("malformed manifest: {0}")]
    Manifest(String),

    /// A required remote file is absent.
    #[error("file {path} not found in {repo}:{branch}")]
    FileMissing {
        repo: String,
        path: String,
        branch: String,
    },

    /// The platform has not indexed the run created by a dispatch yet.
    #[error("no run indexed for {repo}:{branch} after dispatch")]
    RunNotIndexed { repo: String, branch: String },

    /// A run did not reach a terminal status in time.
    #[error("run {run_id} in {repo} did not complete within {timeout_secs}s")]
    Timeout {
        repo: String,
        run_id: u64,
        timeout_secs: u64,
    },

    /// The run could not be retrieved.
    #[error("run {run_id} not found in {repo}")]
    RunNotFound { repo: String, run_id: u64 },

    /// A run tracker was asked to make a transition its state forbids.
    #[error("invalid run transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Bubbled-up gateway error.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, FleetError>;
