//! GitHub implementation of the fleetops repository gateway.
//!
//! [`GitHubGateway`] speaks the GitHub REST API (contents, git refs and
//! Actions endpoints) with a bearer token, a per-request timeout and bounded
//! retry of transient failures.

pub mod client;
pub mod config;
pub mod error;
pub mod retry;
pub mod wire;

pub use client::GitHubGateway;
pub use config::{GitHubConfig, API_VERSION, DEFAULT_API_URL};
pub use error::GitHubConfigError;
pub use retry::RetryConfig;
