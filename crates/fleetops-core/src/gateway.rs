//! Remote repository gateway: the seam between the orchestration engine and
//! the hosting platform.
//!
//! Implement [`RepoGateway`] to plug in a real VCS+CI API (see the
//! `fleetops-github` crate) or the in-memory [`crate::fakes::MemoryGateway`].

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Result alias for gateway calls.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// A file read from a branch together with its concurrency token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub content: String,
    /// Blob SHA; must be supplied back to update this file.
    pub sha: String,
}

/// A create-or-update request. `sha: None` means "create"; the gateway must
/// reject it if the file already exists.
#[derive(Debug, Clone, Copy)]
pub struct FileWrite<'a> {
    pub repo: &'a str,
    pub path: &'a str,
    pub content: &'a str,
    pub branch: &'a str,
    pub message: &'a str,
    pub sha: Option<&'a str>,
}

/// Workflow run (or job, or step) status as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Requested,
    Queued,
    Pending,
    Waiting,
    InProgress,
    Completed,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// No further transition happens after a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Requested => "requested",
            RunStatus::Queued => "queued",
            RunStatus::Pending => "pending",
            RunStatus::Waiting => "waiting",
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a completed run, job or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
    Cancelled,
    Skipped,
    Neutral,
    TimedOut,
    ActionRequired,
    Stale,
    StartupFailure,
    #[serde(other)]
    Unknown,
}

impl RunConclusion {
    pub fn as_str(self) -> &'static str {
        match self {
            RunConclusion::Success => "success",
            RunConclusion::Failure => "failure",
            RunConclusion::Cancelled => "cancelled",
            RunConclusion::Skipped => "skipped",
            RunConclusion::Neutral => "neutral",
            RunConclusion::TimedOut => "timed_out",
            RunConclusion::ActionRequired => "action_required",
            RunConclusion::Stale => "stale",
            RunConclusion::StartupFailure => "startup_failure",
            RunConclusion::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RunConclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of the most recent run on a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHandle {
    pub id: u64,
    pub status: RunStatus,
    pub conclusion: Option<RunConclusion>,
    pub url: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl RunHandle {
    /// A run snapshot with no job detail yet.
    pub fn into_run(self, repository: &str) -> WorkflowRun {
        WorkflowRun {
            repository: repository.to_string(),
            run_id: self.id,
            status: self.status,
            conclusion: self.conclusion,
            url: self.url,
            jobs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub status: RunStatus,
    pub conclusion: Option<RunConclusion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub status: RunStatus,
    pub conclusion: Option<RunConclusion>,
    pub steps: Vec<Step>,
}

/// Full run snapshot including the job/step tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub repository: String,
    pub run_id: u64,
    pub status: RunStatus,
    pub conclusion: Option<RunConclusion>,
    pub url: String,
    pub jobs: Vec<Job>,
}

impl WorkflowRun {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn succeeded(&self) -> bool {
        self.is_terminal() && self.conclusion == Some(RunConclusion::Success)
    }
}

/// Hosting-platform operations consumed by the orchestration engine.
#[async_trait]
pub trait RepoGateway: Send + Sync {
    /// Read `path` at `branch`; `Ok(None)` when the file does not exist.
    async fn file_content(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> GatewayResult<Option<RemoteFile>>;

    /// Create or update a file guarded by its blob SHA.
    async fn update_file(&self, write: FileWrite<'_>) -> GatewayResult<()>;

    /// Create `new_branch` pointing at the head of `base_branch`.
    async fn create_branch(&self, repo: &str, new_branch: &str, base_branch: &str)
        -> GatewayResult<()>;

    /// Request a `workflow_dispatch` run of `workflow_file` on `branch`.
    async fn dispatch_workflow(
        &self,
        repo: &str,
        workflow_file: &str,
        branch: &str,
    ) -> GatewayResult<()>;

    /// Most recent run of `workflow_file` on `branch`, if any is indexed.
    async fn latest_run(
        &self,
        repo: &str,
        workflow_file: &str,
        branch: &str,
    ) -> GatewayResult<Option<RunHandle>>;

    /// Run snapshot with jobs and steps; `Ok(None)` when the run is unknown.
    async fn run_with_jobs(&self, repo: &str, run_id: u64) -> GatewayResult<Option<WorkflowRun>>;
}
