//! GitHub REST payloads and their conversion into gateway types.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use fleetops_core::{
    GatewayError, GatewayResult, Job, RemoteFile, RunConclusion, RunHandle, RunStatus, Step,
    WorkflowRun,
};
use serde::{Deserialize, Serialize};

/// `GET /repos/{repo}/contents/{path}`
#[derive(Debug, Deserialize)]
pub struct ContentResponse {
    pub sha: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub encoding: String,
}

impl ContentResponse {
    pub fn into_remote_file(self) -> GatewayResult<RemoteFile> {
        if self.encoding != "base64" {
            return Err(GatewayError::Decode(format!(
                "unsupported content encoding '{}'",
                self.encoding
            )));
        }
        // GitHub wraps the base64 payload at 60 columns.
        let packed: String = self.content.split_whitespace().collect();
        let bytes = STANDARD
            .decode(packed)
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        let content = String::from_utf8(bytes).map_err(|e| GatewayError::Decode(e.to_string()))?;
        Ok(RemoteFile {
            content,
            sha: self.sha,
        })
    }
}

/// `PUT /repos/{repo}/contents/{path}`
#[derive(Debug, Serialize)]
pub struct UpdateContentRequest<'a> {
    pub message: &'a str,
    pub content: String,
    pub branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<&'a str>,
}

impl<'a> UpdateContentRequest<'a> {
    pub fn new(message: &'a str, content: &str, branch: &'a str, sha: Option<&'a str>) -> Self {
        Self {
            message,
            content: STANDARD.encode(content.as_bytes()),
            branch,
            sha,
        }
    }
}

/// `GET /repos/{repo}/git/ref/heads/{branch}`
#[derive(Debug, Deserialize)]
pub struct RefResponse {
    pub object: RefObject,
}

#[derive(Debug, Deserialize)]
pub struct RefObject {
    pub sha: String,
}

/// `POST /repos/{repo}/git/refs`
#[derive(Debug, Serialize)]
pub struct CreateRefRequest {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
}

/// `POST /repos/{repo}/actions/workflows/{file}/dispatches`
#[derive(Debug, Serialize)]
pub struct DispatchRequest<'a> {
    #[serde(rename = "ref")]
    pub git_ref: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct RunList {
    #[serde(default)]
    pub workflow_runs: Vec<RunPayload>,
}

#[derive(Debug, Deserialize)]
pub struct RunPayload {
    pub id: u64,
    pub status: Option<RunStatus>,
    pub conclusion: Option<RunConclusion>,
    #[serde(default)]
    pub html_url: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl RunPayload {
    pub fn into_handle(self) -> RunHandle {
        RunHandle {
            id: self.id,
            status: self.status.unwrap_or(RunStatus::Unknown),
            conclusion: self.conclusion,
            url: self.html_url,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JobList {
    #[serde(default)]
    pub jobs: Vec<JobPayload>,
}

#[derive(Debug, Deserialize)]
pub struct JobPayload {
    pub name: String,
    pub status: Option<RunStatus>,
    pub conclusion: Option<RunConclusion>,
    #[serde(default)]
    pub steps: Vec<StepPayload>,
}

#[derive(Debug, Deserialize)]
pub struct StepPayload {
    pub name: String,
    pub status: Option<RunStatus>,
    pub conclusion: Option<RunConclusion>,
}

/// Combine a run and its jobs into a full snapshot.
pub fn assemble_run(repository: &str, run: RunPayload, jobs: JobList) -> WorkflowRun {
    let mut snapshot = run.into_handle().into_run(repository);
    snapshot.jobs = jobs
        .jobs
        .into_iter()
        .map(|job| Job {
            name: job.name,
            status: job.status.unwrap_or(RunStatus::Unknown),
            conclusion: job.conclusion,
            steps: job
                .steps
                .into_iter()
                .map(|step| Step {
                    name: step.name,
                    status: step.status.unwrap_or(RunStatus::Unknown),
                    conclusion: step.conclusion,
                })
                .collect(),
        })
        .collect();
    snapshot
}

#[derive(Debug, Deserialize)]
pub struct UserResponse {
    pub login: String,
}
