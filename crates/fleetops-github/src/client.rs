//! reqwest client implementing [`RepoGateway`] against the GitHub REST API.

use async_trait::async_trait;
use fleetops_core::{
    FileWrite, GatewayError, GatewayResult, RemoteFile, RepoGateway, RunHandle, WorkflowRun,
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{GitHubConfig, API_VERSION};
use crate::error::{status_error, transport_error, GitHubConfigError};
use crate::retry::{with_retry_if, RetryConfig};
use crate::wire::{
    assemble_run, ContentResponse, CreateRefRequest, DispatchRequest, JobList, RefResponse,
    RunList, RunPayload, UpdateContentRequest, UserResponse,
};

pub struct GitHubGateway {
    config: GitHubConfig,
    http: reqwest::Client,
    retry: RetryConfig,
}

impl GitHubGateway {
    pub fn new(config: GitHubConfig) -> Result<Self, GitHubConfigError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|e| GitHubConfigError::Client(e.to_string()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            config,
            http,
            retry: RetryConfig::default(),
        })
    }

    /// Gateway configured from `GITHUB_TOKEN` / `GITHUB_API_URL`.
    pub fn from_env() -> Result<Self, GitHubConfigError> {
        Self::new(GitHubConfig::from_env()?)
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &GitHubConfig {
        &self.config
    }

    /// Login of the token's owner.
    pub async fn authenticated_user(&self) -> GatewayResult<String> {
        let user: UserResponse = self.get_json("/user", &[]).await?;
        Ok(user.login)
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.api_url, endpoint)
    }

    /// Send a request and return the successful response. Failures are
    /// retried per [`retry_policy`].
    async fn send<F>(&self, method: Method, endpoint: &str, build: F) -> GatewayResult<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let label = format!("{method} {endpoint}");
        with_retry_if(self.retry, &label, retry_policy(&method), || async {
            debug!(request = %label, "github request");
            let request = build(self.http.request(method.clone(), self.url(endpoint)));
            let response = request.send().await.map_err(transport_error)?;
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            let body = response.text().await.unwrap_or_default();
            Err(status_error(status.as_u16(), endpoint, &body))
        })
        .await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> GatewayResult<T> {
        let response = self.send(Method::GET, endpoint, |r| r.query(query)).await?;
        decode(response).await
    }

    async fn send_json<B: Serialize + Sync>(
        &self,
        method: Method,
        endpoint: &str,
        body: &B,
    ) -> GatewayResult<Response> {
        self.send(method, endpoint, |r| r.json(body)).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> GatewayResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| GatewayError::Decode(e.to_string()))
}

/// Reads retry every transient failure. Writes (dispatch, ref creation,
/// content updates) may already have been applied when the response is
/// lost, so they are only repeated after a 429, which GitHub answers before
/// doing any work.
fn retry_policy(method: &Method) -> fn(&GatewayError) -> bool {
    if *method == Method::GET {
        GatewayError::is_transient
    } else {
        is_rate_limited
    }
}

fn is_rate_limited(err: &GatewayError) -> bool {
    matches!(err, GatewayError::Api { status: 429, .. })
}

/// `Ok(None)` for a 404, the value otherwise.
fn absent_if_not_found<T>(result: GatewayResult<T>) -> GatewayResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(GatewayError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// GitHub answers 422 both for an existing ref and for an invalid one;
/// only the former is [`GatewayError::AlreadyExists`].
fn ref_error(err: GatewayError, repo: &str, branch: &str) -> GatewayError {
    match err {
        GatewayError::Api {
            status: 422,
            ref message,
            ..
        } if message.contains("already exists") => GatewayError::AlreadyExists {
            repo: repo.to_string(),
            branch: branch.to_string(),
        },
        other => other,
    }
}

pub(crate) fn contents_endpoint(repo: &str, path: &str) -> String {
    format!("/repos/{repo}/contents/{}", path.trim_start_matches('/'))
}

pub(crate) fn workflow_endpoint(repo: &str, workflow_file: &str, tail: &str) -> String {
    format!("/repos/{repo}/actions/workflows/{workflow_file}/{tail}")
}

#[async_trait]
impl RepoGateway for GitHubGateway {
    async fn file_content(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> GatewayResult<Option<RemoteFile>> {
        let endpoint = contents_endpoint(repo, path);
        let payload: Option<ContentResponse> =
            absent_if_not_found(self.get_json(&endpoint, &[("ref", branch)]).await)?;
        payload.map(ContentResponse::into_remote_file).transpose()
    }

    async fn update_file(&self, write: FileWrite<'_>) -> GatewayResult<()> {
        let endpoint = contents_endpoint(write.repo, write.path);
        let body = UpdateContentRequest::new(write.message, write.content, write.branch, write.sha);
        match self.send_json(Method::PUT, &endpoint, &body).await {
            Ok(_) => {
                info!(repo = %write.repo, path = %write.path, branch = %write.branch, "file committed");
                Ok(())
            }
            // 409: stale sha, 422: sha missing for an existing file
            Err(GatewayError::Api {
                status: status @ (409 | 422),
                message,
                ..
            }) => Err(GatewayError::Conflict {
                repo: write.repo.to_string(),
                path: write.path.to_string(),
                detail: format!("{status}: {message}"),
            }),
            Err(e) => Err(e),
        }
    }

    async fn create_branch(
        &self,
        repo: &str,
        new_branch: &str,
        base_branch: &str,
    ) -> GatewayResult<()> {
        let base: RefResponse = self
            .get_json(&format!("/repos/{repo}/git/ref/heads/{base_branch}"), &[])
            .await?;
        let body = CreateRefRequest {
            git_ref: format!("refs/heads/{new_branch}"),
            sha: base.object.sha,
        };
        self.send_json(Method::POST, &format!("/repos/{repo}/git/refs"), &body)
            .await
            .map_err(|e| ref_error(e, repo, new_branch))?;
        Ok(())
    }

    async fn dispatch_workflow(
        &self,
        repo: &str,
        workflow_file: &str,
        branch: &str,
    ) -> GatewayResult<()> {
        let endpoint = workflow_endpoint(repo, workflow_file, "dispatches");
        self.send_json(Method::POST, &endpoint, &DispatchRequest { git_ref: branch })
            .await?;
        Ok(())
    }

    async fn latest_run(
        &self,
        repo: &str,
        workflow_file: &str,
        branch: &str,
    ) -> GatewayResult<Option<RunHandle>> {
        let endpoint = workflow_endpoint(repo, workflow_file, "runs");
        let list: RunList = self
            .get_json(
                &endpoint,
                &[("branch", branch), ("event", "workflow_dispatch"), ("per_page", "1")],
            )
            .await?;
        Ok(list
            .workflow_runs
            .into_iter()
            .next()
            .map(RunPayload::into_handle))
    }

    async fn run_with_jobs(&self, repo: &str, run_id: u64) -> GatewayResult<Option<WorkflowRun>> {
        let run: Option<RunPayload> = absent_if_not_found(
            self.get_json(&format!("/repos/{repo}/actions/runs/{run_id}"), &[])
                .await,
        )?;
        let Some(run) = run else {
            return Ok(None);
        };
        let jobs: JobList = self
            .get_json(
                &format!("/repos/{repo}/actions/runs/{run_id}/jobs"),
                &[("per_page", "100")],
            )
            .await?;
        Ok(Some(assemble_run(repo, run, jobs)))
    }
}

impl std::fmt::Debug for GitHubGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubGateway")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
