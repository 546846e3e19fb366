//! In-memory gateway fake (testing only)
//!
//! [`MemoryGateway`] satisfies the [`RepoGateway`] contract against a
//! `HashMap`-backed set of repositories, branches, files and workflow runs,
//! with knobs for the failure modes the orchestration engine must tolerate.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::GatewayError;
use crate::gateway::{
    FileWrite, GatewayResult, Job, RemoteFile, RepoGateway, RunConclusion, RunHandle, RunStatus,
    Step, WorkflowRun,
};

/// Text appended by a simulated concurrent edit.
pub const CONCURRENT_EDIT_MARKER: &str = "# edited concurrently\n";

#[derive(Debug)]
struct FakeRun {
    repo: String,
    branch: String,
    workflow: String,
    status: RunStatus,
    script: VecDeque<RunStatus>,
    conclusion: RunConclusion,
    created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    /// `(repo, branch, path)` -> file.
    files: HashMap<(String, String, String), RemoteFile>,
    branches: HashMap<String, HashSet<String>>,
    failing: HashSet<String>,
    unindexed: HashSet<String>,
    concurrent_edits: HashSet<(String, String)>,
    conclusions: HashMap<String, RunConclusion>,
    run_script: Vec<RunStatus>,
    runs: HashMap<u64, FakeRun>,
    next_run_id: u64,
    revision: u64,
    calls: Vec<String>,
}

impl State {
    fn next_sha(&mut self, content: &str) -> String {
        self.revision += 1;
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hasher.update(self.revision.to_be_bytes());
        hex::encode(hasher.finalize())
    }

    fn check_available(&self, repo: &str) -> GatewayResult<()> {
        if self.failing.contains(repo) {
            return Err(GatewayError::Api {
                status: 500,
                endpoint: format!("/repos/{repo}"),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn has_branch(&self, repo: &str, branch: &str) -> bool {
        self.branches
            .get(repo)
            .is_some_and(|branches| branches.contains(branch))
    }
}

/// In-memory hosting platform.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<State>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an (empty) branch.
    pub fn add_branch(&self, repo: &str, branch: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .branches
            .entry(repo.to_string())
            .or_default()
            .insert(branch.to_string());
    }

    /// Seed a file, creating the branch if needed. Returns its SHA.
    pub fn put_file(&self, repo: &str, branch: &str, path: &str, content: &str) -> String {
        self.add_branch(repo, branch);
        let mut state = self.state.lock().unwrap();
        let sha = state.next_sha(content);
        state.files.insert(
            (repo.to_string(), branch.to_string(), path.to_string()),
            RemoteFile {
                content: content.to_string(),
                sha: sha.clone(),
            },
        );
        sha
    }

    /// Current content of a file, if present.
    pub fn file(&self, repo: &str, branch: &str, path: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .files
            .get(&(repo.to_string(), branch.to_string(), path.to_string()))
            .map(|f| f.content.clone())
    }

    pub fn has_branch(&self, repo: &str, branch: &str) -> bool {
        self.state.lock().unwrap().has_branch(repo, branch)
    }

    /// Every call against `repo` fails with a server error.
    pub fn fail_repo(&self, repo: &str) {
        self.state.lock().unwrap().failing.insert(repo.to_string());
    }

    /// Dispatches on `repo` are accepted but no run ever gets indexed.
    pub fn leave_unindexed(&self, repo: &str) {
        self.state
            .lock()
            .unwrap()
            .unindexed
            .insert(repo.to_string());
    }

    /// The next read of `path` in `repo` is followed by a foreign commit,
    /// so the token it returned is stale by the time it is used.
    pub fn edit_concurrently(&self, repo: &str, path: &str) {
        self.state
            .lock()
            .unwrap()
            .concurrent_edits
            .insert((repo.to_string(), path.to_string()));
    }

    /// Status sequence new runs go through, one step per
    /// [`RepoGateway::run_with_jobs`] call. The last status sticks.
    pub fn set_run_script(&self, statuses: Vec<RunStatus>) {
        self.state.lock().unwrap().run_script = statuses;
    }

    pub fn set_conclusion(&self, repo: &str, conclusion: RunConclusion) {
        self.state
            .lock()
            .unwrap()
            .conclusions
            .insert(repo.to_string(), conclusion);
    }

    /// Log of mutating calls in the order they happened.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn job_tree(status: RunStatus, conclusion: Option<RunConclusion>) -> Vec<Job> {
        let steps = ["Set up job", "Checkout", "Build with Maven"]
            .iter()
            .map(|name| Step {
                name: name.to_string(),
                status,
                conclusion,
            })
            .collect();
        vec![Job {
            name: "build".to_string(),
            status,
            conclusion,
            steps,
        }]
    }
}

/// Subset of git's ref-name rules the platform enforces.
fn valid_ref_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && !name.starts_with('/')
        && !name.ends_with('/')
        && !name.chars().any(|c| c.is_whitespace() || "~^:?*[\\".contains(c))
}

#[async_trait]
impl RepoGateway for MemoryGateway {
    async fn file_content(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> GatewayResult<Option<RemoteFile>> {
        let mut state = self.state.lock().unwrap();
        state.check_available(repo)?;
        let key = (repo.to_string(), branch.to_string(), path.to_string());
        let current = state.files.get(&key).cloned();

        let edit_key = (repo.to_string(), path.to_string());
        if let Some(file) = &current {
            if state.concurrent_edits.remove(&edit_key) {
                let content = format!("{}{}", file.content, CONCURRENT_EDIT_MARKER);
                let sha = state.next_sha(&content);
                state.files.insert(key, RemoteFile { content, sha });
            }
        }
        Ok(current)
    }

    async fn update_file(&self, write: FileWrite<'_>) -> GatewayResult<()> {
        let mut state = self.state.lock().unwrap();
        state.check_available(write.repo)?;
        if !state.has_branch(write.repo, write.branch) {
            return Err(GatewayError::NotFound(format!(
                "branch {}:{}",
                write.repo, write.branch
            )));
        }
        let key = (
            write.repo.to_string(),
            write.branch.to_string(),
            write.path.to_string(),
        );
        let current_sha = state.files.get(&key).map(|f| f.sha.clone());
        if current_sha.as_deref() != write.sha {
            return Err(GatewayError::Conflict {
                repo: write.repo.to_string(),
                path: write.path.to_string(),
                detail: format!(
                    "expected {:?}, repository has {:?}",
                    write.sha, current_sha
                ),
            });
        }
        let sha = state.next_sha(write.content);
        state.files.insert(
            key,
            RemoteFile {
                content: write.content.to_string(),
                sha,
            },
        );
        state.calls.push(format!(
            "update {} {} {}",
            write.repo, write.branch, write.path
        ));
        Ok(())
    }

    async fn create_branch(
        &self,
        repo: &str,
        new_branch: &str,
        base_branch: &str,
    ) -> GatewayResult<()> {
        let mut state = self.state.lock().unwrap();
        state.check_available(repo)?;
        if !state.has_branch(repo, base_branch) {
            return Err(GatewayError::NotFound(format!("branch {repo}:{base_branch}")));
        }
        if !valid_ref_name(new_branch) {
            return Err(GatewayError::Api {
                status: 422,
                endpoint: format!("/repos/{repo}/git/refs"),
                message: "Reference name is invalid".to_string(),
            });
        }
        if state.has_branch(repo, new_branch) {
            return Err(GatewayError::AlreadyExists {
                repo: repo.to_string(),
                branch: new_branch.to_string(),
            });
        }
        let copied: Vec<_> = state
            .files
            .iter()
            .filter(|((r, b, _), _)| r == repo && b == base_branch)
            .map(|((r, _, p), f)| ((r.clone(), new_branch.to_string(), p.clone()), f.clone()))
            .collect();
        state.files.extend(copied);
        state
            .branches
            .entry(repo.to_string())
            .or_default()
            .insert(new_branch.to_string());
        state
            .calls
            .push(format!("branch {repo} {new_branch} from {base_branch}"));
        Ok(())
    }

    async fn dispatch_workflow(
        &self,
        repo: &str,
        workflow_file: &str,
        branch: &str,
    ) -> GatewayResult<()> {
        let mut state = self.state.lock().unwrap();
        state.check_available(repo)?;
        state.calls.push(format!("dispatch {repo} {branch}"));
        if state.unindexed.contains(repo) {
            return Ok(());
        }
        state.next_run_id += 1;
        let id = state.next_run_id;
        let script: VecDeque<RunStatus> = if state.run_script.is_empty() {
            VecDeque::from(vec![RunStatus::Completed])
        } else {
            state.run_script.iter().copied().collect()
        };
        let conclusion = state
            .conclusions
            .get(repo)
            .copied()
            .unwrap_or(RunConclusion::Success);
        state.runs.insert(
            id,
            FakeRun {
                repo: repo.to_string(),
                branch: branch.to_string(),
                workflow: workflow_file.to_string(),
                status: RunStatus::Queued,
                script,
                conclusion,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn latest_run(
        &self,
        repo: &str,
        workflow_file: &str,
        branch: &str,
    ) -> GatewayResult<Option<RunHandle>> {
        let state = self.state.lock().unwrap();
        state.check_available(repo)?;
        let latest = state
            .runs
            .iter()
            .filter(|(_, run)| run.repo == repo && run.branch == branch && run.workflow == workflow_file)
            .max_by_key(|(id, _)| **id)
            .map(|(id, run)| RunHandle {
                id: *id,
                status: run.status,
                conclusion: run.status.is_terminal().then_some(run.conclusion),
                url: format!("https://github.example/{repo}/actions/runs/{id}"),
                created_at: Some(run.created_at),
            });
        Ok(latest)
    }

    async fn run_with_jobs(&self, repo: &str, run_id: u64) -> GatewayResult<Option<WorkflowRun>> {
        let mut state = self.state.lock().unwrap();
        state.check_available(repo)?;
        let Some(run) = state.runs.get_mut(&run_id) else {
            return Ok(None);
        };
        if run.repo != repo {
            return Ok(None);
        }
        if let Some(next) = run.script.pop_front() {
            run.status = next;
        }
        let conclusion = run.status.is_terminal().then_some(run.conclusion);
        Ok(Some(WorkflowRun {
            repository: repo.to_string(),
            run_id,
            status: run.status,
            conclusion,
            url: format!("https://github.example/{repo}/actions/runs/{run_id}"),
            jobs: Self::job_tree(run.status, conclusion),
        }))
    }
}
