//! CI workflow dispatch, completion polling and log extraction.
//!
//! Dispatching across the fleet produces a [`DispatchSession`]; awaiting and
//! log extraction consume it, so several sessions can coexist in one
//! process.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::coordinator::{FanOut, FanOutReport, OperationResult};
use crate::error::{FleetError, Result};
use crate::gateway::{RepoGateway, WorkflowRun};
use crate::registry::{FleetRegistry, Service};
use crate::run_log;

/// A run created more than this long before the dispatch request is an
/// older run, not the one just requested.
const DISPATCH_CLOCK_SKEW_SECS: i64 = 5;

/// Lifecycle of one dispatched run as tracked by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Dispatched,
    Polling,
    Completed,
    TimedOut,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::TimedOut)
    }

    pub fn can_transition_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Dispatched, Polling) | (Polling, Completed) | (Dispatched, TimedOut) | (Polling, TimedOut)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Dispatched => "dispatched",
            RunPhase::Polling => "polling",
            RunPhase::Completed => "completed",
            RunPhase::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase bookkeeping for a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTracker {
    pub repository: String,
    pub run_id: u64,
    phase: RunPhase,
}

impl RunTracker {
    pub fn new(repository: impl Into<String>, run_id: u64) -> Self {
        Self {
            repository: repository.into(),
            run_id,
            phase: RunPhase::Dispatched,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn advance(&mut self, next: RunPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(FleetError::InvalidTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        debug!(repo = %self.repository, run_id = self.run_id, from = %self.phase, to = %next, "run phase");
        self.phase = next;
        Ok(())
    }
}

/// Dispatch results of one fleet-wide dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchSession {
    pub id: Uuid,
    pub branch: String,
    pub workflow_file: String,
    pub dispatched_at: DateTime<Utc>,
    /// One entry per repository, in registry order. The payload is the
    /// run created by the dispatch, or `None` when none was found.
    pub results: Vec<OperationResult<WorkflowRun>>,
}

impl DispatchSession {
    pub fn new(branch: impl Into<String>, workflow_file: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            branch: branch.into(),
            workflow_file: workflow_file.into(),
            dispatched_at: Utc::now(),
            results: Vec::new(),
        }
    }

    /// Entries whose dispatch produced a run.
    pub fn dispatched(&self) -> impl Iterator<Item = (&OperationResult<WorkflowRun>, &WorkflowRun)> {
        self.results
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| r.payload.as_ref().map(|run| (r, run)))
    }

    pub fn report(&self) -> FanOutReport<WorkflowRun> {
        FanOutReport::new(format!("dispatch on {}", self.branch), self.results.clone())
    }
}

/// A run log written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedLog {
    pub service: String,
    pub repository: String,
    pub path: PathBuf,
}

pub struct WorkflowOrchestrator {
    gateway: Arc<dyn RepoGateway>,
    registry: FleetRegistry,
    logs_dir: PathBuf,
}

impl WorkflowOrchestrator {
    pub fn new(gateway: Arc<dyn RepoGateway>, registry: FleetRegistry) -> Self {
        let logs_dir = registry.config().workflow.logs_dir.clone();
        Self {
            gateway,
            registry,
            logs_dir,
        }
    }

    /// Write run logs somewhere other than the configured directory.
    pub fn with_logs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = dir.into();
        self
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    fn workflow_file(&self) -> &str {
        &self.registry.config().workflow.workflow_file
    }

    /// Dispatch the workflow on one repository and return the run it
    /// created; `None` if the dispatch failed or no new run is indexed yet.
    pub async fn dispatch(&self, repository: &str, branch: &str) -> Option<WorkflowRun> {
        match self.try_dispatch(repository, branch).await {
            Ok(run) => Some(run),
            Err(e) => {
                warn!(repo = %repository, branch = %branch, error = %e, "dispatch produced no run");
                None
            }
        }
    }

    /// Dispatch on every repository, spaced by the configured delay.
    pub async fn dispatch_fleet(&self, branch: &str) -> DispatchSession {
        let mut session = DispatchSession::new(branch, self.workflow_file());
        self.dispatch_into(&mut session).await;
        session
    }

    /// Fill `session.results` as each repository is dispatched, so an
    /// interrupted caller keeps whatever completed.
    pub async fn dispatch_into(&self, session: &mut DispatchSession) {
        let services = self.registry.all_services();
        let branch = session.branch.clone();
        info!(session = %session.id, branch = %branch, workflow = %session.workflow_file, "dispatching fleet");
        FanOut::new(format!("dispatch on {branch}"))
            .paced(self.registry.config().workflow.dispatch_delay())
            .run_into(&services, &mut session.results, |svc| {
                self.try_dispatch(&svc.repository, &branch)
            })
            .await;
    }

    /// Poll until the run reaches a terminal status. `None` on timeout.
    pub async fn await_completion(
        &self,
        repository: &str,
        run_id: u64,
        timeout: Duration,
    ) -> Option<WorkflowRun> {
        match self.try_await(repository, run_id, timeout).await {
            Ok(run) => Some(run),
            Err(e) => {
                warn!(repo = %repository, run_id = run_id, error = %e, "run did not complete");
                None
            }
        }
    }

    /// Await every run the session dispatched, in session order.
    pub async fn await_fleet(
        &self,
        session: &DispatchSession,
        timeout: Duration,
    ) -> FanOutReport<WorkflowRun> {
        let mut report = FanOutReport::new(format!("await runs on {}", session.branch), Vec::new());
        self.await_into(session, timeout, &mut report.results).await;
        report
    }

    pub async fn await_into(
        &self,
        session: &DispatchSession,
        timeout: Duration,
        sink: &mut Vec<OperationResult<WorkflowRun>>,
    ) {
        let run_ids: HashMap<&str, u64> = session
            .dispatched()
            .map(|(entry, run)| (entry.repository.as_str(), run.run_id))
            .collect();
        let services: Vec<Service> = session
            .dispatched()
            .filter_map(|(entry, _)| self.registry.find_service(&entry.repository))
            .collect();
        FanOut::new(format!("await runs on {}", session.branch))
            .run_into(&services, sink, |svc| {
                let run_id = run_ids.get(svc.repository.as_str()).copied();
                async move {
                    let run_id = run_id.ok_or_else(|| FleetError::RunNotIndexed {
                        repo: svc.repository.clone(),
                        branch: session.branch.clone(),
                    })?;
                    self.try_await(&svc.repository, run_id, timeout).await
                }
            })
            .await;
    }

    /// Write the run's job/step summary to a new file in the logs directory.
    pub async fn extract_log(&self, repository: &str, run_id: u64, service: &str) -> Option<PathBuf> {
        match self.try_extract(repository, run_id, service).await {
            Ok(path) => {
                info!(repo = %repository, run_id = run_id, path = %path.display(), "saved run log");
                Some(path)
            }
            Err(e) => {
                error!(repo = %repository, run_id = run_id, error = %e, "failed to extract run log");
                None
            }
        }
    }

    /// Extract logs for every dispatched run of `session`. Entries without
    /// a run are skipped.
    pub async fn extract_fleet_logs(&self, session: &DispatchSession) -> Vec<ExtractedLog> {
        let mut logs = Vec::new();
        self.extract_into(session, &mut logs).await;
        logs
    }

    pub async fn extract_into(&self, session: &DispatchSession, sink: &mut Vec<ExtractedLog>) {
        for (entry, run) in session.dispatched() {
            info!(service = %entry.service, run_id = run.run_id, "extracting run log");
            if let Some(path) = self
                .extract_log(&entry.repository, run.run_id, &entry.service)
                .await
            {
                sink.push(ExtractedLog {
                    service: entry.service.clone(),
                    repository: entry.repository.clone(),
                    path,
                });
            }
        }
    }

    async fn try_dispatch(&self, repository: &str, branch: &str) -> Result<WorkflowRun> {
        let workflow_file = self.workflow_file();
        let requested_at = Utc::now();
        info!(repo = %repository, branch = %branch, workflow = %workflow_file, "dispatching workflow");
        self.gateway
            .dispatch_workflow(repository, workflow_file, branch)
            .await?;

        let earliest = requested_at - chrono::Duration::seconds(DISPATCH_CLOCK_SKEW_SECS);
        let handle = self
            .gateway
            .latest_run(repository, workflow_file, branch)
            .await?
            .filter(|h| h.created_at.map_or(true, |created| created >= earliest))
            .ok_or_else(|| FleetError::RunNotIndexed {
                repo: repository.to_string(),
                branch: branch.to_string(),
            })?;
        info!(repo = %repository, run_id = handle.id, url = %handle.url, "workflow dispatched");
        Ok(handle.into_run(repository))
    }

    async fn try_await(&self, repository: &str, run_id: u64, timeout: Duration) -> Result<WorkflowRun> {
        let poll_interval = self.registry.config().workflow.poll_interval();
        let mut tracker = RunTracker::new(repository, run_id);
        let start = Instant::now();
        info!(repo = %repository, run_id = run_id, timeout_secs = timeout.as_secs(), "waiting for run");

        while start.elapsed() < timeout {
            match self.gateway.run_with_jobs(repository, run_id).await {
                Ok(Some(run)) => {
                    if tracker.phase() == RunPhase::Dispatched {
                        tracker.advance(RunPhase::Polling)?;
                    }
                    info!(repo = %repository, run_id = run_id, status = %run.status, "run status");
                    if run.is_terminal() {
                        tracker.advance(RunPhase::Completed)?;
                        info!(
                            repo = %repository,
                            run_id = run_id,
                            conclusion = run.conclusion.map_or("none", |c| c.as_str()),
                            "run completed"
                        );
                        return Ok(run);
                    }
                }
                Ok(None) => debug!(repo = %repository, run_id = run_id, "run not visible yet"),
                Err(e) => warn!(repo = %repository, run_id = run_id, error = %e, "poll failed"),
            }
            sleep(poll_interval).await;
        }

        tracker.advance(RunPhase::TimedOut)?;
        Err(FleetError::Timeout {
            repo: repository.to_string(),
            run_id,
            timeout_secs: timeout.as_secs(),
        })
    }

    async fn try_extract(&self, repository: &str, run_id: u64, service: &str) -> Result<PathBuf> {
        let run = self
            .gateway
            .run_with_jobs(repository, run_id)
            .await?
            .ok_or_else(|| FleetError::RunNotFound {
                repo: repository.to_string(),
                run_id,
            })?;
        let content = run_log::render(service, &run);
        let stem = run_log::file_stem(service, run_id, Local::now());
        run_log::write_unique(&self.logs_dir, &stem, &content).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetConfig;
    use crate::fakes::MemoryGateway;
    use crate::gateway::{RunConclusion, RunStatus};

    fn orchestrator(logs: &Path) -> (Arc<MemoryGateway>, WorkflowOrchestrator) {
        let raw = r#"{
            "organization": "acme",
            "branches": { "base_branch": "develop", "compare_branch": "main" },
            "service_groups": {
                "core": { "folder": "f1", "services": ["a", "b"] },
                "edge": { "folder": "f2", "services": ["c"] }
            },
            "config_files": { "application": "app.yml" },
            "workflow": { "workflow_file": "ci.yml" }
        }"#;
        let registry = FleetRegistry::from_config(FleetConfig::from_json_str(raw).unwrap()).unwrap();
        let gw = Arc::new(MemoryGateway::new());
        let orch = WorkflowOrchestrator::new(gw.clone(), registry).with_logs_dir(logs);
        (gw, orch)
    }

    #[test]
    fn test_phase_transitions() {
        use RunPhase::*;
        assert!(Dispatched.can_transition_to(Polling));
        assert!(Polling.can_transition_to(Completed));
        assert!(Dispatched.can_transition_to(TimedOut));
        assert!(!Dispatched.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Polling));
        assert!(!TimedOut.can_transition_to(Completed));

        let mut tracker = RunTracker::new("acme/a", 1);
        assert!(matches!(
            tracker.advance(Completed),
            Err(FleetError::InvalidTransition { .. })
        ));
        tracker.advance(Polling).unwrap();
        tracker.advance(Completed).unwrap();
        assert!(tracker.phase().is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_fleet_marks_unindexed_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (gw, orch) = orchestrator(dir.path());
        gw.leave_unindexed("acme/b");

        let session = orch.dispatch_fleet("feature/x").await;
        assert_eq!(session.results.len(), 3);
        assert!(session.results[0].success);
        assert!(!session.results[1].success);
        assert!(session.results[1].payload.is_none());
        assert!(session.results[2].success);
        assert_eq!(session.dispatched().count(), 2);
        assert_eq!(session.report().summary(), "dispatch on feature/x: 2/3 succeeded");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatches_are_spaced() {
        let dir = tempfile::tempdir().unwrap();
        let (_gw, orch) = orchestrator(dir.path());
        let start = Instant::now();
        orch.dispatch_fleet("feature/x").await;
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_completion_polls_until_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let (gw, orch) = orchestrator(dir.path());
        gw.set_run_script(vec![RunStatus::Queued, RunStatus::InProgress, RunStatus::Completed]);
        gw.set_conclusion("acme/a", RunConclusion::Failure);

        let run = orch.dispatch("acme/a", "feature/x").await.unwrap();
        let start = Instant::now();
        let done = orch
            .await_completion("acme/a", run.run_id, Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.conclusion, Some(RunConclusion::Failure));
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_completion_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let (gw, orch) = orchestrator(dir.path());
        gw.set_run_script(vec![RunStatus::InProgress]);

        let run = orch.dispatch("acme/a", "feature/x").await.unwrap();
        let start = Instant::now();
        assert!(orch
            .await_completion("acme/a", run.run_id, Duration::from_secs(30))
            .await
            .is_none());
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extract_fleet_logs_skips_failed_dispatches() {
        let dir = tempfile::tempdir().unwrap();
        let (gw, orch) = orchestrator(dir.path());
        gw.fail_repo("acme/c");

        let session = orch.dispatch_fleet("feature/x").await;
        let logs = orch.extract_fleet_logs(&session).await;
        let services: Vec<&str> = logs.iter().map(|l| l.service.as_str()).collect();
        assert_eq!(services, vec!["a", "b"]);
        for log in &logs {
            let name = log.path.file_name().unwrap().to_string_lossy().to_string();
            assert!(name.starts_with(&format!("{}_", log.service)));
            assert!(name.ends_with(".log"));
            let text = std::fs::read_to_string(&log.path).unwrap();
            assert!(text.starts_with(&format!("Workflow Logs for {}", log.service)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_fleet_covers_dispatched_runs_only() {
        let dir = tempfile::tempdir().unwrap();
        let (gw, orch) = orchestrator(dir.path());
        gw.leave_unindexed("acme/a");

        let session = orch.dispatch_fleet("feature/x").await;
        let report = orch.await_fleet(&session, Duration::from_secs(60)).await;
        let repos: Vec<&str> = report.results.iter().map(|r| r.repository.as_str()).collect();
        assert_eq!(repos, vec!["acme/b", "acme/c"]);
        assert!(report.all_succeeded());
    }
}
