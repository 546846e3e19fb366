//! End-to-end fleet automation.
//!
//! Stages run in order: ensure the work branch, apply the connection
//! template on it, compare manifests against the base branch, dispatch the
//! workflow, optionally await the runs, extract run logs. Each stage writes
//! into a caller-owned [`AutomationReport`], so a caller that abandons the
//! pipeline midway still holds everything finished so far.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::branches::{BranchManager, BranchOutcome};
use crate::comparator::{FleetComparison, ManifestComparator};
use crate::coordinator::FanOutReport;
use crate::gateway::{RepoGateway, WorkflowRun};
use crate::registry::FleetRegistry;
use crate::replacer::ConfigReplacer;
use crate::templates::TemplateKey;
use crate::workflow::{DispatchSession, ExtractedLog, WorkflowOrchestrator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Branches,
    Config,
    Compare,
    Dispatch,
    Await,
    Logs,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Branches => "branches",
            Stage::Config => "config",
            Stage::Compare => "compare",
            Stage::Dispatch => "dispatch",
            Stage::Await => "await",
            Stage::Logs => "logs",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationRequest {
    /// Work branch, created from the base branch when missing.
    pub branch: String,
    pub template: TemplateKey,
    /// `None` skips waiting for runs to finish.
    pub await_timeout: Option<Duration>,
    pub extract_logs: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AutomationReport {
    pub completed: Vec<Stage>,
    pub branches: Option<FanOutReport<BranchOutcome>>,
    pub config: Option<FanOutReport<()>>,
    pub comparison: Option<FleetComparison>,
    pub session: Option<DispatchSession>,
    pub completions: Option<FanOutReport<WorkflowRun>>,
    pub logs: Vec<ExtractedLog>,
}

impl AutomationReport {
    pub fn is_complete(&self, stage: Stage) -> bool {
        self.completed.contains(&stage)
    }

    /// Summary lines for every stage that produced output.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(r) = &self.branches {
            lines.push(r.summary());
        }
        if let Some(r) = &self.config {
            lines.push(r.summary());
        }
        if let Some(c) = &self.comparison {
            lines.push(c.summary());
        }
        if let Some(s) = &self.session {
            lines.push(s.report().summary());
        }
        if let Some(r) = &self.completions {
            lines.push(r.summary());
        }
        if self.is_complete(Stage::Logs) || !self.logs.is_empty() {
            lines.push(format!("logs: {} extracted", self.logs.len()));
        }
        lines
    }

    fn finish(&mut self, stage: Stage) {
        info!(stage = %stage, "pipeline stage finished");
        self.completed.push(stage);
    }
}

pub struct AutomationPipeline {
    registry: FleetRegistry,
    branches: BranchManager,
    replacer: ConfigReplacer,
    comparator: ManifestComparator,
    workflows: WorkflowOrchestrator,
}

impl AutomationPipeline {
    pub fn new(gateway: Arc<dyn RepoGateway>, registry: FleetRegistry) -> Self {
        Self {
            branches: BranchManager::new(gateway.clone(), registry.clone()),
            replacer: ConfigReplacer::from_registry(gateway.clone(), registry.clone()),
            comparator: ManifestComparator::new(gateway.clone(), registry.clone()),
            workflows: WorkflowOrchestrator::new(gateway, registry.clone()),
            registry,
        }
    }

    pub fn with_logs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workflows = self.workflows.with_logs_dir(dir);
        self
    }

    pub async fn run(&self, request: &AutomationRequest, report: &mut AutomationReport) {
        let branch = request.branch.as_str();
        info!(branch = %branch, template = %request.template, "automation started");

        report.branches = Some(self.branches.ensure_branches(branch).await);
        report.finish(Stage::Branches);

        report.config = Some(self.replacer.apply_to_fleet(branch, request.template).await);
        report.finish(Stage::Config);

        let base = &self.registry.config().branches.base_branch;
        report.comparison = Some(self.comparator.compare_fleet(base, branch).await);
        report.finish(Stage::Compare);

        let session = report.session.insert(DispatchSession::new(
            branch,
            self.registry.config().workflow.workflow_file.as_str(),
        ));
        self.workflows.dispatch_into(session).await;
        report.finish(Stage::Dispatch);

        let Some(session) = report.session.as_ref() else {
            return;
        };
        if let Some(timeout) = request.await_timeout {
            let completions = report.completions.insert(FanOutReport::new(
                format!("await runs on {branch}"),
                Vec::new(),
            ));
            self.workflows
                .await_into(session, timeout, &mut completions.results)
                .await;
            report.completed.push(Stage::Await);
            info!(stage = %Stage::Await, "pipeline stage finished");
        }

        if request.extract_logs {
            self.workflows.extract_into(session, &mut report.logs).await;
            report.completed.push(Stage::Logs);
            info!(stage = %Stage::Logs, "pipeline stage finished");
        }
        info!(branch = %branch, stages = report.completed.len(), "automation finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetConfig;
    use crate::fakes::MemoryGateway;

    const POM: &str = r#"<project xmlns="http://maven.apache.org/POM/4.0.0"><dependencies/></project>"#;

    fn setup(templates: &std::path::Path) -> (Arc<MemoryGateway>, AutomationPipeline) {
        std::fs::write(templates.join("postgres.yml"), "db: postgres\n").unwrap();
        let raw = format!(
            r#"{{
                "organization": "acme",
                "branches": {{ "base_branch": "develop", "compare_branch": "main" }},
                "service_groups": {{ "core": {{ "folder": "f", "services": ["a", "b"] }} }},
                "config_files": {{ "application": "app.yml" }},
                "workflow": {{ "workflow_file": "ci.yml" }},
                "templates_dir": "{}"
            }}"#,
            templates.display()
        );
        let registry = FleetRegistry::from_config(FleetConfig::from_json_str(&raw).unwrap()).unwrap();
        let gw = Arc::new(MemoryGateway::new());
        for repo in ["acme/a", "acme/b"] {
            gw.put_file(repo, "develop", "pom.xml", POM);
            gw.put_file(repo, "develop", "app.yml", "db: h2\n");
        }
        let pipeline =
            AutomationPipeline::new(gw.clone(), registry).with_logs_dir(templates.join("logs"));
        (gw, pipeline)
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_fills_every_stage() {
        let dir = tempfile::tempdir().unwrap();
        let (gw, pipeline) = setup(dir.path());
        let request = AutomationRequest {
            branch: "feature/pg".to_string(),
            template: TemplateKey::Postgres,
            await_timeout: Some(Duration::from_secs(60)),
            extract_logs: true,
        };
        let mut report = AutomationReport::default();
        pipeline.run(&request, &mut report).await;

        assert_eq!(report.completed.len(), 6);
        assert!(report.config.as_ref().unwrap().all_succeeded());
        let comparison = report.comparison.as_ref().unwrap();
        assert_eq!(comparison.entries.len(), 2);
        assert_eq!(comparison.differing().count(), 0);
        assert_eq!(report.completions.as_ref().unwrap().success_count(), 2);
        assert_eq!(report.logs.len(), 2);
        assert_eq!(
            gw.file("acme/b", "feature/pg", "app.yml").as_deref(),
            Some("db: postgres\n")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_is_reported_per_stage() {
        let dir = tempfile::tempdir().unwrap();
        let (gw, pipeline) = setup(dir.path());
        gw.fail_repo("acme/a");
        let request = AutomationRequest {
            branch: "feature/pg".to_string(),
            template: TemplateKey::Postgres,
            await_timeout: None,
            extract_logs: false,
        };
        let mut report = AutomationReport::default();
        pipeline.run(&request, &mut report).await;

        assert!(!report.is_complete(Stage::Await));
        assert!(report.completions.is_none());
        let lines = report.summary_lines();
        assert_eq!(lines[0], "ensure branch feature/pg: 1/2 succeeded");
        assert_eq!(lines[1], "apply postgres config: 1/2 succeeded");
        assert!(lines[2].contains("1 unavailable"));
        assert_eq!(lines[3], "dispatch on feature/pg: 1/2 succeeded");
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_run_keeps_finished_stages() {
        let dir = tempfile::tempdir().unwrap();
        let (_gw, pipeline) = setup(dir.path());
        let request = AutomationRequest {
            branch: "feature/pg".to_string(),
            template: TemplateKey::Postgres,
            await_timeout: Some(Duration::from_secs(60)),
            extract_logs: true,
        };
        let mut report = AutomationReport::default();

        // The second dispatch waits out the 2s pacing delay; stop before it.
        let outcome =
            tokio::time::timeout(Duration::from_secs(1), pipeline.run(&request, &mut report)).await;
        assert!(outcome.is_err());

        assert!(report.branches.as_ref().unwrap().all_succeeded());
        assert!(report.config.as_ref().unwrap().all_succeeded());
        assert!(report.comparison.is_some());
        let session = report.session.as_ref().unwrap();
        assert_eq!(session.results.len(), 1);
        assert_eq!(session.results[0].repository, "acme/a");
        assert_eq!(
            report.completed,
            vec![Stage::Branches, Stage::Config, Stage::Compare]
        );
        assert!(!report.is_complete(Stage::Dispatch));
        assert!(report.completions.is_none());
    }
}
