//! Work-branch creation across the fleet.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::coordinator::{FanOut, FanOutReport};
use crate::error::{FleetError, GatewayError, Result};
use crate::gateway::RepoGateway;
use crate::registry::{FleetRegistry, Service};

/// What happened to the branch on one repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchOutcome {
    Created,
    /// Only reported by [`BranchManager::ensure_branches`].
    AlreadyExisted,
}

pub struct BranchManager {
    gateway: Arc<dyn RepoGateway>,
    registry: FleetRegistry,
}

impl BranchManager {
    pub fn new(gateway: Arc<dyn RepoGateway>, registry: FleetRegistry) -> Self {
        Self { gateway, registry }
    }

    /// Create `branch` from the configured base branch on one repository.
    pub async fn create_branch(&self, service: &Service, branch: &str) -> Result<BranchOutcome> {
        let base = &self.registry.config().branches.base_branch;
        self.gateway
            .create_branch(&service.repository, branch, base)
            .await?;
        info!(repo = %service.repository, branch = %branch, base = %base, "created branch");
        Ok(BranchOutcome::Created)
    }

    /// Create `branch` on every repository; an existing branch is a failure.
    pub async fn create_branches(&self, branch: &str) -> FanOutReport<BranchOutcome> {
        let services = self.registry.all_services();
        FanOut::new(format!("create branch {branch}"))
            .run(&services, |svc| self.create_branch(svc, branch))
            .await
    }

    /// Like [`Self::create_branches`], but a branch that already exists
    /// counts as success so the operation can be re-run.
    pub async fn ensure_branches(&self, branch: &str) -> FanOutReport<BranchOutcome> {
        let services = self.registry.all_services();
        FanOut::new(format!("ensure branch {branch}"))
            .run(&services, |svc| async move {
                match self.create_branch(svc, branch).await {
                    Err(FleetError::Gateway(GatewayError::AlreadyExists { .. })) => {
                        info!(repo = %svc.repository, branch = %branch, "branch already exists");
                        Ok(BranchOutcome::AlreadyExisted)
                    }
                    other => other,
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetConfig;
    use crate::fakes::MemoryGateway;

    fn registry() -> FleetRegistry {
        let raw = r#"{
            "organization": "acme",
            "branches": { "base_branch": "develop", "compare_branch": "main" },
            "service_groups": { "core": { "folder": "f", "services": ["a", "b", "c"] } },
            "config_files": { "application": "app.yml" },
            "workflow": { "workflow_file": "ci.yml" }
        }"#;
        FleetRegistry::from_config(FleetConfig::from_json_str(raw).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_create_branches_records_missing_base_as_failure() {
        let gw = Arc::new(MemoryGateway::new());
        gw.add_branch("acme/a", "develop");
        gw.add_branch("acme/c", "develop");
        let manager = BranchManager::new(gw.clone(), registry());

        let report = manager.create_branches("feature/x").await;
        assert_eq!(report.total(), 3);
        assert_eq!(report.success_count(), 2);
        assert!(!report.results[1].success);
        assert!(gw.has_branch("acme/a", "feature/x"));
        assert!(!gw.has_branch("acme/b", "feature/x"));
    }

    #[tokio::test]
    async fn test_ensure_branches_tolerates_existing() {
        let gw = Arc::new(MemoryGateway::new());
        for repo in ["acme/a", "acme/b", "acme/c"] {
            gw.add_branch(repo, "develop");
        }
        gw.add_branch("acme/b", "feature/x");
        let manager = BranchManager::new(gw.clone(), registry());

        let strict = manager.create_branches("feature/x").await;
        assert_eq!(strict.success_count(), 2);

        let relaxed = manager.ensure_branches("feature/x").await;
        assert!(relaxed.all_succeeded());
        assert!(relaxed
            .results
            .iter()
            .all(|r| r.payload == Some(BranchOutcome::AlreadyExisted)));
    }

    #[tokio::test]
    async fn test_ensure_branches_fails_on_rejected_ref_name() {
        let gw = Arc::new(MemoryGateway::new());
        for repo in ["acme/a", "acme/b", "acme/c"] {
            gw.add_branch(repo, "develop");
        }
        let manager = BranchManager::new(gw.clone(), registry());

        let report = manager.ensure_branches("feature/bad..name").await;
        assert_eq!(report.success_count(), 0);
        for result in &report.results {
            assert!(result.payload.is_none());
            assert!(result.error.as_deref().unwrap().contains("422"));
        }
        assert!(!gw.has_branch("acme/a", "feature/bad..name"));
    }
}
