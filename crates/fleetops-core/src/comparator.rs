//! Cross-branch manifest comparison.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::coordinator::{FanOut, FanOutReport};
use crate::error::{FleetError, Result};
use crate::gateway::{FileWrite, RepoGateway};
use crate::manifest::{ManifestDiff, ManifestSnapshot};
use crate::registry::FleetRegistry;

/// Comparison of one repository's manifest between two branches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comparison {
    pub has_differences: bool,
    pub diff: ManifestDiff,
    pub branch1: String,
    pub branch2: String,
    pub branch1_deps_count: usize,
    pub branch2_deps_count: usize,
}

impl Comparison {
    pub fn between(
        branch1: &str,
        before: &ManifestSnapshot,
        branch2: &str,
        after: &ManifestSnapshot,
    ) -> Self {
        let diff = before.diff(after);
        Self {
            has_differences: !diff.is_empty(),
            diff,
            branch1: branch1.to_string(),
            branch2: branch2.to_string(),
            branch1_deps_count: before.dependencies.len(),
            branch2_deps_count: after.dependencies.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceComparison {
    pub service: String,
    pub repository: String,
    pub comparison: Comparison,
}

/// Fleet-wide comparison. Repositories whose comparison could not be made
/// are left out of `entries` and named in `unavailable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetComparison {
    pub branch1: String,
    pub branch2: String,
    pub entries: Vec<ServiceComparison>,
    pub unavailable: Vec<String>,
}

impl FleetComparison {
    fn from_report(branch1: &str, branch2: &str, report: FanOutReport<Comparison>) -> Self {
        let mut entries = Vec::new();
        let mut unavailable = Vec::new();
        for result in report.results {
            match result.payload {
                Some(comparison) => entries.push(ServiceComparison {
                    service: result.service,
                    repository: result.repository,
                    comparison,
                }),
                None => unavailable.push(result.repository),
            }
        }
        Self {
            branch1: branch1.to_string(),
            branch2: branch2.to_string(),
            entries,
            unavailable,
        }
    }

    pub fn differing(&self) -> impl Iterator<Item = &ServiceComparison> {
        self.entries.iter().filter(|e| e.comparison.has_differences)
    }

    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} vs {}: {}/{} compared repositories differ",
            self.branch1,
            self.branch2,
            self.differing().count(),
            self.entries.len()
        );
        if !self.unavailable.is_empty() {
            line.push_str(&format!(", {} unavailable", self.unavailable.len()));
        }
        line
    }
}

pub struct ManifestComparator {
    gateway: Arc<dyn RepoGateway>,
    registry: FleetRegistry,
}

impl ManifestComparator {
    pub fn new(gateway: Arc<dyn RepoGateway>, registry: FleetRegistry) -> Self {
        Self { gateway, registry }
    }

    fn manifest_path(&self) -> &str {
        &self.registry.config().config_files.manifest
    }

    /// Fetch and parse the manifest; `None` when it is missing, unreachable
    /// or malformed.
    pub async fn fetch_manifest(&self, repository: &str, branch: &str) -> Option<ManifestSnapshot> {
        match self.try_fetch(repository, branch).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(repo = %repository, branch = %branch, error = %e, "manifest unavailable");
                None
            }
        }
    }

    /// Compare the manifest at `branch1` with the one at `branch2`.
    pub async fn compare(
        &self,
        repository: &str,
        branch1: &str,
        branch2: &str,
    ) -> Option<Comparison> {
        match self.try_compare(repository, branch1, branch2).await {
            Ok(comparison) => Some(comparison),
            Err(e) => {
                warn!(repo = %repository, branch1 = %branch1, branch2 = %branch2, error = %e, "comparison skipped");
                None
            }
        }
    }

    /// Compare every repository of the fleet.
    pub async fn compare_fleet(&self, branch1: &str, branch2: &str) -> FleetComparison {
        let services = self.registry.all_services();
        let report = FanOut::new(format!("compare {branch1}..{branch2}"))
            .run(&services, |svc| {
                self.try_compare(&svc.repository, branch1, branch2)
            })
            .await;
        FleetComparison::from_report(branch1, branch2, report)
    }

    /// Overwrite an existing manifest. The file must already exist on
    /// `branch`.
    pub async fn update_manifest(
        &self,
        repository: &str,
        branch: &str,
        content: &str,
        message: &str,
    ) -> bool {
        match self.try_update(repository, branch, content, message).await {
            Ok(()) => {
                info!(repo = %repository, branch = %branch, "updated manifest");
                true
            }
            Err(e) => {
                error!(repo = %repository, branch = %branch, error = %e, "failed to update manifest");
                false
            }
        }
    }

    async fn try_fetch(&self, repository: &str, branch: &str) -> Result<ManifestSnapshot> {
        let path = self.manifest_path();
        let file = self
            .gateway
            .file_content(repository, path, branch)
            .await?
            .ok_or_else(|| FleetError::FileMissing {
                repo: repository.to_string(),
                path: path.to_string(),
                branch: branch.to_string(),
            })?;
        ManifestSnapshot::parse(&file.content)
    }

    async fn try_compare(
        &self,
        repository: &str,
        branch1: &str,
        branch2: &str,
    ) -> Result<Comparison> {
        let before = self.try_fetch(repository, branch1).await?;
        let after = self.try_fetch(repository, branch2).await?;
        let comparison = Comparison::between(branch1, &before, branch2, &after);
        info!(
            repo = %repository,
            branch1 = %branch1,
            branch2 = %branch2,
            has_differences = comparison.has_differences,
            "compared manifests"
        );
        Ok(comparison)
    }

    async fn try_update(
        &self,
        repository: &str,
        branch: &str,
        content: &str,
        message: &str,
    ) -> Result<()> {
        let path = self.manifest_path();
        let current = self
            .gateway
            .file_content(repository, path, branch)
            .await?
            .ok_or_else(|| FleetError::FileMissing {
                repo: repository.to_string(),
                path: path.to_string(),
                branch: branch.to_string(),
            })?;
        self.gateway
            .update_file(FileWrite {
                repo: repository,
                path,
                content,
                branch,
                message,
                sha: Some(&current.sha),
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetConfig;
    use crate::fakes::MemoryGateway;

    const POM_V1: &str = r#"<project xmlns="http://maven.apache.org/POM/4.0.0">
        <properties><java.version>17</java.version></properties>
        <dependencies>
          <dependency><groupId>org.postgresql</groupId><artifactId>postgresql</artifactId><version>42.7.1</version></dependency>
          <dependency><groupId>com.h2database</groupId><artifactId>h2</artifactId><version>2.2.224</version></dependency>
        </dependencies>
    </project>"#;

    const POM_V2: &str = r#"<project xmlns="http://maven.apache.org/POM/4.0.0">
        <properties><java.version>21</java.version></properties>
        <dependencies>
          <dependency><groupId>com.h2database</groupId><artifactId>h2</artifactId><version>2.2.224</version></dependency>
          <dependency><groupId>org.postgresql</groupId><artifactId>postgresql</artifactId><version>42.7.3</version></dependency>
        </dependencies>
    </project>"#;

    fn comparator() -> (Arc<MemoryGateway>, ManifestComparator) {
        let raw = r#"{
            "organization": "acme",
            "branches": { "base_branch": "develop", "compare_branch": "main" },
            "service_groups": { "core": { "folder": "f", "services": ["a", "b", "c"] } },
            "config_files": { "application": "app.yml" },
            "workflow": { "workflow_file": "ci.yml" }
        }"#;
        let registry = FleetRegistry::from_config(FleetConfig::from_json_str(raw).unwrap()).unwrap();
        let gw = Arc::new(MemoryGateway::new());
        (gw.clone(), ManifestComparator::new(gw, registry))
    }

    #[tokio::test]
    async fn test_same_branch_has_no_differences() {
        let (gw, cmp) = comparator();
        gw.put_file("acme/a", "develop", "pom.xml", POM_V1);
        let comparison = cmp.compare("acme/a", "develop", "develop").await.unwrap();
        assert!(!comparison.has_differences);
        assert_eq!(comparison.branch1_deps_count, 2);
        assert_eq!(comparison.branch2_deps_count, 2);
    }

    #[tokio::test]
    async fn test_version_bump_is_reported() {
        let (gw, cmp) = comparator();
        gw.put_file("acme/a", "develop", "pom.xml", POM_V1);
        gw.put_file("acme/a", "main", "pom.xml", POM_V2);
        let comparison = cmp.compare("acme/a", "develop", "main").await.unwrap();
        assert!(comparison.has_differences);
        assert_eq!(comparison.diff.version_changes.len(), 1);
        assert_eq!(comparison.diff.version_changes[0].from, "42.7.1");
        assert_eq!(comparison.diff.properties_changed["java.version"].to, "21");
    }

    #[tokio::test]
    async fn test_missing_or_malformed_manifest_is_absent() {
        let (gw, cmp) = comparator();
        gw.put_file("acme/a", "develop", "pom.xml", POM_V1);
        assert!(cmp.compare("acme/a", "develop", "main").await.is_none());

        gw.put_file("acme/a", "main", "pom.xml", "<project><dependencies>");
        assert!(cmp.fetch_manifest("acme/a", "main").await.is_none());
        assert!(cmp.compare("acme/a", "develop", "main").await.is_none());
    }

    #[tokio::test]
    async fn test_compare_fleet_lists_unavailable() {
        let (gw, cmp) = comparator();
        gw.put_file("acme/a", "develop", "pom.xml", POM_V1);
        gw.put_file("acme/a", "main", "pom.xml", POM_V2);
        gw.put_file("acme/c", "develop", "pom.xml", POM_V1);
        gw.put_file("acme/c", "main", "pom.xml", POM_V1);

        let fleet = cmp.compare_fleet("develop", "main").await;
        let repos: Vec<&str> = fleet.entries.iter().map(|e| e.repository.as_str()).collect();
        assert_eq!(repos, vec!["acme/a", "acme/c"]);
        assert_eq!(fleet.unavailable, vec!["acme/b".to_string()]);
        assert_eq!(fleet.differing().count(), 1);
        assert_eq!(
            fleet.summary(),
            "develop vs main: 1/2 compared repositories differ, 1 unavailable"
        );
    }

    #[tokio::test]
    async fn test_update_manifest_requires_existing_file() {
        let (gw, cmp) = comparator();
        gw.add_branch("acme/a", "develop");
        assert!(!cmp.update_manifest("acme/a", "develop", POM_V2, "bump").await);
        assert!(gw.file("acme/a", "develop", "pom.xml").is_none());

        gw.put_file("acme/a", "develop", "pom.xml", POM_V1);
        assert!(cmp.update_manifest("acme/a", "develop", POM_V2, "bump").await);
        assert_eq!(gw.file("acme/a", "develop", "pom.xml").as_deref(), Some(POM_V2));
    }
}
