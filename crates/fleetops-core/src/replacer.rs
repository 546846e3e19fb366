//! Connection-configuration replacement.
//!
//! Pushes a [`TemplateKey`]'s content into each repository's application
//! config file. Writes carry the blob SHA read just before, so a concurrent
//! foreign commit makes the write fail instead of being overwritten.

use std::sync::Arc;

use tracing::{error, info};

use crate::coordinator::{FanOut, FanOutReport};
use crate::error::Result;
use crate::gateway::{FileWrite, RepoGateway};
use crate::registry::{FleetRegistry, Service};
use crate::templates::{TemplateKey, TemplateStore};

pub struct ConfigReplacer {
    gateway: Arc<dyn RepoGateway>,
    registry: FleetRegistry,
    templates: TemplateStore,
}

impl ConfigReplacer {
    pub fn new(
        gateway: Arc<dyn RepoGateway>,
        registry: FleetRegistry,
        templates: TemplateStore,
    ) -> Self {
        Self {
            gateway,
            registry,
            templates,
        }
    }

    /// Replacer reading templates from the configured directory.
    pub fn from_registry(gateway: Arc<dyn RepoGateway>, registry: FleetRegistry) -> Self {
        let templates = TemplateStore::new(registry.config().templates_dir.clone());
        Self::new(gateway, registry, templates)
    }

    pub fn commit_message(key: TemplateKey, branch: &str) -> String {
        format!("Update configuration to {key} on {branch}")
    }

    /// Apply `key` to one repository. Failures are logged and reported as
    /// `false`; nothing is written unless the template loaded.
    pub async fn apply_to_service(&self, service: &Service, branch: &str, key: TemplateKey) -> bool {
        match self.try_apply(service, branch, key).await {
            Ok(()) => true,
            Err(e) => {
                error!(repo = %service.repository, branch = %branch, template = %key, error = %e, "failed to apply config");
                false
            }
        }
    }

    /// Apply `key` to every repository of `group_name`, in group order.
    pub async fn apply_to_group(
        &self,
        group_name: &str,
        branch: &str,
        key: TemplateKey,
    ) -> FanOutReport<()> {
        let services = self.registry.services_in_group(group_name);
        self.apply_to(&services, branch, key).await
    }

    /// Apply `key` to the whole fleet.
    pub async fn apply_to_fleet(&self, branch: &str, key: TemplateKey) -> FanOutReport<()> {
        let services = self.registry.all_services();
        self.apply_to(&services, branch, key).await
    }

    /// Apply `key` to an explicit service list.
    pub async fn apply_to(
        &self,
        services: &[Service],
        branch: &str,
        key: TemplateKey,
    ) -> FanOutReport<()> {
        FanOut::new(format!("apply {key} config"))
            .run(services, |svc| self.try_apply(svc, branch, key))
            .await
    }

    async fn try_apply(&self, service: &Service, branch: &str, key: TemplateKey) -> Result<()> {
        info!(repo = %service.repository, branch = %branch, template = %key, "applying config");
        let content = self.templates.load(key).await?;
        let path = &self.registry.config().config_files.application;

        let current = self
            .gateway
            .file_content(&service.repository, path, branch)
            .await?;
        if current.is_none() {
            info!(repo = %service.repository, path = %path, "config file absent, creating it");
        }

        let message = Self::commit_message(key, branch);
        self.gateway
            .update_file(FileWrite {
                repo: &service.repository,
                path,
                content: &content,
                branch,
                message: &message,
                sha: current.as_ref().map(|f| f.sha.as_str()),
            })
            .await?;
        info!(repo = %service.repository, branch = %branch, template = %key, "applied config");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetConfig;
    use crate::fakes::{MemoryGateway, CONCURRENT_EDIT_MARKER};

    const APP: &str = "src/main/resources/application.yml";

    fn registry(templates_dir: &std::path::Path) -> FleetRegistry {
        let raw = format!(
            r#"{{
                "organization": "acme",
                "branches": {{ "base_branch": "develop", "compare_branch": "main" }},
                "service_groups": {{ "core": {{ "folder": "f", "services": ["a", "b"] }} }},
                "config_files": {{ "application": "{APP}" }},
                "workflow": {{ "workflow_file": "ci.yml" }},
                "templates_dir": "{}"
            }}"#,
            templates_dir.display()
        );
        FleetRegistry::from_config(FleetConfig::from_json_str(&raw).unwrap()).unwrap()
    }

    fn setup() -> (tempfile::TempDir, Arc<MemoryGateway>, ConfigReplacer) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("postgres.yml"), "db: postgres\n").unwrap();
        let gw = Arc::new(MemoryGateway::new());
        let replacer = ConfigReplacer::from_registry(gw.clone(), registry(dir.path()));
        (dir, gw, replacer)
    }

    fn service(name: &str) -> Service {
        Service {
            name: name.to_string(),
            group: "core".to_string(),
            folder: "f".to_string(),
            repository: format!("acme/{name}"),
        }
    }

    #[tokio::test]
    async fn test_apply_updates_existing_file() {
        let (_dir, gw, replacer) = setup();
        gw.put_file("acme/a", "feature", APP, "db: h2\n");
        assert!(replacer
            .apply_to_service(&service("a"), "feature", TemplateKey::Postgres)
            .await);
        assert_eq!(gw.file("acme/a", "feature", APP).as_deref(), Some("db: postgres\n"));
    }

    #[tokio::test]
    async fn test_apply_creates_absent_file() {
        let (_dir, gw, replacer) = setup();
        gw.add_branch("acme/a", "feature");
        assert!(replacer
            .apply_to_service(&service("a"), "feature", TemplateKey::Postgres)
            .await);
        assert_eq!(gw.file("acme/a", "feature", APP).as_deref(), Some("db: postgres\n"));
    }

    #[tokio::test]
    async fn test_missing_template_writes_nothing() {
        let (_dir, gw, replacer) = setup();
        gw.put_file("acme/a", "feature", APP, "db: h2\n");
        assert!(!replacer
            .apply_to_service(&service("a"), "feature", TemplateKey::Oracle)
            .await);
        assert_eq!(gw.file("acme/a", "feature", APP).as_deref(), Some("db: h2\n"));
        assert!(gw.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stale_token_is_rejected_without_write() {
        let (_dir, gw, replacer) = setup();
        gw.put_file("acme/a", "feature", APP, "db: h2\n");
        gw.edit_concurrently("acme/a", APP);

        assert!(!replacer
            .apply_to_service(&service("a"), "feature", TemplateKey::Postgres)
            .await);
        let content = gw.file("acme/a", "feature", APP).unwrap();
        assert!(content.ends_with(CONCURRENT_EDIT_MARKER));
        assert!(!content.contains("postgres"));
        assert!(gw.calls().is_empty());
    }

    #[tokio::test]
    async fn test_group_fan_out_continues_after_failure() {
        let (_dir, gw, replacer) = setup();
        gw.fail_repo("acme/a");
        gw.put_file("acme/b", "feature", APP, "db: h2\n");

        let report = replacer
            .apply_to_group("core", "feature", TemplateKey::Postgres)
            .await;
        assert_eq!(report.total(), 2);
        assert!(!report.results[0].success);
        assert!(report.results[1].success);
        assert_eq!(report.summary(), "apply postgres config: 1/2 succeeded");
    }

    #[tokio::test]
    async fn test_unknown_group_yields_empty_report() {
        let (_dir, _gw, replacer) = setup();
        let report = replacer
            .apply_to_group("ghost", "feature", TemplateKey::Postgres)
            .await;
        assert_eq!(report.total(), 0);
    }

    #[test]
    fn test_commit_message() {
        assert_eq!(
            ConfigReplacer::commit_message(TemplateKey::Mysql, "feature/db"),
            "Update configuration to mysql on feature/db"
        );
    }
}
