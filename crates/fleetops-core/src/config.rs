//! Fleet configuration: topology, branches, file paths and workflow pacing.
//!
//! The configuration is a JSON document loaded once per process and shared
//! read-only afterwards. Group order in `service_groups` is significant: it
//! is the enumeration order every fan-out relies on, so groups are collected
//! with an order-preserving map visitor instead of a hash map.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use tracing::info;

use crate::error::{FleetError, Result};
use crate::registry::ServiceGroup;

/// Default location of the fleet configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/services_config.json";

/// Branch naming used across the fleet.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BranchSettings {
    /// Branch new work branches are cut from.
    #[serde(alias = "base")]
    pub base_branch: String,
    /// Branch manifests are compared against.
    #[serde(alias = "compare")]
    pub compare_branch: String,
    /// Prefix prepended to generated work-branch names.
    #[serde(alias = "prefix", default)]
    pub branch_prefix: String,
}

/// Repository-relative paths of the files the fleet tooling edits.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ConfigFiles {
    /// Application configuration replaced by connection templates.
    pub application: String,
    /// Build manifest compared across branches.
    #[serde(alias = "pom", default = "default_manifest_path")]
    pub manifest: String,
}

/// CI workflow identity and pacing.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WorkflowSettings {
    /// Workflow file name, e.g. `ci.yml`.
    pub workflow_file: String,
    #[serde(default = "default_dispatch_delay_secs")]
    pub dispatch_delay_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,
    /// Directory receiving run-log artifacts.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
}

impl WorkflowSettings {
    pub fn dispatch_delay(&self) -> Duration {
        Duration::from_secs(self.dispatch_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }
}

/// Static fleet topology and settings.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Owning organization; repositories are `<organization>/<name>`.
    pub organization: String,
    pub branches: BranchSettings,
    /// Service groups in file order.
    #[serde(deserialize_with = "ordered_groups")]
    pub service_groups: Vec<ServiceGroup>,
    pub config_files: ConfigFiles,
    pub workflow: WorkflowSettings,
    /// Directory holding `<template>.yml` connection templates.
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,
}

fn default_manifest_path() -> String {
    "pom.xml".to_string()
}

fn default_dispatch_delay_secs() -> u64 {
    2
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_completion_timeout_secs() -> u64 {
    600
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs/workflows")
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("config/connection_templates")
}

impl FleetConfig {
    /// Read, parse and validate the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| FleetError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&raw)?;
        info!(
            path = %path.display(),
            organization = %config.organization,
            groups = config.service_groups.len(),
            "loaded fleet config"
        );
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: FleetConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let org = self.organization.trim();
        if org.is_empty() || org.contains('/') {
            return Err(FleetError::InvalidConfig(format!(
                "organization must be a non-empty name without '/', got '{}'",
                self.organization
            )));
        }
        if self.branches.base_branch.trim().is_empty() {
            return Err(FleetError::InvalidConfig(
                "branches.base_branch must not be empty".to_string(),
            ));
        }
        if self.workflow.workflow_file.trim().is_empty() {
            return Err(FleetError::InvalidConfig(
                "workflow.workflow_file must not be empty".to_string(),
            ));
        }
        if self.workflow.poll_interval_secs == 0 {
            return Err(FleetError::InvalidConfig(
                "workflow.poll_interval_secs must be positive".to_string(),
            ));
        }

        let name_pattern = repo_name_pattern();
        let mut seen: Vec<(&str, &str)> = Vec::new();
        for group in &self.service_groups {
            for service in &group.services {
                if !name_pattern.is_match(service) {
                    return Err(FleetError::InvalidConfig(format!(
                        "invalid repository name '{service}' in group '{}'",
                        group.name
                    )));
                }
                if let Some((_, owner)) = seen.iter().find(|(name, _)| *name == service) {
                    return Err(FleetError::InvalidConfig(format!(
                        "repository '{service}' listed in both '{owner}' and '{}'",
                        group.name
                    )));
                }
                seen.push((service.as_str(), group.name.as_str()));
            }
        }
        Ok(())
    }

    /// Work-branch name for `suffix` under the configured prefix.
    pub fn branch_name(&self, suffix: &str) -> String {
        format!("{}{}", self.branches.branch_prefix, suffix)
    }
}

fn repo_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("repository name pattern"))
}

#[derive(Deserialize)]
struct GroupSpec {
    folder: String,
    #[serde(default)]
    services: Vec<String>,
}

fn ordered_groups<'de, D>(deserializer: D) -> std::result::Result<Vec<ServiceGroup>, D::Error>
where
    D: Deserializer<'de>,
{
    struct GroupsVisitor;

    impl<'de> Visitor<'de> for GroupsVisitor {
        type Value = Vec<ServiceGroup>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of group name to {folder, services}")
        }

        fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut groups: Vec<ServiceGroup> = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((name, spec)) = map.next_entry::<String, GroupSpec>()? {
                if groups.iter().any(|g| g.name == name) {
                    return Err(de::Error::custom(format!(
                        "duplicate service group '{name}'"
                    )));
                }
                groups.push(ServiceGroup {
                    name,
                    folder: spec.folder,
                    services: spec.services,
                });
            }
            Ok(groups)
        }
    }

    deserializer.deserialize_map(GroupsVisitor)
}
