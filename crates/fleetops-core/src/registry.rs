//! Fleet registry: service groups and the flattened repository view.
//!
//! Enumeration order is the load order of groups and, within a group, the
//! load order of repository names. Every fan-out result list follows it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::FleetConfig;
use crate::error::Result;

/// A named group of repositories sharing a local storage folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceGroup {
    pub name: String,
    pub folder: String,
    pub services: Vec<String>,
}

/// One repository of the fleet, as seen through its group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Service {
    /// Repository short name, e.g. `billing`.
    pub name: String,
    /// Owning group name.
    pub group: String,
    /// Owning group's folder label.
    pub folder: String,
    /// Fully-qualified `<organization>/<name>`.
    pub repository: String,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repository)
    }
}

/// Read-only view over the loaded fleet topology.
#[derive(Debug, Clone)]
pub struct FleetRegistry {
    config: Arc<FleetConfig>,
}

impl FleetRegistry {
    /// Load the registry from a configuration file. Failure is fatal for
    /// callers: there is no fleet without it.
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_config(FleetConfig::load(path)?)
    }

    pub fn from_config(config: FleetConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Shared handle to the configuration.
    pub fn shared_config(&self) -> Arc<FleetConfig> {
        Arc::clone(&self.config)
    }

    pub fn groups(&self) -> &[ServiceGroup] {
        &self.config.service_groups
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups().iter().map(|g| g.name.as_str()).collect()
    }

    /// Every service of every group, in registry order.
    pub fn all_services(&self) -> Vec<Service> {
        self.groups()
            .iter()
            .flat_map(|group| self.expand(group))
            .collect()
    }

    /// Services of `group_name`; an unknown group yields an empty list.
    pub fn services_in_group(&self, group_name: &str) -> Vec<Service> {
        match self.groups().iter().find(|g| g.name == group_name) {
            Some(group) => self.expand(group),
            None => {
                warn!(group = %group_name, "service group not found in config");
                Vec::new()
            }
        }
    }

    /// Look a service up by short name or fully-qualified repository.
    pub fn find_service(&self, name: &str) -> Option<Service> {
        self.all_services()
            .into_iter()
            .find(|s| s.name == name || s.repository == name)
    }

    /// Create one local folder per group under `base_dir`.
    pub fn prepare_workspace(&self, base_dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(base_dir)?;
        let mut created = Vec::with_capacity(self.groups().len());
        for group in self.groups() {
            let folder = base_dir.join(&group.folder);
            std::fs::create_dir_all(&folder)?;
            info!(folder = %folder.display(), group = %group.name, "prepared group folder");
            created.push(folder);
        }
        Ok(created)
    }

    fn expand(&self, group: &ServiceGroup) -> Vec<Service> {
        group
            .services
            .iter()
            .map(|name| Service {
                name: name.clone(),
                group: group.name.clone(),
                folder: group.folder.clone(),
                repository: format!("{}/{}", self.config.organization, name),
            })
            .collect()
    }
}
