//! Database-connection templates.
//!
//! The supported templates form a closed set; each key maps to
//! `<templates_dir>/<key>.yml`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{FleetError, Result};

/// A supported connection configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKey {
    Postgres,
    Mysql,
    Oracle,
    Sqlserver,
    H2,
}

impl TemplateKey {
    pub const ALL: [TemplateKey; 5] = [
        TemplateKey::Postgres,
        TemplateKey::Mysql,
        TemplateKey::Oracle,
        TemplateKey::Sqlserver,
        TemplateKey::H2,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TemplateKey::Postgres => "postgres",
            TemplateKey::Mysql => "mysql",
            TemplateKey::Oracle => "oracle",
            TemplateKey::Sqlserver => "sqlserver",
            TemplateKey::H2 => "h2",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.yml", self.as_str())
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        TemplateKey::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = TemplateKey::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown template '{s}', expected one of: {}", known.join(", "))
            })
    }
}

/// Template files on disk.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: TemplateKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Read the template content for `key`.
    pub async fn load(&self, key: TemplateKey) -> Result<String> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                info!(template = %key, path = %path.display(), "loaded template");
                Ok(content)
            }
            Err(source) => {
                error!(template = %key, path = %path.display(), error = %source, "failed to load template");
                Err(FleetError::Template {
                    key: key.to_string(),
                    path,
                    source,
                })
            }
        }
    }

    /// Keys whose template file exists.
    pub fn available(&self) -> Vec<TemplateKey> {
        TemplateKey::ALL
            .into_iter()
            .filter(|k| self.path_for(*k).is_file())
            .collect()
    }
}
