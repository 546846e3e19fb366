//! Maven build manifests: parsing and structural difference.
//!
//! A [`ManifestSnapshot`] keeps the dependency list of the first
//! `<dependencies>` element in document order and the children of the first
//! `<properties>` element. [`ManifestDiff`] compares two snapshots with
//! dependency lists treated as sets and property maps keyed by name, so
//! reordering or repeating entries never produces a difference.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

/// XML namespace of Maven POM 4.0.0 documents.
pub const POM_NAMESPACE: &str = "http://maven.apache.org/POM/4.0.0";

/// One `<dependency>`; missing coordinates are empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
}

impl Dependency {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
        }
    }

    fn same_artifact(&self, other: &Dependency) -> bool {
        self.group_id == other.group_id && self.artifact_id == other.artifact_id
    }
}

/// Parsed manifest at one branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSnapshot {
    pub dependencies: Vec<Dependency>,
    pub properties: BTreeMap<String, String>,
}

fn is_pom_element(node: &roxmltree::Node<'_, '_>, name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == name
        && matches!(node.tag_name().namespace(), None | Some(POM_NAMESPACE))
}

fn child_text(node: &roxmltree::Node<'_, '_>, name: &str) -> String {
    node.children()
        .find(|c| is_pom_element(c, name))
        .and_then(|c| c.text())
        .map(|t| t.trim().to_string())
        .unwrap_or_default()
}

impl ManifestSnapshot {
    /// Parse a POM document. Elements must be in the POM namespace or in
    /// no namespace at all.
    pub fn parse(xml: &str) -> Result<Self> {
        let doc =
            roxmltree::Document::parse(xml).map_err(|e| FleetError::Manifest(e.to_string()))?;
        let root = doc.root_element();
        if !is_pom_element(&root, "project") {
            return Err(FleetError::Manifest(format!(
                "root element is <{}>, expected <project>",
                root.tag_name().name()
            )));
        }

        let dependencies = root
            .descendants()
            .skip(1)
            .find(|n| is_pom_element(n, "dependencies"))
            .map(|deps| {
                deps.children()
                    .filter(|n| is_pom_element(n, "dependency"))
                    .map(|dep| Dependency {
                        group_id: child_text(&dep, "groupId"),
                        artifact_id: child_text(&dep, "artifactId"),
                        version: child_text(&dep, "version"),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let properties = root
            .descendants()
            .skip(1)
            .find(|n| is_pom_element(n, "properties"))
            .map(|props| {
                props
                    .children()
                    .filter(|n| n.is_element())
                    .map(|p| {
                        let value = p.text().map(|t| t.trim().to_string()).unwrap_or_default();
                        (p.tag_name().name().to_string(), value)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            dependencies,
            properties,
        })
    }

    /// Structural difference from `self` (before) to `other` (after).
    pub fn diff(&self, other: &ManifestSnapshot) -> ManifestDiff {
        let before: BTreeSet<&Dependency> = self.dependencies.iter().collect();
        let after: BTreeSet<&Dependency> = other.dependencies.iter().collect();

        let mut diff = ManifestDiff {
            dependencies_added: after.difference(&before).map(|d| (*d).clone()).collect(),
            dependencies_removed: before.difference(&after).map(|d| (*d).clone()).collect(),
            ..ManifestDiff::default()
        };

        let mut unmatched_added: Vec<&Dependency> = diff.dependencies_added.iter().collect();
        for removed in &diff.dependencies_removed {
            if let Some(pos) = unmatched_added.iter().position(|a| a.same_artifact(removed)) {
                let added = unmatched_added.remove(pos);
                diff.version_changes.push(VersionChange {
                    group_id: removed.group_id.clone(),
                    artifact_id: removed.artifact_id.clone(),
                    from: removed.version.clone(),
                    to: added.version.clone(),
                });
            }
        }

        for (name, before) in &self.properties {
            match other.properties.get(name) {
                None => {
                    diff.properties_removed.insert(name.clone(), before.clone());
                }
                Some(after) if after != before => {
                    diff.properties_changed.insert(
                        name.clone(),
                        PropertyChange {
                            from: before.clone(),
                            to: after.clone(),
                        },
                    );
                }
                Some(_) => {}
            }
        }
        for (name, after) in &other.properties {
            if !self.properties.contains_key(name) {
                diff.properties_added.insert(name.clone(), after.clone());
            }
        }
        diff
    }
}

/// A dependency whose coordinates stayed while its version moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionChange {
    pub group_id: String,
    pub artifact_id: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyChange {
    pub from: String,
    pub to: String,
}

/// Difference between two manifests.
///
/// `version_changes` pairs entries already listed in
/// `dependencies_removed`/`dependencies_added`; it adds no information of
/// its own to emptiness.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDiff {
    pub dependencies_added: Vec<Dependency>,
    pub dependencies_removed: Vec<Dependency>,
    pub version_changes: Vec<VersionChange>,
    pub properties_added: BTreeMap<String, String>,
    pub properties_removed: BTreeMap<String, String>,
    pub properties_changed: BTreeMap<String, PropertyChange>,
}

impl ManifestDiff {
    pub fn is_empty(&self) -> bool {
        self.dependencies_added.is_empty()
            && self.dependencies_removed.is_empty()
            && self.properties_added.is_empty()
            && self.properties_removed.is_empty()
            && self.properties_changed.is_empty()
    }
}
