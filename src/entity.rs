//! Entity diff projection.
//!
//! Turns a file-level diff between two revisions into entity-level change
//! records. Which files hold entities, and under which logical path, is
//! decided by a [`ProjectStructure`] read from the project configuration
//! file at each side of the comparison.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::paths;
use crate::revision::{resolve_revision, RefSource, RevisionRef};
use crate::service::DiffEntry;

/// Separator between the segments of a logical entity path.
pub const ENTITY_PACKAGE_SEPARATOR: &str = "::";

/// Maps repository file paths to logical entity paths.
pub trait ProjectStructure: Send + Sync {
    /// Logical entity path of `file_path`, or `None` for non-entity files.
    fn entity_path(&self, file_path: &str) -> Option<String>;
}

/// A directory holding entity files with a given extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDirectory {
    pub directory: String,
    pub extension: String,
}

/// The project configuration file stored at the repository root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfiguration {
    #[serde(default)]
    pub project_structure_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
    #[serde(default = "default_source_directories")]
    pub source_directories: Vec<SourceDirectory>,
}

fn default_source_directories() -> Vec<SourceDirectory> {
    vec![SourceDirectory {
        directory: "entities".to_string(),
        extension: ".json".to_string(),
    }]
}

impl Default for ProjectConfiguration {
    fn default() -> Self {
        Self {
            project_structure_version: 0,
            group_id: None,
            artifact_id: None,
            source_directories: default_source_directories(),
        }
    }
}

impl ProjectConfiguration {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn layout(&self) -> SourceLayout {
        SourceLayout::new(self.source_directories.clone())
    }
}

/// Project structure driven by a list of source directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLayout {
    directories: Vec<SourceDirectory>,
}

impl SourceLayout {
    pub fn new(directories: Vec<SourceDirectory>) -> Self {
        Self { directories }
    }
}

impl Default for SourceLayout {
    fn default() -> Self {
        Self::new(default_source_directories())
    }
}

impl ProjectStructure for SourceLayout {
    fn entity_path(&self, file_path: &str) -> Option<String> {
        let file_path = paths::canonicalize(file_path)?;
        self.directories.iter().find_map(|source| {
            let relative = paths::strip_directory(&file_path, &source.directory)?;
            let stem = relative.strip_suffix(source.extension.as_str())?;
            if stem.is_empty() || stem.ends_with('/') {
                return None;
            }
            Some(stem.replace('/', ENTITY_PACKAGE_SEPARATOR))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityChangeType {
    Create,
    Modify,
    Delete,
    Rename,
}

/// One entity-level change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityDiff {
    pub change_type: EntityChangeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_entity_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_entity_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityProjection {
    pub entity_diffs: Vec<EntityDiff>,
    pub project_configuration_updated: bool,
}

/// Project `entries` onto entities.
///
/// `from` interprets old paths and `to` interprets new paths. Entries that
/// touch `config_path` only set `project_configuration_updated`.
pub fn project_entity_diffs(
    entries: &[DiffEntry],
    config_path: &str,
    from: &dyn ProjectStructure,
    to: &dyn ProjectStructure,
) -> EntityProjection {
    let config_path = paths::canonicalize(config_path);
    let mut projection = EntityProjection::default();

    for entry in entries {
        let old_path = paths::canonicalize(&entry.old_path);
        let new_path = paths::canonicalize(&entry.new_path);
        if config_path.is_some() && (old_path == config_path || new_path == config_path) {
            projection.project_configuration_updated = true;
            continue;
        }

        let old_entity = old_path.as_deref().and_then(|path| from.entity_path(path));
        let new_entity = new_path.as_deref().and_then(|path| to.entity_path(path));
        if old_entity.is_none() && new_entity.is_none() {
            continue;
        }

        let change_type = if entry.new_file {
            EntityChangeType::Create
        } else if entry.deleted_file {
            EntityChangeType::Delete
        } else if entry.renamed_file {
            EntityChangeType::Rename
        } else {
            EntityChangeType::Modify
        };
        projection.entity_diffs.push(EntityDiff {
            change_type,
            old_entity_path: if entry.new_file { None } else { old_entity },
            new_entity_path: if entry.deleted_file { None } else { new_entity },
        });
    }
    projection
}

/// Entity-level comparison of two revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comparison {
    pub from_revision_id: String,
    pub to_revision_id: String,
    pub entity_diffs: Vec<EntityDiff>,
    pub project_configuration_updated: bool,
}

impl Engine {
    /// Compare two revisions of `source`, given as aliases or explicit ids.
    pub async fn compute_comparison(
        &self,
        source: RefSource,
        from: &RevisionRef,
        to: &RevisionRef,
    ) -> Result<Comparison> {
        let subject = source.describe();
        let context = self.revision_context(source);
        let missing = |which: &RevisionRef| {
            Error::Internal(format!("{subject} has no revisions to resolve {which} against"))
        };
        let from_id = resolve_revision(from, &context)
            .await?
            .ok_or_else(|| missing(from))?;
        let to_id = resolve_revision(to, &context)
            .await?
            .ok_or_else(|| missing(to))?;
        self.compare_revisions(&from_id, &to_id).await
    }

    /// Compare two explicit revisions.
    pub async fn compare_revisions(&self, from_revision: &str, to_revision: &str) -> Result<Comparison> {
        let service = self.service();
        let entries = self
            .call("diff revisions", || service.diff(from_revision, to_revision))
            .await?;
        let from_structure = self.project_structure_at(from_revision).await?;
        let to_structure = self.project_structure_at(to_revision).await?;
        let projection = project_entity_diffs(
            &entries,
            &self.config().project_config_path,
            &from_structure,
            &to_structure,
        );
        debug!(
            from = from_revision,
            to = to_revision,
            files = entries.len(),
            entities = projection.entity_diffs.len(),
            "computed comparison"
        );
        Ok(Comparison {
            from_revision_id: from_revision.to_string(),
            to_revision_id: to_revision.to_string(),
            entity_diffs: projection.entity_diffs,
            project_configuration_updated: projection.project_configuration_updated,
        })
    }

    /// Source layout at `revision`; the default layout when the project
    /// configuration file is absent.
    pub async fn project_structure_at(&self, revision: &str) -> Result<SourceLayout> {
        let service = self.service();
        let path = &self.config().project_config_path;
        let raw = self
            .call("read project configuration", || service.get_file(revision, path))
            .await?;
        match raw {
            Some(bytes) => Ok(ProjectConfiguration::from_json(&bytes)?.layout()),
            None => Ok(SourceLayout::default()),
        }
    }
}
