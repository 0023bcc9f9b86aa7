//! Reference naming scheme.
//!
//! Workspace identity, type, and lifecycle phase are encoded into branch
//! names; release versions are encoded into tag names:
//!
//! ```text
//! <user prefix>/<owner>/<workspace>            user workspace
//! <group prefix>/<workspace>                   group workspace
//! <patch>/<version>/<prefix>/...               same, based on a patch release branch
//! <patch>/<version>                            patch release branch
//! <tag prefix><version>                        release tag
//! <temporary>/<uuid>                           temporary / integration branch
//! ```
//!
//! The six prefixes are keyed by (workspace type, access type). Parsing is the
//! exact inverse of building; names outside the scheme parse to `None`
//! because the branch namespace is shared with unrelated content.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{Config, RefsConfig};
use crate::error::{Error, Result};

const DELIMITER: char = '/';

/// Who owns a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceType {
    User,
    Group,
}

/// Lifecycle phase of a workspace branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceAccessType {
    Workspace,
    ConflictResolution,
    Backup,
}

impl WorkspaceAccessType {
    pub fn label(self) -> &'static str {
        match self {
            WorkspaceAccessType::Workspace => "workspace",
            WorkspaceAccessType::ConflictResolution => "conflict resolution workspace",
            WorkspaceAccessType::Backup => "backup workspace",
        }
    }
}

/// A `major.minor.patch` release version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionId {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl VersionId {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for VersionId {
    type Err = Error;

    /// Parses the canonical form only: three decimal parts, no leading zeros.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidArgument(format!("invalid version id: '{s}'"));
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(invalid());
        }
        let mut numbers = [0u32; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            let canonical = !part.is_empty()
                && part.chars().all(|c| c.is_ascii_digit())
                && (part.len() == 1 || !part.starts_with('0'));
            if !canonical {
                return Err(invalid());
            }
            *slot = part.parse().map_err(|_| invalid())?;
        }
        Ok(VersionId::new(numbers[0], numbers[1], numbers[2]))
    }
}

impl Serialize for VersionId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VersionId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Check a workspace or user id against the allowed character set.
///
/// Allowed: ASCII alphanumerics and `_`, `.`, `-`; no leading or trailing
/// `.`/`-`; no `..`.
pub fn validate_workspace_id(id: &str) -> Result<()> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "invalid id '{id}': use letters, digits, '_', '.', '-' without leading or trailing '.'/'-' or '..'"
        )))
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        && !id.starts_with(['.', '-'])
        && !id.ends_with(['.', '-'])
        && !id.contains("..")
}

/// Identifies exactly one workspace branch.
///
/// Only constructible through validating constructors, so a spec always
/// encodes to a branch name that parses back to itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct WorkspaceSpec {
    workspace_id: String,
    workspace_type: WorkspaceType,
    access_type: WorkspaceAccessType,
    #[serde(skip_serializing_if = "Option::is_none")]
    owner_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    patch_version: Option<VersionId>,
}

impl WorkspaceSpec {
    /// A user-owned workspace.
    pub fn user(workspace_id: impl Into<String>, owner_user_id: impl Into<String>) -> Result<Self> {
        let workspace_id = workspace_id.into();
        let owner_user_id = owner_user_id.into();
        validate_workspace_id(&workspace_id)?;
        validate_workspace_id(&owner_user_id)?;
        Ok(Self {
            workspace_id,
            workspace_type: WorkspaceType::User,
            access_type: WorkspaceAccessType::Workspace,
            owner_user_id: Some(owner_user_id),
            patch_version: None,
        })
    }

    /// A group workspace, shared by every project member.
    pub fn group(workspace_id: impl Into<String>) -> Result<Self> {
        let workspace_id = workspace_id.into();
        validate_workspace_id(&workspace_id)?;
        Ok(Self {
            workspace_id,
            workspace_type: WorkspaceType::Group,
            access_type: WorkspaceAccessType::Workspace,
            owner_user_id: None,
            patch_version: None,
        })
    }

    /// Base this workspace on the patch release branch of `version`.
    pub fn with_patch_version(mut self, version: VersionId) -> Self {
        self.patch_version = Some(version);
        self
    }

    /// The same workspace in another lifecycle phase.
    pub fn with_access_type(&self, access_type: WorkspaceAccessType) -> Self {
        Self {
            access_type,
            ..self.clone()
        }
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn workspace_type(&self) -> WorkspaceType {
        self.workspace_type
    }

    pub fn access_type(&self) -> WorkspaceAccessType {
        self.access_type
    }

    pub fn owner_user_id(&self) -> Option<&str> {
        self.owner_user_id.as_deref()
    }

    pub fn patch_version(&self) -> Option<VersionId> {
        self.patch_version
    }

    /// Human-readable subject used in error messages.
    pub fn describe(&self) -> String {
        let mut out = match &self.owner_user_id {
            Some(owner) => format!("{} '{}' of user '{owner}'", self.access_type.label(), self.workspace_id),
            None => format!("group {} '{}'", self.access_type.label(), self.workspace_id),
        };
        if let Some(version) = self.patch_version {
            out.push_str(&format!(" (patch {version})"));
        }
        out
    }
}

/// Builds and parses reference names from an immutable set of tokens.
#[derive(Debug, Clone)]
pub struct ReferenceScheme {
    tokens: RefsConfig,
    mainline: String,
}

impl ReferenceScheme {
    pub fn new(config: &Config) -> Self {
        Self {
            tokens: config.refs.clone(),
            mainline: config.mainline.clone(),
        }
    }

    pub fn mainline(&self) -> &str {
        &self.mainline
    }

    fn prefix(&self, workspace_type: WorkspaceType, access_type: WorkspaceAccessType) -> &str {
        let t = &self.tokens;
        match (workspace_type, access_type) {
            (WorkspaceType::User, WorkspaceAccessType::Workspace) => &t.user_workspace,
            (WorkspaceType::Group, WorkspaceAccessType::Workspace) => &t.group_workspace,
            (WorkspaceType::User, WorkspaceAccessType::ConflictResolution) => {
                &t.user_conflict_resolution
            }
            (WorkspaceType::Group, WorkspaceAccessType::ConflictResolution) => {
                &t.group_conflict_resolution
            }
            (WorkspaceType::User, WorkspaceAccessType::Backup) => &t.user_backup,
            (WorkspaceType::Group, WorkspaceAccessType::Backup) => &t.group_backup,
        }
    }

    fn classify_prefix(&self, token: &str) -> Option<(WorkspaceType, WorkspaceAccessType)> {
        const KINDS: [(WorkspaceType, WorkspaceAccessType); 6] = [
            (WorkspaceType::User, WorkspaceAccessType::Workspace),
            (WorkspaceType::Group, WorkspaceAccessType::Workspace),
            (WorkspaceType::User, WorkspaceAccessType::ConflictResolution),
            (WorkspaceType::Group, WorkspaceAccessType::ConflictResolution),
            (WorkspaceType::User, WorkspaceAccessType::Backup),
            (WorkspaceType::Group, WorkspaceAccessType::Backup),
        ];
        KINDS
            .into_iter()
            .find(|(wt, at)| self.prefix(*wt, *at) == token)
    }

    /// Branch name of a workspace.
    pub fn branch_name(&self, spec: &WorkspaceSpec) -> String {
        let mut name = self.namespace(spec.workspace_type, spec.access_type, spec.patch_version);
        if let Some(owner) = &spec.owner_user_id {
            name.push_str(owner);
            name.push(DELIMITER);
        }
        name.push_str(&spec.workspace_id);
        name
    }

    /// Common prefix (with trailing delimiter) of every branch of one kind.
    pub fn namespace(
        &self,
        workspace_type: WorkspaceType,
        access_type: WorkspaceAccessType,
        patch_version: Option<VersionId>,
    ) -> String {
        let prefix = self.prefix(workspace_type, access_type);
        match patch_version {
            Some(version) => format!(
                "{patch}{DELIMITER}{version}{DELIMITER}{prefix}{DELIMITER}",
                patch = self.tokens.patch
            ),
            None => format!("{prefix}{DELIMITER}"),
        }
    }

    /// Inverse of [`branch_name`](Self::branch_name).
    pub fn parse_branch_name(&self, name: &str) -> Option<WorkspaceSpec> {
        let segments: Vec<&str> = name.split(DELIMITER).collect();
        let (patch_version, rest) = match segments.as_slice() {
            [patch, version, rest @ ..] if *patch == self.tokens.patch => {
                (Some(parse_canonical_version(version)?), rest)
            }
            all => (None, all),
        };

        let (first, tail) = rest.split_first()?;
        let (workspace_type, access_type) = self.classify_prefix(first)?;
        let (owner_user_id, workspace_id) = match (workspace_type, tail) {
            (WorkspaceType::User, [owner, id]) => (Some(owner.to_string()), id.to_string()),
            (WorkspaceType::Group, [id]) => (None, id.to_string()),
            _ => return None,
        };

        if !is_valid_id(&workspace_id) || !owner_user_id.as_deref().map_or(true, is_valid_id) {
            return None;
        }

        Some(WorkspaceSpec {
            workspace_id,
            workspace_type,
            access_type,
            owner_user_id,
            patch_version,
        })
    }

    /// Release branch that patch workspaces of `version` are based on.
    pub fn patch_branch_name(&self, version: VersionId) -> String {
        format!("{}{DELIMITER}{version}", self.tokens.patch)
    }

    /// Branch a workspace is created from and kept current against.
    pub fn source_branch(&self, spec: &WorkspaceSpec) -> String {
        match spec.patch_version {
            Some(version) => self.patch_branch_name(version),
            None => self.mainline.clone(),
        }
    }

    pub fn version_tag_name(&self, version: VersionId) -> String {
        format!("{}{version}", self.tokens.version_tag_prefix)
    }

    pub fn parse_version_tag_name(&self, name: &str) -> Option<VersionId> {
        name.strip_prefix(self.tokens.version_tag_prefix.as_str())
            .and_then(parse_canonical_version)
    }

    pub fn is_version_tag_name(&self, name: &str) -> bool {
        self.parse_version_tag_name(name).is_some()
    }

    /// A fresh, unique temporary branch name.
    pub fn temporary_branch_name(&self) -> String {
        format!("{}{DELIMITER}{}", self.tokens.temporary, Uuid::new_v4().simple())
    }

    pub fn is_temporary_branch(&self, name: &str) -> bool {
        name.strip_prefix(self.tokens.temporary.as_str())
            .is_some_and(|rest| rest.starts_with(DELIMITER))
    }
}

fn parse_canonical_version(raw: &str) -> Option<VersionId> {
    raw.parse().ok()
}
