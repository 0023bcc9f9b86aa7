//! Workspace lifecycle and branch replacement.
//!
//! A workspace is a branch named by the reference scheme. Its derived
//! conflict-resolution and backup branches share the workspace id and are
//! removed together with it.

use serde::Serialize;
use tracing::{error, info};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::refs::{VersionId, WorkspaceAccessType, WorkspaceSpec, WorkspaceType};

/// A workspace branch and the revision at its tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Workspace {
    pub spec: WorkspaceSpec,
    pub branch: String,
    pub revision_id: String,
}

/// Filter for [`Engine::list_workspaces`].
#[derive(Debug, Clone)]
pub struct WorkspaceFilter {
    pub workspace_type: WorkspaceType,
    pub access_type: WorkspaceAccessType,
    /// Only workspaces of this user; ignored for group workspaces.
    pub owner_user_id: Option<String>,
    pub patch_version: Option<VersionId>,
}

impl WorkspaceFilter {
    pub fn new(workspace_type: WorkspaceType) -> Self {
        Self {
            workspace_type,
            access_type: WorkspaceAccessType::Workspace,
            owner_user_id: None,
            patch_version: None,
        }
    }
}

/// Lifecycle and update operations act on workspace branches only, never on
/// their derived conflict-resolution or backup branches.
pub(crate) fn require_workspace_access(spec: &WorkspaceSpec) -> Result<()> {
    if spec.access_type() == WorkspaceAccessType::Workspace {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "{} cannot be used directly",
            spec.describe()
        )))
    }
}

impl Engine {
    /// Create a workspace at the tip of its source branch.
    pub async fn create_workspace(&self, spec: &WorkspaceSpec) -> Result<Workspace> {
        require_workspace_access(spec)?;
        let branch = self.scheme().branch_name(spec);
        if self.branch_tip(&branch).await?.is_some() {
            return Err(Error::Conflict(format!("{} already exists", spec.describe())));
        }
        let source = self.scheme().source_branch(spec);
        let source_tip = self.require_branch_tip(&source).await?;

        let service = self.service();
        let created = self
            .call("create workspace", || service.create_branch(&branch, &source_tip))
            .await
            .map_err(|err| err.with_subject(&branch, &spec.describe()))?;
        info!(workspace = spec.workspace_id(), branch = %branch, revision = %created.tip, "created workspace");
        Ok(Workspace {
            spec: spec.clone(),
            branch,
            revision_id: created.tip,
        })
    }

    /// Look up a workspace (of any access type).
    pub async fn get_workspace(&self, spec: &WorkspaceSpec) -> Result<Option<Workspace>> {
        let branch = self.scheme().branch_name(spec);
        let tip = self
            .branch_tip(&branch)
            .await
            .map_err(|err| err.with_subject(&branch, &spec.describe()))?;
        Ok(tip.map(|revision_id| Workspace {
            spec: spec.clone(),
            branch,
            revision_id,
        }))
    }

    /// Like [`get_workspace`](Self::get_workspace), failing when absent.
    pub async fn require_workspace(&self, spec: &WorkspaceSpec) -> Result<Workspace> {
        self.get_workspace(spec)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{} does not exist", spec.describe())))
    }

    /// Workspaces matching `filter`. Branches outside the scheme are skipped.
    pub async fn list_workspaces(&self, filter: &WorkspaceFilter) -> Result<Vec<Workspace>> {
        let mut prefix = self.scheme().namespace(
            filter.workspace_type,
            filter.access_type,
            filter.patch_version,
        );
        if filter.workspace_type == WorkspaceType::User {
            if let Some(owner) = &filter.owner_user_id {
                prefix.push_str(owner);
                prefix.push('/');
            }
        }

        let service = self.service();
        let branches = self
            .call("list branches", || service.list_branches(&prefix))
            .await?;
        let workspaces = branches
            .into_iter()
            .filter_map(|branch| {
                let spec = self.scheme().parse_branch_name(&branch.name)?;
                let matches = spec.workspace_type() == filter.workspace_type
                    && spec.access_type() == filter.access_type
                    && spec.patch_version() == filter.patch_version;
                matches.then(|| Workspace {
                    spec,
                    branch: branch.name,
                    revision_id: branch.tip,
                })
            })
            .collect();
        Ok(workspaces)
    }

    /// Delete a workspace with its conflict-resolution and backup branches.
    ///
    /// Returns whether the workspace branch existed.
    pub async fn delete_workspace(&self, spec: &WorkspaceSpec) -> Result<bool> {
        require_workspace_access(spec)?;
        let service = self.service();
        let mut existed = false;
        for access in [
            WorkspaceAccessType::ConflictResolution,
            WorkspaceAccessType::Backup,
            WorkspaceAccessType::Workspace,
        ] {
            let branch = self.scheme().branch_name(&spec.with_access_type(access));
            let deleted = self
                .call("delete branch", || service.delete_branch(&branch))
                .await
                .map_err(|err| err.with_subject(&branch, &spec.describe()))?;
            if access == WorkspaceAccessType::Workspace {
                existed = deleted;
            }
        }
        info!(workspace = spec.workspace_id(), existed, "deleted workspace");
        Ok(existed)
    }

    /// Point a workspace at `new_tip`, guarded by a backup of `expected_tip`.
    ///
    /// The backup branch is refreshed at `expected_tip` before the workspace
    /// branch is deleted, and only removed once the recreated branch was
    /// verified. Fails with `Conflict` if the workspace moved away from
    /// `expected_tip`.
    pub async fn replace_workspace_tip(
        &self,
        spec: &WorkspaceSpec,
        expected_tip: &str,
        new_tip: &str,
    ) -> Result<String> {
        let branch = self.scheme().branch_name(spec);
        let backup = self
            .scheme()
            .branch_name(&spec.with_access_type(WorkspaceAccessType::Backup));
        let subject = spec.describe();
        let service = self.service();

        let replaced = async {
            self.ensure_tip(&branch, expected_tip).await?;
            self.call("delete stale backup", || service.delete_branch(&backup))
                .await?;
            self.call("create backup", || service.create_branch(&backup, expected_tip))
                .await?;

            self.ensure_tip(&branch, expected_tip).await?;
            self.call("delete workspace branch", || service.delete_branch(&branch))
                .await?;
            let recreated = self
                .call("recreate workspace branch", || {
                    service.create_branch(&branch, new_tip)
                })
                .await;
            if let Err(err) = recreated {
                error!(branch = %branch, backup = %backup, error = %err, "workspace replacement failed; backup kept");
                return Err(err);
            }

            match self.branch_tip(&branch).await? {
                Some(tip) if tip == new_tip => Ok::<_, Error>(tip),
                other => {
                    error!(branch = %branch, backup = %backup, found = ?other, "workspace replacement not visible; backup kept");
                    Err(Error::Internal(format!(
                        "{branch} does not point at {new_tip} after replacement"
                    )))
                }
            }
        };
        let tip = replaced
            .await
            .map_err(|err| err.with_subject(&branch, &subject))?;

        self.delete_branch_or_defer(&backup).await;
        info!(workspace = spec.workspace_id(), from = expected_tip, to = %tip, "replaced workspace tip");
        Ok(tip)
    }
}
