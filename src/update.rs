//! Workspace update engine.
//!
//! Brings a workspace up to date with its source branch (mainline, or the
//! patch release branch for patch workspaces):
//!
//! 1. Already current: `NO_OP`.
//! 2. Rebase a throwaway copy of the workspace onto the source branch; on
//!    success adopt it: `UPDATED`.
//! 3. With enough commits past the merge base, squash them into one commit
//!    and rebase that instead; on success adopt it: `UPDATED`.
//! 4. Otherwise rebuild the conflict-resolution workspace from the source
//!    tip plus the workspace's net changes: `CONFLICT`.
//!
//! Every adoption goes through [`Engine::replace_workspace_tip`], which
//! keeps a backup until the replacement is verified.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::changeset::{Changeset, FileOperation};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::refs::{WorkspaceAccessType, WorkspaceSpec};
use crate::service::{CommitAction, DiffEntry, ProposalId, RebaseStatus};
use crate::temp_branch::TemporaryBranch;
use crate::workspace::{require_workspace_access, Workspace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceUpdateStatus {
    NoOp,
    Updated,
    Conflict,
}

/// Outcome of one update attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceUpdateReport {
    pub status: WorkspaceUpdateStatus,
    /// Merge base of the workspace and its source branch before the update.
    pub merge_base_revision_id: Option<String>,
    /// Workspace tip after the update (the squashed commit when the update
    /// squashed), or the conflict-resolution tip.
    pub resulting_revision_id: String,
}

/// Read-only view of how a workspace relates to its source branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceCurrency {
    pub workspace_revision_id: String,
    pub source_branch: String,
    pub source_revision_id: String,
    pub merge_base_revision_id: String,
    /// The source tip is already part of the workspace history.
    pub is_current: bool,
    pub conflict_resolution_pending: bool,
}

enum RebaseOutcome {
    Rebased(String),
    Conflicted(Vec<String>),
}

impl Engine {
    /// Report whether a workspace is behind its source branch without
    /// changing anything.
    pub async fn workspace_update_status(&self, spec: &WorkspaceSpec) -> Result<WorkspaceCurrency> {
        require_workspace_access(spec)?;
        let branch = self.scheme().branch_name(spec);
        let subject = spec.describe();
        let status = async {
            let source_branch = self.scheme().source_branch(spec);
            let workspace_tip = self.require_branch_tip(&branch).await?;
            let source_tip = self.require_branch_tip(&source_branch).await?;
            let is_current = self.is_current(&branch, &workspace_tip, &source_tip).await?;
            let merge_base = self.merge_base_of(&source_branch, &branch).await?;
            let resolution = self
                .scheme()
                .branch_name(&spec.with_access_type(WorkspaceAccessType::ConflictResolution));
            let conflict_resolution_pending = self.branch_tip(&resolution).await?.is_some();
            Ok::<_, Error>(WorkspaceCurrency {
                workspace_revision_id: workspace_tip,
                source_branch,
                source_revision_id: source_tip,
                merge_base_revision_id: merge_base,
                is_current,
                conflict_resolution_pending,
            })
        };
        status.await.map_err(|err| err.with_subject(&branch, &subject))
    }

    /// Bring a workspace up to date with its source branch.
    pub async fn update_workspace(&self, spec: &WorkspaceSpec) -> Result<WorkspaceUpdateReport> {
        require_workspace_access(spec)?;
        let branch = self.scheme().branch_name(spec);
        let subject = spec.describe();
        self.run_update(spec, &branch)
            .await
            .map_err(|err| err.with_subject(&branch, &subject))
    }

    async fn run_update(&self, spec: &WorkspaceSpec, branch: &str) -> Result<WorkspaceUpdateReport> {
        let source = self.scheme().source_branch(spec);
        let workspace_tip = self.require_branch_tip(branch).await?;
        let source_tip = self.require_branch_tip(&source).await?;

        if self.is_current(branch, &workspace_tip, &source_tip).await? {
            debug!(workspace = spec.workspace_id(), revision = %workspace_tip, "workspace is current");
            return Ok(WorkspaceUpdateReport {
                status: WorkspaceUpdateStatus::NoOp,
                merge_base_revision_id: Some(source_tip),
                resulting_revision_id: workspace_tip,
            });
        }

        let merge_base = self.merge_base_of(&source, branch).await?;
        let updated = |resulting_revision_id: String| WorkspaceUpdateReport {
            status: WorkspaceUpdateStatus::Updated,
            merge_base_revision_id: Some(merge_base.clone()),
            resulting_revision_id,
        };

        let integration = TemporaryBranch::create(self, &workspace_tip).await?;
        let direct = self.rebase_onto(integration.name(), &source).await?;
        match direct {
            RebaseOutcome::Rebased(rebased) => {
                let tip = self.replace_workspace_tip(spec, &workspace_tip, &rebased).await?;
                integration.close();
                info!(workspace = spec.workspace_id(), revision = %tip, "workspace rebased");
                return Ok(updated(tip));
            }
            RebaseOutcome::Conflicted(paths) => {
                integration.close();
                debug!(workspace = spec.workspace_id(), ?paths, "direct rebase conflicted");
            }
        }

        let service = self.service();
        let ahead = self
            .call("list workspace revisions", || {
                service.list_revisions(&workspace_tip, Some(&merge_base))
            })
            .await?
            .len();
        let threshold = self.config().update.squash_min_commits;
        if ahead >= threshold {
            if let Some(tip) = self
                .squash_and_rebase(spec, &source, &merge_base, &workspace_tip)
                .await?
            {
                info!(workspace = spec.workspace_id(), revision = %tip, commits = ahead, "workspace squashed and rebased");
                return Ok(updated(tip));
            }
        } else {
            debug!(workspace = spec.workspace_id(), commits = ahead, threshold, "too few commits to squash");
        }

        let resolution_tip = self
            .rebuild_conflict_resolution(spec, &source_tip, &merge_base, &workspace_tip)
            .await?;
        info!(workspace = spec.workspace_id(), revision = %resolution_tip, "workspace needs conflict resolution");
        Ok(WorkspaceUpdateReport {
            status: WorkspaceUpdateStatus::Conflict,
            merge_base_revision_id: Some(merge_base),
            resulting_revision_id: resolution_tip,
        })
    }

    /// Squash the workspace's changes since `merge_base` into one commit and
    /// rebase it onto `source`. The workspace adopts the rebased tip; the
    /// returned id is the squashed commit's. `None` if the squashed commit
    /// still conflicts.
    async fn squash_and_rebase(
        &self,
        spec: &WorkspaceSpec,
        source: &str,
        merge_base: &str,
        workspace_tip: &str,
    ) -> Result<Option<String>> {
        let service = self.service();
        let entries = self
            .call("diff workspace", || service.diff(merge_base, workspace_tip))
            .await?;
        let actions = self.squash_actions(&entries, workspace_tip).await?;
        if actions.is_empty() {
            debug!(workspace = spec.workspace_id(), "workspace has no net changes; squash skipped");
            return Ok(None);
        }

        let mut squashed = TemporaryBranch::create(self, merge_base).await?;
        let message = format!("Squash of {}", spec.describe());
        let name = squashed.name().to_string();
        let commit = self
            .call("commit squashed changes", || service.commit(&name, &message, &actions))
            .await?;
        squashed.set_tip(commit.id.clone());

        let outcome = self.rebase_onto(squashed.name(), source).await?;
        match outcome {
            RebaseOutcome::Rebased(rebased) => {
                let tip = self.replace_workspace_tip(spec, workspace_tip, &rebased).await?;
                squashed.close();
                debug!(workspace = spec.workspace_id(), squashed = %commit.id, revision = %tip, "adopted squashed rebase");
                Ok(Some(commit.id))
            }
            RebaseOutcome::Conflicted(paths) => {
                squashed.close();
                debug!(workspace = spec.workspace_id(), ?paths, "squashed rebase conflicted");
                Ok(None)
            }
        }
    }

    /// One action per diff entry; renames become a delete plus a create so
    /// the new path carries its real content.
    async fn squash_actions(&self, entries: &[DiffEntry], revision: &str) -> Result<Vec<CommitAction>> {
        let mut actions = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.deleted_file {
                actions.push(CommitAction::Delete {
                    path: entry.old_path.clone(),
                });
                continue;
            }
            let content = self.content_at(revision, &entry.new_path).await?;
            if entry.renamed_file {
                actions.push(CommitAction::Delete {
                    path: entry.old_path.clone(),
                });
            }
            let path = entry.new_path.clone();
            actions.push(if entry.new_file || entry.renamed_file {
                CommitAction::Create { path, content }
            } else {
                CommitAction::Update { path, content }
            });
        }
        Ok(actions)
    }

    /// Recreate the conflict-resolution branch at `source_tip` and replay the
    /// workspace's net changes onto it. Returns the branch tip.
    async fn rebuild_conflict_resolution(
        &self,
        spec: &WorkspaceSpec,
        source_tip: &str,
        merge_base: &str,
        workspace_tip: &str,
    ) -> Result<String> {
        let resolution = self
            .scheme()
            .branch_name(&spec.with_access_type(WorkspaceAccessType::ConflictResolution));
        let service = self.service();
        self.call("delete conflict resolution branch", || {
            service.delete_branch(&resolution)
        })
        .await?;
        self.call("create conflict resolution branch", || {
            service.create_branch(&resolution, source_tip)
        })
        .await?;

        let entries = self
            .call("diff workspace", || service.diff(merge_base, workspace_tip))
            .await?;

        // Last entry wins when several entries touch the same path.
        let mut desired: BTreeMap<String, Option<Vec<u8>>> = BTreeMap::new();
        for entry in &entries {
            if entry.deleted_file || entry.renamed_file {
                desired.insert(entry.old_path.clone(), None);
            }
            if !entry.deleted_file {
                let content = self.content_at(workspace_tip, &entry.new_path).await?;
                desired.insert(entry.new_path.clone(), Some(content));
            }
        }

        let mut operations = Vec::new();
        for (path, wanted) in desired {
            let current = self
                .call("read file", || service.get_file(source_tip, &path))
                .await?;
            match (current, wanted) {
                (None, None) => {}
                (Some(_), None) => operations.push(FileOperation::delete(path)),
                (None, Some(content)) => operations.push(FileOperation::add(path, content)),
                (Some(current), Some(content)) if current == content => {}
                (Some(_), Some(content)) => operations.push(FileOperation::modify(path, content)),
            }
        }

        if operations.is_empty() {
            debug!(branch = %resolution, "nothing to replay onto conflict resolution branch");
            return Ok(source_tip.to_string());
        }
        let changeset = Changeset::new(operations)?;
        let message = format!("Replay changes of {}", spec.describe());
        let revision = self
            .submit_changeset(&resolution, Some(source_tip), &changeset, &message)
            .await?;
        Ok(revision.id)
    }

    /// Replace a workspace with its conflict-resolution branch and remove
    /// that branch.
    pub async fn accept_conflict_resolution(&self, spec: &WorkspaceSpec) -> Result<Workspace> {
        require_workspace_access(spec)?;
        let branch = self.scheme().branch_name(spec);
        let resolution = self
            .scheme()
            .branch_name(&spec.with_access_type(WorkspaceAccessType::ConflictResolution));
        let subject = spec.describe();
        let accepted = async {
            let resolution_tip = self.require_conflict_resolution(spec, &resolution).await?;
            let workspace_tip = self.require_branch_tip(&branch).await?;
            let tip = self
                .replace_workspace_tip(spec, &workspace_tip, &resolution_tip)
                .await?;
            let service = self.service();
            self.call("delete conflict resolution branch", || {
                service.delete_branch(&resolution)
            })
            .await?;
            Ok::<_, Error>(tip)
        };
        let revision_id = accepted
            .await
            .map_err(|err| err.with_subject(&branch, &subject))?;
        info!(workspace = spec.workspace_id(), revision = %revision_id, "accepted conflict resolution");
        Ok(Workspace {
            spec: spec.clone(),
            branch,
            revision_id,
        })
    }

    /// Drop a conflict-resolution branch and reset the workspace to the tip
    /// of its source branch.
    pub async fn discard_conflict_resolution(&self, spec: &WorkspaceSpec) -> Result<Workspace> {
        require_workspace_access(spec)?;
        let branch = self.scheme().branch_name(spec);
        let resolution = self
            .scheme()
            .branch_name(&spec.with_access_type(WorkspaceAccessType::ConflictResolution));
        let subject = spec.describe();
        let discarded = async {
            self.require_conflict_resolution(spec, &resolution).await?;
            let service = self.service();
            self.call("delete conflict resolution branch", || {
                service.delete_branch(&resolution)
            })
            .await?;
            let source_tip = self
                .require_branch_tip(&self.scheme().source_branch(spec))
                .await?;
            let workspace_tip = self.require_branch_tip(&branch).await?;
            if workspace_tip == source_tip {
                return Ok::<_, Error>(workspace_tip);
            }
            self.replace_workspace_tip(spec, &workspace_tip, &source_tip)
                .await
        };
        let revision_id = discarded
            .await
            .map_err(|err| err.with_subject(&branch, &subject))?;
        info!(workspace = spec.workspace_id(), revision = %revision_id, "discarded conflict resolution");
        Ok(Workspace {
            spec: spec.clone(),
            branch,
            revision_id,
        })
    }

    async fn require_conflict_resolution(&self, spec: &WorkspaceSpec, resolution: &str) -> Result<String> {
        self.branch_tip(resolution).await?.ok_or_else(|| {
            Error::NotFound(format!(
                "{} does not exist",
                spec.with_access_type(WorkspaceAccessType::ConflictResolution)
                    .describe()
            ))
        })
    }

    /// The source tip is already part of the workspace history.
    async fn is_current(&self, branch: &str, workspace_tip: &str, source_tip: &str) -> Result<bool> {
        if workspace_tip == source_tip {
            return Ok(true);
        }
        let service = self.service();
        let containing = self
            .call("list commit refs", || service.list_commit_refs(source_tip))
            .await?;
        Ok(containing.iter().any(|name| name == branch))
    }

    async fn merge_base_of(&self, left: &str, right: &str) -> Result<String> {
        let service = self.service();
        let base = self
            .call("compute merge base", || service.merge_base(left, right))
            .await?;
        Ok(base.id)
    }

    async fn content_at(&self, revision: &str, path: &str) -> Result<Vec<u8>> {
        let service = self.service();
        self.call("read file", || service.get_file(revision, path))
            .await?
            .ok_or_else(|| Error::Internal(format!("{path} missing at revision {revision}")))
    }

    /// Rebase `branch` onto `target` through an integration proposal.
    ///
    /// The proposal is closed whatever the outcome.
    async fn rebase_onto(&self, branch: &str, target: &str) -> Result<RebaseOutcome> {
        let service = self.service();
        let proposal = self
            .call("open integration proposal", || {
                service.create_integration_proposal(branch, target)
            })
            .await?;
        let outcome = async {
            self.call("start rebase", || service.rebase(&proposal)).await?;
            self.poll_rebase(&proposal).await
        }
        .await;
        if let Err(err) = self
            .call("close integration proposal", || service.close_proposal(&proposal))
            .await
        {
            warn!(proposal = %proposal, error = %err, "failed to close integration proposal");
        }
        outcome
    }

    /// Wait for a rebase to finish, giving up after `rebase.timeout_ms`.
    async fn poll_rebase(&self, proposal: &ProposalId) -> Result<RebaseOutcome> {
        let timeout = self.config().rebase.timeout();
        tokio::time::timeout(timeout, self.wait_for_rebase(proposal))
            .await
            .map_err(|_| Error::Transient {
                message: format!("rebase of proposal {proposal} did not finish within {timeout:?}"),
                attempts: 1,
            })?
    }

    async fn wait_for_rebase(&self, proposal: &ProposalId) -> Result<RebaseOutcome> {
        let interval = self.config().rebase.poll_interval();
        let service = self.service();
        loop {
            let status = self
                .call("poll rebase", || service.rebase_status(proposal))
                .await?;
            match status {
                RebaseStatus::InProgress => tokio::time::sleep(interval).await,
                RebaseStatus::Completed { tip } => return Ok(RebaseOutcome::Rebased(tip)),
                RebaseStatus::Conflicted { paths } => return Ok(RebaseOutcome::Conflicted(paths)),
            }
        }
    }
}
