//! Changeset commit protocol.
//!
//! A changeset is applied to a target branch as one logical update. Small
//! changesets become a single remote commit. Changesets larger than
//! `commit.max_single_commit_size` are split into chunks committed onto a
//! temporary branch seeded at the base revision; once every chunk landed the
//! target branch is replaced by the temporary branch's tip.
//!
//! Both paths check the target's tip against the expected base right before
//! the destructive step and fail with [`Error::Conflict`] instead of
//! rebasing silently.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::paths;
use crate::service::{CommitAction, Revision, ServiceError};
use crate::temp_branch::TemporaryBranch;

/// One file-level change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FileOperation {
    Add {
        path: String,
        content: Vec<u8>,
    },
    Modify {
        path: String,
        content: Vec<u8>,
    },
    Delete {
        path: String,
    },
    /// Move `from` to `to`. Without `content` the file keeps its prior content.
    Move {
        from: String,
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<Vec<u8>>,
    },
}

impl FileOperation {
    pub fn add(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        FileOperation::Add {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn modify(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        FileOperation::Modify {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        FileOperation::Delete { path: path.into() }
    }

    pub fn move_to(from: impl Into<String>, to: impl Into<String>, content: Option<Vec<u8>>) -> Self {
        FileOperation::Move {
            from: from.into(),
            to: to.into(),
            content,
        }
    }

    /// Path left populated or removed by this operation.
    pub fn target_path(&self) -> &str {
        match self {
            FileOperation::Add { path, .. }
            | FileOperation::Modify { path, .. }
            | FileOperation::Delete { path } => path,
            FileOperation::Move { to, .. } => to,
        }
    }

    fn canonical(self) -> Result<Self> {
        let canon = |path: String| {
            paths::canonicalize(&path)
                .ok_or_else(|| Error::InvalidArgument(format!("invalid file path '{path}'")))
        };
        Ok(match self {
            FileOperation::Add { path, content } => FileOperation::Add {
                path: canon(path)?,
                content,
            },
            FileOperation::Modify { path, content } => FileOperation::Modify {
                path: canon(path)?,
                content,
            },
            FileOperation::Delete { path } => FileOperation::Delete { path: canon(path)? },
            FileOperation::Move { from, to, content } => {
                let from = canon(from)?;
                let to = canon(to)?;
                if from == to {
                    return Err(Error::InvalidArgument(format!(
                        "move of '{from}' onto itself"
                    )));
                }
                FileOperation::Move { from, to, content }
            }
        })
    }
}

/// An ordered, validated list of file operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changeset {
    operations: Vec<FileOperation>,
}

impl Changeset {
    /// Validate and canonicalize `operations`.
    ///
    /// Paths are canonicalized; a path may be the target of at most one
    /// operation and the source of at most one move.
    pub fn new(operations: Vec<FileOperation>) -> Result<Self> {
        if operations.is_empty() {
            return Err(Error::InvalidArgument("changeset is empty".to_string()));
        }
        let mut targets = HashSet::new();
        let mut sources = HashSet::new();
        let mut canonical = Vec::with_capacity(operations.len());
        for operation in operations {
            let operation = operation.canonical()?;
            if !targets.insert(operation.target_path().to_string()) {
                return Err(Error::InvalidArgument(format!(
                    "path '{}' is changed more than once",
                    operation.target_path()
                )));
            }
            if let FileOperation::Move { from, .. } = &operation {
                if !sources.insert(from.clone()) {
                    return Err(Error::InvalidArgument(format!(
                        "path '{from}' is moved more than once"
                    )));
                }
            }
            canonical.push(operation);
        }
        Ok(Self {
            operations: canonical,
        })
    }

    pub fn operations(&self) -> &[FileOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl Engine {
    /// Apply `changeset` to `target` and return the revision now at its tip.
    ///
    /// With `expected_base` the target must still point at that revision
    /// right before it is changed; otherwise its tip at call time is used.
    pub async fn submit_changeset(
        &self,
        target: &str,
        expected_base: Option<&str>,
        changeset: &Changeset,
        message: &str,
    ) -> Result<Revision> {
        let base = match expected_base {
            Some(base) => base.to_string(),
            None => self.require_branch_tip(target).await?,
        };
        let actions = self.resolve_actions(&base, changeset).await?;
        let max = self.config().commit.max_single_commit_size;

        if actions.len() <= max {
            self.ensure_tip(target, &base).await?;
            let service = self.service();
            let revision = self
                .call("commit changeset", || service.commit(target, message, &actions))
                .await?;
            info!(branch = target, revision = %revision.id, operations = actions.len(), "committed changeset");
            return Ok(revision);
        }

        self.submit_split(target, &base, &actions, message).await
    }

    async fn submit_split(
        &self,
        target: &str,
        base: &str,
        actions: &[CommitAction],
        message: &str,
    ) -> Result<Revision> {
        let max = self.config().commit.max_single_commit_size;
        let chunks: Vec<&[CommitAction]> = actions.chunks(max).collect();
        let total = chunks.len();
        let mut temp = TemporaryBranch::create(self, base).await?;
        debug!(branch = target, temporary = temp.name(), chunks = total, "splitting changeset");

        let mut last = None;
        for (index, chunk) in chunks.into_iter().enumerate() {
            let annotated = format!("{message} [{}/{total}]", index + 1);
            last = Some(self.commit_chunk(&mut temp, chunk, &annotated).await?);
        }
        let revision = last.ok_or_else(|| Error::Internal("split changeset produced no commits".to_string()))?;

        self.ensure_tip(target, base).await?;

        let service = self.service();
        self.call("delete target branch", || service.delete_branch(target))
            .await?;
        let tip = temp.tip().to_string();
        if let Err(err) = self
            .call("recreate target branch", || service.create_branch(target, &tip))
            .await
        {
            let kept = temp.persist();
            error!(
                branch = target,
                temporary = %kept,
                revision = %tip,
                error = %err,
                "target branch lost during replacement; changes kept on temporary branch"
            );
            return Err(err);
        }
        temp.close();
        info!(branch = target, revision = %revision.id, chunks = total, "committed split changeset");
        Ok(revision)
    }

    /// Commit one chunk onto the temporary branch, retrying that chunk only.
    async fn commit_chunk(
        &self,
        temp: &mut TemporaryBranch,
        chunk: &[CommitAction],
        message: &str,
    ) -> Result<Revision> {
        let max_attempts = self.config().commit.chunk_max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.service().commit(temp.name(), message, chunk).await {
                Ok(revision) => {
                    temp.set_tip(revision.id.clone());
                    return Ok(revision);
                }
                Err(err @ ServiceError::InvalidCredentials(_)) => {
                    return Err(self.surface("commit chunk", err));
                }
                Err(err) if err.is_client_error() => {
                    return Err(Error::Fatal(format!("commit chunk: {err}")));
                }
                Err(err) if attempt < max_attempts => {
                    warn!(branch = temp.name(), attempt, error = %err, "chunk commit failed; retrying");
                    tokio::time::sleep(self.retry_policy().delay_after(attempt)).await;
                    let good = temp.tip().to_string();
                    if self.branch_tip(temp.name()).await?.as_deref() != Some(good.as_str()) {
                        temp.reset(self, &good).await?;
                    }
                    attempt += 1;
                }
                Err(err) => return Err(self.surface("commit chunk", err)),
            }
        }
    }

    /// Turn file operations into commit actions against `base`.
    ///
    /// Moves without content reuse what an earlier operation (including an
    /// earlier move) wrote to the source path, and otherwise read the source
    /// at `base`.
    async fn resolve_actions(&self, base: &str, changeset: &Changeset) -> Result<Vec<CommitAction>> {
        let mut written: HashMap<String, Vec<u8>> = HashMap::new();
        let mut actions = Vec::with_capacity(changeset.len());
        for operation in changeset.operations() {
            let action = match operation {
                FileOperation::Add { path, content } => {
                    written.insert(path.clone(), content.clone());
                    CommitAction::Create {
                        path: path.clone(),
                        content: content.clone(),
                    }
                }
                FileOperation::Modify { path, content } => {
                    written.insert(path.clone(), content.clone());
                    CommitAction::Update {
                        path: path.clone(),
                        content: content.clone(),
                    }
                }
                FileOperation::Delete { path } => {
                    written.remove(path);
                    CommitAction::Delete { path: path.clone() }
                }
                FileOperation::Move { from, to, content } => {
                    let prior = written.remove(from);
                    let content = match (content, prior) {
                        (Some(content), _) => content.clone(),
                        (None, Some(prior)) => prior,
                        (None, None) => self.read_file(base, from).await?,
                    };
                    written.insert(to.clone(), content.clone());
                    CommitAction::Move {
                        previous_path: from.clone(),
                        path: to.clone(),
                        content,
                    }
                }
            };
            actions.push(action);
        }
        Ok(actions)
    }

    async fn read_file(&self, revision: &str, path: &str) -> Result<Vec<u8>> {
        let service = self.service();
        self.call("read file", || service.get_file(revision, path))
            .await?
            .ok_or_else(|| Error::NotFound(format!("file {path} does not exist at revision {revision}")))
    }
}
