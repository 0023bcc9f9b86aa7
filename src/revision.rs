//! Revision aliases and the reference sources they are resolved against.
//!
//! A [`RevisionRef`] is either a symbolic alias (`BASE`, `HEAD` and its
//! aliases `CURRENT`/`LATEST`) or an explicit revision id. Aliases are
//! resolved against a [`RevisionContext`], which knows the base and current
//! revision of one reference.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::refs::{ReferenceScheme, VersionId, WorkspaceSpec};
use crate::service::Revision;

/// A symbolic or explicit revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionRef {
    /// Oldest revision of the context.
    Base,
    /// Current tip of the context.
    Head,
    Id(String),
}

impl FromStr for RevisionRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidArgument("revision must not be empty".to_string()));
        }
        Ok(match trimmed.to_ascii_uppercase().as_str() {
            "BASE" => RevisionRef::Base,
            "HEAD" | "CURRENT" | "LATEST" => RevisionRef::Head,
            _ => RevisionRef::Id(trimmed.to_string()),
        })
    }
}

impl fmt::Display for RevisionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevisionRef::Base => f.write_str("BASE"),
            RevisionRef::Head => f.write_str("HEAD"),
            RevisionRef::Id(id) => f.write_str(id),
        }
    }
}

/// Where revisions are read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RefSource {
    /// The project's mainline.
    Project,
    Workspace(WorkspaceSpec),
    /// A released version, read through its tag.
    Version(VersionId),
    /// A review opened from a workspace.
    Review {
        workspace: WorkspaceSpec,
        review_id: String,
    },
}

impl RefSource {
    /// Reference name (branch or tag) this source reads from.
    pub fn reference(&self, scheme: &ReferenceScheme) -> String {
        match self {
            RefSource::Project => scheme.mainline().to_string(),
            RefSource::Workspace(spec) | RefSource::Review { workspace: spec, .. } => {
                scheme.branch_name(spec)
            }
            RefSource::Version(version) => scheme.version_tag_name(*version),
        }
    }

    /// Logical subject used in caller-facing messages.
    pub fn describe(&self) -> String {
        match self {
            RefSource::Project => "project".to_string(),
            RefSource::Workspace(spec) => spec.describe(),
            RefSource::Version(version) => format!("version {version}"),
            RefSource::Review {
                workspace,
                review_id,
            } => format!("review {review_id} of {}", workspace.describe()),
        }
    }
}

/// Access to the base and current revision of one reference.
#[async_trait]
pub trait RevisionContext: Send + Sync {
    /// Oldest revision the context considers part of its history.
    async fn base_revision(&self) -> Result<Option<Revision>>;

    /// Current tip.
    async fn current_revision(&self) -> Result<Option<Revision>>;
}

/// Resolve `revision` against `context`.
///
/// An explicit id passes through without a lookup. `None` means the context
/// has no revisions yet, which callers must handle explicitly.
pub async fn resolve_revision<C>(revision: &RevisionRef, context: &C) -> Result<Option<String>>
where
    C: RevisionContext + ?Sized,
{
    let resolved = match revision {
        RevisionRef::Id(id) => return Ok(Some(id.clone())),
        RevisionRef::Base => context.base_revision().await?,
        RevisionRef::Head => context.current_revision().await?,
    };
    Ok(resolved.map(|revision| revision.id))
}

/// A fixed history ordered oldest to newest.
#[derive(Debug, Clone, Default)]
pub struct RevisionHistory {
    revisions: Vec<Revision>,
}

impl RevisionHistory {
    pub fn new(revisions: Vec<Revision>) -> Self {
        Self { revisions }
    }
}

#[async_trait]
impl RevisionContext for RevisionHistory {
    async fn base_revision(&self) -> Result<Option<Revision>> {
        Ok(self.revisions.first().cloned())
    }

    async fn current_revision(&self) -> Result<Option<Revision>> {
        Ok(self.revisions.last().cloned())
    }
}

/// Revision context of a [`RefSource`] backed by the repository service.
///
/// Mainline and versions use their root revision as base; workspaces and
/// reviews use the merge base with their source branch, so BASE names the
/// point the workspace was last brought up to date.
pub struct ServiceRevisionContext<'a> {
    engine: &'a Engine,
    source: RefSource,
}

impl<'a> ServiceRevisionContext<'a> {
    pub fn new(engine: &'a Engine, source: RefSource) -> Self {
        Self { engine, source }
    }

    pub fn source(&self) -> &RefSource {
        &self.source
    }

    fn reference(&self) -> String {
        self.source.reference(self.engine.scheme())
    }

    fn subject(&self, err: Error) -> Error {
        err.with_subject(&self.reference(), &self.source.describe())
    }

    async fn tip_id(&self) -> Result<Option<String>> {
        let reference = self.reference();
        match &self.source {
            RefSource::Version(_) => {
                let service = self.engine.service();
                let tag = self
                    .engine
                    .call("read tag", || service.get_tag(&reference))
                    .await?;
                Ok(tag.map(|tag| tag.revision_id))
            }
            _ => self.engine.branch_tip(&reference).await,
        }
    }

    async fn lookup(&self, revision_id: &str) -> Result<Option<Revision>> {
        let service = self.engine.service();
        self.engine
            .call("read revision", || service.get_revision(revision_id))
            .await
    }

    async fn resolve_base(&self) -> Result<Option<Revision>> {
        let service = self.engine.service();
        match &self.source {
            RefSource::Workspace(spec) | RefSource::Review { workspace: spec, .. } => {
                let source_branch = self.engine.scheme().source_branch(spec);
                let branch = self.reference();
                if self.engine.branch_tip(&branch).await?.is_none() {
                    return Ok(None);
                }
                let base = self
                    .engine
                    .call("compute merge base", || {
                        service.merge_base(&source_branch, &branch)
                    })
                    .await?;
                Ok(Some(base))
            }
            RefSource::Project | RefSource::Version(_) => {
                let Some(tip) = self.tip_id().await? else {
                    return Ok(None);
                };
                let history = self
                    .engine
                    .call("list revisions", || service.list_revisions(&tip, None))
                    .await?;
                Ok(history.into_iter().last())
            }
        }
    }
}

#[async_trait]
impl RevisionContext for ServiceRevisionContext<'_> {
    async fn base_revision(&self) -> Result<Option<Revision>> {
        self.resolve_base().await.map_err(|err| self.subject(err))
    }

    async fn current_revision(&self) -> Result<Option<Revision>> {
        let current = async {
            match self.tip_id().await? {
                Some(tip) => self.lookup(&tip).await,
                None => Ok(None),
            }
        };
        current.await.map_err(|err| self.subject(err))
    }
}

impl Engine {
    /// Revision context of `source`.
    pub fn revision_context(&self, source: RefSource) -> ServiceRevisionContext<'_> {
        ServiceRevisionContext::new(self, source)
    }
}
