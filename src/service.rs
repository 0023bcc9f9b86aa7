//! Versioned repository service contract.
//!
//! All durable state (branches, commits, tags, merge proposals) lives behind
//! [`RepositoryService`]. The engine only orchestrates calls against it, so
//! every method here is a potential remote round trip.
//!
//! Absence is modeled as `Ok(None)` for lookups; [`ServiceError::NotFound`]
//! is reserved for operations that require their subject to exist.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Errors reported by a repository service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller's credential is no longer valid and should be refreshed.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// A compare-and-swap style precondition failed on the service side.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("server error: {0}")]
    Server(String),
}

impl ServiceError {
    /// Rate limiting and server-side failures may succeed when repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::RateLimited(_) | ServiceError::Server(_))
    }

    /// Client-class failures never succeed when repeated unchanged.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServiceError::InvalidCredentials(_)
                | ServiceError::Unauthorized(_)
                | ServiceError::Forbidden(_)
                | ServiceError::BadRequest(_)
        )
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// A branch and the revision at its tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Branch {
    pub name: String,
    pub tip: String,
}

/// A single commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Revision {
    pub id: String,
    pub message: String,
    pub author: String,
    pub committed_at: DateTime<Utc>,
    pub parent_ids: Vec<String>,
}

/// A release tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub name: String,
    pub revision_id: String,
    pub message: Option<String>,
}

/// One entry of a two-revision file diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    pub old_path: String,
    pub new_path: String,
    pub new_file: bool,
    pub deleted_file: bool,
    pub renamed_file: bool,
}

/// A fully-resolved action of a single remote commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitAction {
    Create { path: String, content: Vec<u8> },
    Update { path: String, content: Vec<u8> },
    Delete { path: String },
    Move {
        previous_path: String,
        path: String,
        content: Vec<u8>,
    },
}

impl CommitAction {
    /// Path this action leaves populated or removed.
    pub fn path(&self) -> &str {
        match self {
            CommitAction::Create { path, .. }
            | CommitAction::Update { path, .. }
            | CommitAction::Delete { path }
            | CommitAction::Move { path, .. } => path,
        }
    }
}

/// Identifier of an integration (merge) proposal.
pub type ProposalId = String;

/// Progress of an asynchronous rebase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseStatus {
    /// No rebase was requested yet, or it is still running.
    InProgress,
    /// The source branch now sits on top of the target at `tip`.
    Completed { tip: String },
    /// The rebase stopped on conflicting paths; the source branch is unchanged.
    Conflicted { paths: Vec<String> },
}

/// Narrow contract of the versioned repository service backing projects.
#[async_trait]
pub trait RepositoryService: Send + Sync {
    async fn get_branch(&self, name: &str) -> ServiceResult<Option<Branch>>;

    async fn create_branch(&self, name: &str, from_revision: &str) -> ServiceResult<Branch>;

    /// Delete a branch. Deleting an absent branch succeeds and returns `false`.
    async fn delete_branch(&self, name: &str) -> ServiceResult<bool>;

    /// Branches whose name starts with `prefix`, sorted by name.
    async fn list_branches(&self, prefix: &str) -> ServiceResult<Vec<Branch>>;

    /// Commit `actions` atomically on top of the branch tip.
    async fn commit(
        &self,
        branch: &str,
        message: &str,
        actions: &[CommitAction],
    ) -> ServiceResult<Revision>;

    async fn get_revision(&self, revision_id: &str) -> ServiceResult<Option<Revision>>;

    /// Revisions reachable from `reference` but not from `since`, newest first.
    async fn list_revisions(
        &self,
        reference: &str,
        since: Option<&str>,
    ) -> ServiceResult<Vec<Revision>>;

    async fn diff(&self, from_revision: &str, to_revision: &str) -> ServiceResult<Vec<DiffEntry>>;

    async fn merge_base(&self, left: &str, right: &str) -> ServiceResult<Revision>;

    /// Branch names whose history contains `revision_id`.
    async fn list_commit_refs(&self, revision_id: &str) -> ServiceResult<Vec<String>>;

    async fn get_file(&self, reference: &str, path: &str) -> ServiceResult<Option<Vec<u8>>>;

    async fn create_integration_proposal(
        &self,
        source_branch: &str,
        target_branch: &str,
    ) -> ServiceResult<ProposalId>;

    /// Start rebasing the proposal's source branch onto its target.
    async fn rebase(&self, proposal: &ProposalId) -> ServiceResult<()>;

    async fn rebase_status(&self, proposal: &ProposalId) -> ServiceResult<RebaseStatus>;

    async fn close_proposal(&self, proposal: &ProposalId) -> ServiceResult<()>;

    async fn create_tag(&self, name: &str, revision_id: &str, message: &str) -> ServiceResult<Tag>;

    async fn get_tag(&self, name: &str) -> ServiceResult<Option<Tag>>;
}
