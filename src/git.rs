//! Repository service backed by a local bare git repository.
//!
//! [`GitRepositoryService`] implements [`RepositoryService`] on libgit2:
//! - branches and tags are plain references
//! - commits are built in memory from tree updates, never touching a worktree
//! - integration proposals live in process memory; their rebases run on the
//!   blocking pool so callers poll for completion like against a remote service
//!
//! A `Repository` handle is opened per call, so the service can be shared
//! across tasks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use git2::build::TreeUpdateBuilder;
use git2::{
    Commit, DiffFindOptions, ErrorClass, ErrorCode, FileMode, ObjectType, Oid, Repository,
    Signature, Sort, Tree,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::AuthorConfig;
use crate::error::{Error, Result};
use crate::merge::{replay_onto, summarize_conflicts, ReplayOutcome};
use crate::paths;
use crate::service::{
    Branch, CommitAction, DiffEntry, ProposalId, RebaseStatus, RepositoryService, Revision,
    ServiceError, ServiceResult, Tag,
};

const BRANCH_PREFIX: &str = "refs/heads/";
const TAG_PREFIX: &str = "refs/tags/";

/// Map a libgit2 failure onto the service taxonomy.
pub fn map_git_error(err: git2::Error) -> ServiceError {
    let message = err.message().to_string();
    match err.code() {
        ErrorCode::NotFound | ErrorCode::UnbornBranch => ServiceError::NotFound(message),
        ErrorCode::Exists | ErrorCode::Modified | ErrorCode::Locked => {
            ServiceError::Conflict(message)
        }
        ErrorCode::InvalidSpec | ErrorCode::Invalid | ErrorCode::Ambiguous => {
            ServiceError::BadRequest(message)
        }
        _ if err.class() == ErrorClass::Reference => ServiceError::BadRequest(message),
        _ => ServiceError::Server(message),
    }
}

#[derive(Debug, Clone)]
enum ProposalState {
    Open,
    Rebasing,
    Finished(RebaseStatus),
    Failed(ServiceError),
}

#[derive(Debug, Clone)]
struct Proposal {
    source: String,
    target: String,
    state: ProposalState,
}

type Proposals = Arc<Mutex<HashMap<ProposalId, Proposal>>>;

#[derive(Clone)]
pub struct GitRepositoryService {
    path: PathBuf,
    author: AuthorConfig,
    proposals: Proposals,
}

impl std::fmt::Debug for GitRepositoryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepositoryService")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl GitRepositoryService {
    /// Open an existing repository.
    pub fn open(path: impl Into<PathBuf>, author: AuthorConfig) -> Result<Self> {
        let path = path.into();
        Repository::open(&path).map_err(|err| open_error(&path, err))?;
        Ok(Self {
            path,
            author,
            proposals: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Create a bare repository whose `mainline` branch holds one empty root
    /// commit.
    pub fn init_bare(path: impl Into<PathBuf>, mainline: &str, author: AuthorConfig) -> Result<Self> {
        let path = path.into();
        let repo = Repository::init_bare(&path).map_err(|err| open_error(&path, err))?;
        let refname = branch_ref(mainline);
        let created = (|| -> std::result::Result<(), git2::Error> {
            let sig = Signature::now(&author.name, &author.email)?;
            let tree_id = repo.treebuilder(None)?.write()?;
            let tree = repo.find_tree(tree_id)?;
            repo.commit(Some(&refname), &sig, &sig, "Initial commit", &tree, &[])?;
            repo.set_head(&refname)
        })();
        created.map_err(|err| Error::Internal(format!("cannot initialize {}: {err}", path.display())))?;
        debug!(path = %path.display(), mainline, "initialized bare repository");
        Ok(Self {
            path,
            author,
            proposals: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn repo(&self) -> ServiceResult<Repository> {
        Repository::open(&self.path).map_err(map_git_error)
    }

    fn signature(&self) -> ServiceResult<Signature<'static>> {
        Signature::now(&self.author.name, &self.author.email).map_err(map_git_error)
    }

    fn with_proposals<T>(&self, f: impl FnOnce(&mut HashMap<ProposalId, Proposal>) -> T) -> T {
        let mut proposals = self.proposals.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut proposals)
    }

    fn read_branch(&self, name: &str) -> ServiceResult<Option<Branch>> {
        let repo = self.repo()?;
        let tip = match repo.find_reference(&branch_ref(name)) {
            Ok(reference) => reference.peel_to_commit().map_err(map_git_error)?.id(),
            Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
            Err(err) => return Err(map_git_error(err)),
        };
        Ok(Some(Branch {
            name: name.to_string(),
            tip: tip.to_string(),
        }))
    }

    fn write_branch(&self, name: &str, from_revision: &str) -> ServiceResult<Branch> {
        let repo = self.repo()?;
        let commit = resolve_commit(&repo, from_revision)?;
        repo.reference(&branch_ref(name), commit.id(), false, "projectflow: create branch")
            .map_err(map_git_error)?;
        Ok(Branch {
            name: name.to_string(),
            tip: commit.id().to_string(),
        })
    }

    fn remove_branch(&self, name: &str) -> ServiceResult<bool> {
        let repo = self.repo()?;
        let mut reference = match repo.find_reference(&branch_ref(name)) {
            Ok(reference) => reference,
            Err(err) if err.code() == ErrorCode::NotFound => return Ok(false),
            Err(err) => return Err(map_git_error(err)),
        };
        reference.delete().map_err(map_git_error)?;
        Ok(true)
    }

    fn branches_with_prefix(&self, prefix: &str) -> ServiceResult<Vec<Branch>> {
        let repo = self.repo()?;
        let mut branches = Vec::new();
        for reference in repo.references().map_err(map_git_error)? {
            let reference = reference.map_err(map_git_error)?;
            let Some(name) = reference.name().and_then(|name| name.strip_prefix(BRANCH_PREFIX)) else {
                continue;
            };
            if !name.starts_with(prefix) {
                continue;
            }
            let tip = reference.peel_to_commit().map_err(map_git_error)?.id();
            branches.push(Branch {
                name: name.to_string(),
                tip: tip.to_string(),
            });
        }
        branches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(branches)
    }

    fn commit_actions(&self, branch: &str, message: &str, actions: &[CommitAction]) -> ServiceResult<Revision> {
        if actions.is_empty() {
            return Err(ServiceError::BadRequest("commit has no actions".to_string()));
        }
        let repo = self.repo()?;
        let refname = branch_ref(branch);
        let parent = repo
            .find_reference(&refname)
            .and_then(|reference| reference.peel_to_commit())
            .map_err(|err| match err.code() {
                ErrorCode::NotFound => ServiceError::NotFound(format!("branch {branch} does not exist")),
                _ => map_git_error(err),
            })?;
        let base_tree = parent.tree().map_err(map_git_error)?;

        // Final blob (or removal) per path; a path touched twice keeps its last state.
        let mut overlay: HashMap<&str, Option<Oid>> = HashMap::new();
        for action in actions {
            let exists = |overlay: &HashMap<&str, Option<Oid>>, path: &str| match overlay.get(path) {
                Some(state) => state.is_some(),
                None => blob_at(&base_tree, path).is_some(),
            };
            let require = |present: bool, path: &str, wanted: bool| {
                if present == wanted {
                    Ok(())
                } else if wanted {
                    Err(ServiceError::BadRequest(format!("file {path} does not exist")))
                } else {
                    Err(ServiceError::BadRequest(format!("file {path} already exists")))
                }
            };
            match action {
                CommitAction::Create { path, content } => {
                    require(exists(&overlay, path.as_str()), path.as_str(), false)?;
                    let blob = repo.blob(content).map_err(map_git_error)?;
                    overlay.insert(path.as_str(), Some(blob));
                }
                CommitAction::Update { path, content } => {
                    require(exists(&overlay, path.as_str()), path.as_str(), true)?;
                    let blob = repo.blob(content).map_err(map_git_error)?;
                    overlay.insert(path.as_str(), Some(blob));
                }
                CommitAction::Delete { path } => {
                    require(exists(&overlay, path.as_str()), path.as_str(), true)?;
                    overlay.insert(path.as_str(), None);
                }
                CommitAction::Move {
                    previous_path,
                    path,
                    content,
                } => {
                    require(exists(&overlay, previous_path.as_str()), previous_path.as_str(), true)?;
                    overlay.insert(previous_path.as_str(), None);
                    require(exists(&overlay, path.as_str()), path.as_str(), false)?;
                    let blob = repo.blob(content).map_err(map_git_error)?;
                    overlay.insert(path.as_str(), Some(blob));
                }
            }
        }

        let mut builder = TreeUpdateBuilder::new();
        for (path, state) in &overlay {
            match state {
                Some(blob) => {
                    builder.upsert(*path, *blob, FileMode::Blob);
                }
                None if blob_at(&base_tree, path).is_some() => {
                    builder.remove(*path);
                }
                None => {}
            }
        }

        let tree_id = builder
            .create_updated(&repo, &base_tree)
            .map_err(map_git_error)?;
        let tree = repo.find_tree(tree_id).map_err(map_git_error)?;
        let sig = self.signature()?;
        let oid = repo
            .commit(Some(&refname), &sig, &sig, message, &tree, &[&parent])
            .map_err(map_git_error)?;
        let commit = repo.find_commit(oid).map_err(map_git_error)?;
        Ok(to_revision(&commit))
    }

    fn read_revision(&self, revision_id: &str) -> ServiceResult<Option<Revision>> {
        let repo = self.repo()?;
        let Ok(oid) = Oid::from_str(revision_id) else {
            return Ok(None);
        };
        let result = match repo.find_commit(oid) {
            Ok(commit) => Ok(Some(to_revision(&commit))),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
            Err(err) => Err(map_git_error(err)),
        };
        result
    }

    fn revisions(&self, reference: &str, since: Option<&str>) -> ServiceResult<Vec<Revision>> {
        let repo = self.repo()?;
        let tip = resolve_commit(&repo, reference)?.id();
        let mut revwalk = repo.revwalk().map_err(map_git_error)?;
        revwalk
            .set_sorting(Sort::TOPOLOGICAL | Sort::TIME)
            .map_err(map_git_error)?;
        revwalk.push(tip).map_err(map_git_error)?;
        if let Some(since) = since {
            let hidden = resolve_commit(&repo, since)?.id();
            revwalk.hide(hidden).map_err(map_git_error)?;
        }

        let mut revisions = Vec::new();
        for oid in revwalk {
            let oid = oid.map_err(map_git_error)?;
            let commit = repo.find_commit(oid).map_err(map_git_error)?;
            revisions.push(to_revision(&commit));
        }
        Ok(revisions)
    }

    fn diff_revisions(&self, from_revision: &str, to_revision: &str) -> ServiceResult<Vec<DiffEntry>> {
        let repo = self.repo()?;
        let from_tree = resolve_commit(&repo, from_revision)?
            .tree()
            .map_err(map_git_error)?;
        let to_tree = resolve_commit(&repo, to_revision)?
            .tree()
            .map_err(map_git_error)?;
        let mut diff = repo
            .diff_tree_to_tree(Some(&from_tree), Some(&to_tree), None)
            .map_err(map_git_error)?;
        let mut find = DiffFindOptions::new();
        find.renames(true);
        diff.find_similar(Some(&mut find)).map_err(map_git_error)?;

        let entries = diff
            .deltas()
            .map(|delta| {
                let old_path = delta.old_file().path();
                let new_path = delta.new_file().path();
                let display = |path: Option<&Path>| {
                    path.map(|path| path.to_string_lossy().into_owned())
                };
                let old = display(old_path.or(new_path)).unwrap_or_default();
                let new = display(new_path.or(old_path)).unwrap_or_default();
                DiffEntry {
                    old_path: old,
                    new_path: new,
                    new_file: delta.status() == git2::Delta::Added,
                    deleted_file: delta.status() == git2::Delta::Deleted,
                    renamed_file: delta.status() == git2::Delta::Renamed,
                }
            })
            .collect();
        Ok(entries)
    }

    fn common_ancestor(&self, left: &str, right: &str) -> ServiceResult<Revision> {
        let repo = self.repo()?;
        let left = resolve_commit(&repo, left)?.id();
        let right = resolve_commit(&repo, right)?.id();
        let base = repo.merge_base(left, right).map_err(|err| match err.code() {
            ErrorCode::NotFound => ServiceError::NotFound(format!("no merge base for {left} and {right}")),
            _ => map_git_error(err),
        })?;
        let commit = repo.find_commit(base).map_err(map_git_error)?;
        Ok(to_revision(&commit))
    }

    fn branches_containing(&self, revision_id: &str) -> ServiceResult<Vec<String>> {
        let repo = self.repo()?;
        let target = resolve_commit(&repo, revision_id)?.id();
        let mut names = Vec::new();
        for branch in self.branches_with_prefix("")? {
            let tip = Oid::from_str(&branch.tip).map_err(map_git_error)?;
            if tip == target || repo.graph_descendant_of(tip, target).map_err(map_git_error)? {
                names.push(branch.name);
            }
        }
        Ok(names)
    }

    fn read_file(&self, reference: &str, path: &str) -> ServiceResult<Option<Vec<u8>>> {
        let Some(path) = paths::canonicalize(path) else {
            return Err(ServiceError::BadRequest(format!("invalid file path '{path}'")));
        };
        let repo = self.repo()?;
        let tree = resolve_commit(&repo, reference)?
            .tree()
            .map_err(map_git_error)?;
        let Some(oid) = blob_at(&tree, &path) else {
            return Ok(None);
        };
        let blob = repo.find_blob(oid).map_err(map_git_error)?;
        Ok(Some(blob.content().to_vec()))
    }

    fn open_proposal(&self, source: &str, target: &str) -> ServiceResult<ProposalId> {
        for name in [source, target] {
            if self.read_branch(name)?.is_none() {
                return Err(ServiceError::NotFound(format!("branch {name} does not exist")));
            }
        }
        let id = Uuid::new_v4().to_string();
        self.with_proposals(|proposals| {
            proposals.insert(
                id.clone(),
                Proposal {
                    source: source.to_string(),
                    target: target.to_string(),
                    state: ProposalState::Open,
                },
            )
        });
        debug!(proposal = %id, source, target, "opened integration proposal");
        Ok(id)
    }

    fn start_rebase(&self, proposal: &ProposalId) -> ServiceResult<()> {
        let (source, target) = self.with_proposals(|proposals| -> ServiceResult<(String, String)> {
            let entry = proposals
                .get_mut(proposal)
                .ok_or_else(|| ServiceError::NotFound(format!("proposal {proposal} does not exist")))?;
            if matches!(entry.state, ProposalState::Rebasing) {
                return Err(ServiceError::Conflict(format!("proposal {proposal} is already rebasing")));
            }
            entry.state = ProposalState::Rebasing;
            Ok((entry.source.clone(), entry.target.clone()))
        })?;

        let service = self.clone();
        let id = proposal.clone();
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| ServiceError::Server(format!("no async runtime: {err}")))?;
        runtime.spawn_blocking(move || {
            let state = match service.rebase_branch(&source, &target) {
                Ok(status) => ProposalState::Finished(status),
                Err(err) => {
                    warn!(proposal = %id, error = %err, "rebase failed");
                    ProposalState::Failed(err)
                }
            };
            service.with_proposals(|proposals| {
                if let Some(entry) = proposals.get_mut(&id) {
                    entry.state = state;
                }
            });
        });
        Ok(())
    }

    /// Replay `source` onto `target` and move `source` to the result if it
    /// did not move meanwhile.
    fn rebase_branch(&self, source: &str, target: &str) -> ServiceResult<RebaseStatus> {
        let repo = self.repo()?;
        let source_ref = branch_ref(source);
        let source_tip = resolve_commit(&repo, source)?.id();
        let target_tip = resolve_commit(&repo, target)?.id();

        match replay_onto(&repo, source_tip, target_tip).map_err(map_git_error)? {
            ReplayOutcome::Applied { tip, replayed } => {
                repo.reference_matching(
                    &source_ref,
                    tip,
                    true,
                    source_tip,
                    "projectflow: rebase",
                )
                .map_err(map_git_error)?;
                debug!(source, target, %tip, replayed, "rebased branch");
                Ok(RebaseStatus::Completed {
                    tip: tip.to_string(),
                })
            }
            ReplayOutcome::Conflicted { commit, conflicts } => {
                debug!(source, target, %commit, conflicts = ?summarize_conflicts(&conflicts), "rebase conflicted");
                Ok(RebaseStatus::Conflicted {
                    paths: conflicts.into_iter().map(|conflict| conflict.path).collect(),
                })
            }
        }
    }

    fn proposal_status(&self, proposal: &ProposalId) -> ServiceResult<RebaseStatus> {
        self.with_proposals(|proposals| -> ServiceResult<RebaseStatus> {
            let entry = proposals
                .get(proposal)
                .ok_or_else(|| ServiceError::NotFound(format!("proposal {proposal} does not exist")))?;
            match &entry.state {
                ProposalState::Open | ProposalState::Rebasing => Ok(RebaseStatus::InProgress),
                ProposalState::Finished(status) => Ok(status.clone()),
                ProposalState::Failed(err) => Err(err.clone()),
            }
        })
    }

    fn write_tag(&self, name: &str, revision_id: &str, message: &str) -> ServiceResult<Tag> {
        let repo = self.repo()?;
        let commit = resolve_commit(&repo, revision_id)?;
        let sig = self.signature()?;
        repo.tag(name, commit.as_object(), &sig, message, false)
            .map_err(map_git_error)?;
        Ok(Tag {
            name: name.to_string(),
            revision_id: commit.id().to_string(),
            message: Some(message.to_string()),
        })
    }

    fn read_tag(&self, name: &str) -> ServiceResult<Option<Tag>> {
        let repo = self.repo()?;
        let reference = match repo.find_reference(&format!("{TAG_PREFIX}{name}")) {
            Ok(reference) => reference,
            Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
            Err(err) => return Err(map_git_error(err)),
        };
        let message = reference
            .peel(ObjectType::Tag)
            .ok()
            .and_then(|object| object.into_tag().ok())
            .and_then(|tag| tag.message().map(str::to_string));
        let commit = reference.peel_to_commit().map_err(map_git_error)?;
        Ok(Some(Tag {
            name: name.to_string(),
            revision_id: commit.id().to_string(),
            message,
        }))
    }
}

#[async_trait]
impl RepositoryService for GitRepositoryService {
    async fn get_branch(&self, name: &str) -> ServiceResult<Option<Branch>> {
        self.read_branch(name)
    }

    async fn create_branch(&self, name: &str, from_revision: &str) -> ServiceResult<Branch> {
        self.write_branch(name, from_revision)
    }

    async fn delete_branch(&self, name: &str) -> ServiceResult<bool> {
        self.remove_branch(name)
    }

    async fn list_branches(&self, prefix: &str) -> ServiceResult<Vec<Branch>> {
        self.branches_with_prefix(prefix)
    }

    async fn commit(
        &self,
        branch: &str,
        message: &str,
        actions: &[CommitAction],
    ) -> ServiceResult<Revision> {
        self.commit_actions(branch, message, actions)
    }

    async fn get_revision(&self, revision_id: &str) -> ServiceResult<Option<Revision>> {
        self.read_revision(revision_id)
    }

    async fn list_revisions(
        &self,
        reference: &str,
        since: Option<&str>,
    ) -> ServiceResult<Vec<Revision>> {
        self.revisions(reference, since)
    }

    async fn diff(&self, from_revision: &str, to_revision: &str) -> ServiceResult<Vec<DiffEntry>> {
        self.diff_revisions(from_revision, to_revision)
    }

    async fn merge_base(&self, left: &str, right: &str) -> ServiceResult<Revision> {
        self.common_ancestor(left, right)
    }

    async fn list_commit_refs(&self, revision_id: &str) -> ServiceResult<Vec<String>> {
        self.branches_containing(revision_id)
    }

    async fn get_file(&self, reference: &str, path: &str) -> ServiceResult<Option<Vec<u8>>> {
        self.read_file(reference, path)
    }

    async fn create_integration_proposal(
        &self,
        source_branch: &str,
        target_branch: &str,
    ) -> ServiceResult<ProposalId> {
        self.open_proposal(source_branch, target_branch)
    }

    async fn rebase(&self, proposal: &ProposalId) -> ServiceResult<()> {
        self.start_rebase(proposal)
    }

    async fn rebase_status(&self, proposal: &ProposalId) -> ServiceResult<RebaseStatus> {
        self.proposal_status(proposal)
    }

    async fn close_proposal(&self, proposal: &ProposalId) -> ServiceResult<()> {
        self.with_proposals(|proposals| proposals.remove(proposal));
        Ok(())
    }

    async fn create_tag(&self, name: &str, revision_id: &str, message: &str) -> ServiceResult<Tag> {
        self.write_tag(name, revision_id, message)
    }

    async fn get_tag(&self, name: &str) -> ServiceResult<Option<Tag>> {
        self.read_tag(name)
    }
}

fn branch_ref(name: &str) -> String {
    format!("{BRANCH_PREFIX}{name}")
}

fn open_error(path: &Path, err: git2::Error) -> Error {
    if err.code() == ErrorCode::NotFound {
        Error::NotFound(format!("no repository at {}", path.display()))
    } else {
        Error::Internal(format!("cannot open {}: {err}", path.display()))
    }
}

/// Resolve a branch name, tag name, or commit id to a commit.
fn resolve_commit<'r>(repo: &'r Repository, reference: &str) -> ServiceResult<Commit<'r>> {
    for refname in [branch_ref(reference), format!("{TAG_PREFIX}{reference}")] {
        match repo.find_reference(&refname) {
            Ok(found) => return found.peel_to_commit().map_err(map_git_error),
            Err(err) if matches!(err.code(), ErrorCode::NotFound | ErrorCode::InvalidSpec) => {}
            Err(err) => return Err(map_git_error(err)),
        }
    }
    let missing = || ServiceError::NotFound(format!("revision {reference} does not exist"));
    let oid = Oid::from_str(reference).map_err(|_| missing())?;
    repo.find_commit(oid).map_err(|err| match err.code() {
        ErrorCode::NotFound => missing(),
        _ => map_git_error(err),
    })
}

fn blob_at(tree: &Tree<'_>, path: &str) -> Option<Oid> {
    let entry = tree.get_path(Path::new(path)).ok()?;
    (entry.kind() == Some(ObjectType::Blob)).then(|| entry.id())
}

fn to_revision(commit: &Commit<'_>) -> Revision {
    let committed_at = DateTime::<Utc>::from_timestamp(commit.time().seconds(), 0).unwrap_or_default();
    Revision {
        id: commit.id().to_string(),
        message: commit.message().unwrap_or_default().to_string(),
        author: commit.author().name().unwrap_or_default().to_string(),
        committed_at,
        parent_ids: commit.parent_ids().map(|oid| oid.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn service() -> (TempDir, GitRepositoryService) {
        let dir = TempDir::new().expect("tempdir");
        let service = GitRepositoryService::init_bare(dir.path().join("repo.git"), "main", AuthorConfig::default())
            .expect("init");
        (dir, service)
    }

    fn create(path: &str, content: &str) -> CommitAction {
        CommitAction::Create {
            path: path.to_string(),
            content: content.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn commits_and_reads_files() {
        let (_dir, service) = service();
        let revision = service
            .commit("main", "add", &[create("dir/a.txt", "hello")])
            .await
            .expect("commit");
        let tip = service.get_branch("main").await.expect("branch").expect("exists").tip;
        assert_eq!(tip, revision.id);
        let content = service.get_file("main", "/dir/a.txt").await.expect("read");
        assert_eq!(content.as_deref(), Some(b"hello".as_slice()));
        assert_eq!(service.get_file(&tip, "missing.txt").await.expect("read"), None);
    }

    #[tokio::test]
    async fn rejects_inconsistent_actions() {
        let (_dir, service) = service();
        service
            .commit("main", "add", &[create("a.txt", "1")])
            .await
            .expect("commit");
        let err = service
            .commit("main", "again", &[create("a.txt", "2")])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)), "{err}");
        let err = service
            .commit("main", "gone", &[CommitAction::Delete { path: "b.txt".into() }])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)), "{err}");
        let err = service
            .commit("nope", "x", &[create("c.txt", "3")])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)), "{err}");
    }

    #[tokio::test]
    async fn branch_lifecycle_is_idempotent() {
        let (_dir, service) = service();
        let main = service.get_branch("main").await.expect("get").expect("main");
        service.create_branch("topic/a", &main.tip).await.expect("create");
        let err = service.create_branch("topic/a", &main.tip).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)), "{err}");
        let names: Vec<String> = service
            .list_branches("topic/")
            .await
            .expect("list")
            .into_iter()
            .map(|branch| branch.name)
            .collect();
        assert_eq!(names, vec!["topic/a".to_string()]);
        assert!(service.delete_branch("topic/a").await.expect("delete"));
        assert!(!service.delete_branch("topic/a").await.expect("delete again"));
    }

    #[tokio::test]
    async fn tags_resolve_to_commits() {
        let (_dir, service) = service();
        let main = service.get_branch("main").await.expect("get").expect("main");
        service
            .create_tag("release-1.0.0", &main.tip, "first release")
            .await
            .expect("tag");
        let tag = service.get_tag("release-1.0.0").await.expect("get").expect("tag");
        assert_eq!(tag.revision_id, main.tip);
        assert_eq!(tag.message.as_deref(), Some("first release"));
        assert_eq!(service.get_tag("release-9.9.9").await.expect("get"), None);
        let history = service.list_revisions("release-1.0.0", None).await.expect("history");
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn diff_detects_renames() {
        let (_dir, service) = service();
        let first = service
            .commit("main", "add", &[create("a.txt", "same content\nacross lines\n")])
            .await
            .expect("commit");
        let second = service
            .commit(
                "main",
                "move",
                &[CommitAction::Move {
                    previous_path: "a.txt".into(),
                    path: "b.txt".into(),
                    content: b"same content\nacross lines\n".to_vec(),
                }],
            )
            .await
            .expect("move");
        let entries = service.diff(&first.id, &second.id).await.expect("diff");
        assert_eq!(entries.len(), 1);
        assert!(entries[0].renamed_file);
        assert_eq!(entries[0].old_path, "a.txt");
        assert_eq!(entries[0].new_path, "b.txt");
    }

    #[tokio::test]
    async fn later_actions_win_on_the_same_path() {
        let (_dir, service) = service();
        service
            .commit("main", "add", &[create("a.txt", "alpha"), create("x.txt", "ex")])
            .await
            .expect("commit");
        let moved = |from: &str, to: &str| CommitAction::Move {
            previous_path: from.into(),
            path: to.into(),
            content: b"alpha".to_vec(),
        };
        service
            .commit(
                "main",
                "shuffle",
                &[
                    moved("a.txt", "b.txt"),
                    moved("b.txt", "c.txt"),
                    CommitAction::Delete { path: "x.txt".into() },
                    create("x.txt", "again"),
                ],
            )
            .await
            .expect("commit");
        assert_eq!(service.get_file("main", "a.txt").await.expect("read"), None);
        assert_eq!(service.get_file("main", "b.txt").await.expect("read"), None);
        let content = service.get_file("main", "c.txt").await.expect("read");
        assert_eq!(content.as_deref(), Some(b"alpha".as_slice()));
        let content = service.get_file("main", "x.txt").await.expect("read");
        assert_eq!(content.as_deref(), Some(b"again".as_slice()));
    }
}
