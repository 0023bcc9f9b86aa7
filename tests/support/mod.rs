#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use projectflow::config::{AuthorConfig, Config};
use projectflow::credentials::CredentialCache;
use projectflow::engine::Engine;
use projectflow::git::GitRepositoryService;
use projectflow::refs::WorkspaceSpec;
use projectflow::service::{
    Branch, CommitAction, DiffEntry, ProposalId, RebaseStatus, RepositoryService, Revision,
    ServiceError, ServiceResult, Tag,
};
use tempfile::TempDir;

/// Configuration with short delays so retries and polling stay fast.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.retry.max_attempts = 3;
    config.retry.backoff_ms = 1;
    config.background.max_attempts = 3;
    config.background.backoff_ms = 1;
    config.rebase.poll_interval_ms = 5;
    config.rebase.timeout_ms = 30_000;
    config.author = AuthorConfig {
        name: "projectflow-test".to_string(),
        email: "projectflow-test@example.com".to_string(),
    };
    config
}

/// A bare repository with a git-backed engine on top of it.
pub struct TestProject {
    dir: TempDir,
    pub git: Arc<GitRepositoryService>,
    pub engine: Engine,
}

impl TestProject {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let git = Arc::new(
            GitRepositoryService::init_bare(dir.path(), &config.mainline, config.author.clone())
                .expect("init bare repository"),
        );
        let engine = Engine::new(git.clone(), config).expect("engine");
        Self { dir, git, engine }
    }

    /// Same repository, with `wrap` placed between the engine and git.
    pub fn with_service<S, F>(config: Config, wrap: F) -> (Self, Arc<S>)
    where
        S: RepositoryService + 'static,
        F: FnOnce(Arc<dyn RepositoryService>) -> S,
    {
        let dir = tempfile::tempdir().expect("tempdir");
        let git = Arc::new(
            GitRepositoryService::init_bare(dir.path(), &config.mainline, config.author.clone())
                .expect("init bare repository"),
        );
        let wrapped = Arc::new(wrap(git.clone()));
        let engine = Engine::new(wrapped.clone(), config).expect("engine");
        (Self { dir, git, engine }, wrapped)
    }

    pub fn with_credential_cache(self, cache: Arc<dyn CredentialCache>) -> Self {
        Self {
            engine: self.engine.with_credential_cache(cache),
            ..self
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn mainline(&self) -> String {
        self.engine.config().mainline.clone()
    }

    pub fn branch(&self, spec: &WorkspaceSpec) -> String {
        self.engine.scheme().branch_name(spec)
    }

    /// Write `files` to `branch` in one commit, creating or updating each.
    pub async fn write(&self, branch: &str, message: &str, files: &[(&str, &str)]) -> String {
        let mut actions = Vec::new();
        for (path, content) in files {
            let exists = self
                .git
                .get_file(branch, path)
                .await
                .expect("read file")
                .is_some();
            let path = path.to_string();
            let content = content.as_bytes().to_vec();
            actions.push(if exists {
                CommitAction::Update { path, content }
            } else {
                CommitAction::Create { path, content }
            });
        }
        self.git
            .commit(branch, message, &actions)
            .await
            .expect("commit")
            .id
    }

    pub async fn remove(&self, branch: &str, message: &str, path: &str) -> String {
        self.git
            .commit(branch, message, &[CommitAction::Delete { path: path.to_string() }])
            .await
            .expect("commit")
            .id
    }

    pub async fn read(&self, reference: &str, path: &str) -> Option<String> {
        self.git
            .get_file(reference, path)
            .await
            .expect("read file")
            .map(|bytes| String::from_utf8(bytes).expect("utf8"))
    }

    pub async fn tip(&self, branch: &str) -> Option<String> {
        self.git
            .get_branch(branch)
            .await
            .expect("read branch")
            .map(|branch| branch.tip)
    }

    pub async fn branch_names(&self) -> Vec<String> {
        self.git
            .list_branches("")
            .await
            .expect("list branches")
            .into_iter()
            .map(|branch| branch.name)
            .collect()
    }

    /// Branch names after background cleanup has finished.
    pub async fn settled_branch_names(&self) -> Vec<String> {
        self.engine.executor().wait_idle().await;
        self.branch_names().await
    }

    /// Tree id of a commit, for comparing content across histories.
    pub fn tree_of(&self, revision: &str) -> String {
        let repo = git2::Repository::open(self.path()).expect("open repository");
        let oid = git2::Oid::from_str(revision).expect("oid");
        let tree = repo.find_commit(oid).expect("commit").tree_id().to_string();
        tree
    }

    pub async fn temporary_branches(&self) -> Vec<String> {
        self.settled_branch_names()
            .await
            .into_iter()
            .filter(|name| self.engine.scheme().is_temporary_branch(name))
            .collect()
    }
}

/// A scripted outcome for one call.
enum Fault {
    Fail(ServiceError),
    /// Delete the branch the call targets, then fail.
    LoseBranch(ServiceError),
}

/// Fails scripted calls before delegating to the wrapped service.
pub struct FaultyService {
    inner: Arc<dyn RepositoryService>,
    script: Mutex<HashMap<&'static str, VecDeque<Option<Fault>>>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl FaultyService {
    pub fn new(inner: Arc<dyn RepositoryService>) -> Self {
        Self {
            inner,
            script: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Let the next call of `method` through unchanged.
    pub fn pass(&self, method: &'static str) {
        self.push(method, None);
    }

    /// Fail the next call of `method` with `err`; outcomes are consumed in order.
    pub fn fail(&self, method: &'static str, err: ServiceError) {
        self.push(method, Some(Fault::Fail(err)));
    }

    /// Delete the target branch on the next commit, then fail it with `err`.
    pub fn lose_branch_on_commit(&self, err: ServiceError) {
        self.push("commit", Some(Fault::LoseBranch(err)));
    }

    pub fn calls(&self, method: &'static str) -> usize {
        self.calls
            .lock()
            .expect("calls")
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    fn push(&self, method: &'static str, outcome: Option<Fault>) {
        self.script
            .lock()
            .expect("script")
            .entry(method)
            .or_default()
            .push_back(outcome);
    }

    fn next(&self, method: &'static str) -> Option<Fault> {
        *self.calls.lock().expect("calls").entry(method).or_default() += 1;
        self.script
            .lock()
            .expect("script")
            .get_mut(method)
            .and_then(VecDeque::pop_front)
            .flatten()
    }

    fn check(&self, method: &'static str) -> ServiceResult<()> {
        match self.next(method) {
            Some(Fault::Fail(err) | Fault::LoseBranch(err)) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RepositoryService for FaultyService {
    async fn get_branch(&self, name: &str) -> ServiceResult<Option<Branch>> {
        self.check("get_branch")?;
        self.inner.get_branch(name).await
    }

    async fn create_branch(&self, name: &str, from_revision: &str) -> ServiceResult<Branch> {
        self.check("create_branch")?;
        self.inner.create_branch(name, from_revision).await
    }

    async fn delete_branch(&self, name: &str) -> ServiceResult<bool> {
        self.check("delete_branch")?;
        self.inner.delete_branch(name).await
    }

    async fn list_branches(&self, prefix: &str) -> ServiceResult<Vec<Branch>> {
        self.check("list_branches")?;
        self.inner.list_branches(prefix).await
    }

    async fn commit(
        &self,
        branch: &str,
        message: &str,
        actions: &[CommitAction],
    ) -> ServiceResult<Revision> {
        match self.next("commit") {
            Some(Fault::LoseBranch(err)) => {
                self.inner.delete_branch(branch).await?;
                return Err(err);
            }
            Some(Fault::Fail(err)) => return Err(err),
            None => {}
        }
        self.inner.commit(branch, message, actions).await
    }

    async fn get_revision(&self, revision_id: &str) -> ServiceResult<Option<Revision>> {
        self.check("get_revision")?;
        self.inner.get_revision(revision_id).await
    }

    async fn list_revisions(
        &self,
        reference: &str,
        since: Option<&str>,
    ) -> ServiceResult<Vec<Revision>> {
        self.check("list_revisions")?;
        self.inner.list_revisions(reference, since).await
    }

    async fn diff(&self, from_revision: &str, to_revision: &str) -> ServiceResult<Vec<DiffEntry>> {
        self.check("diff")?;
        self.inner.diff(from_revision, to_revision).await
    }

    async fn merge_base(&self, left: &str, right: &str) -> ServiceResult<Revision> {
        self.check("merge_base")?;
        self.inner.merge_base(left, right).await
    }

    async fn list_commit_refs(&self, revision_id: &str) -> ServiceResult<Vec<String>> {
        self.check("list_commit_refs")?;
        self.inner.list_commit_refs(revision_id).await
    }

    async fn get_file(&self, reference: &str, path: &str) -> ServiceResult<Option<Vec<u8>>> {
        self.check("get_file")?;
        self.inner.get_file(reference, path).await
    }

    async fn create_integration_proposal(
        &self,
        source_branch: &str,
        target_branch: &str,
    ) -> ServiceResult<ProposalId> {
        self.check("create_integration_proposal")?;
        self.inner
            .create_integration_proposal(source_branch, target_branch)
            .await
    }

    async fn rebase(&self, proposal: &ProposalId) -> ServiceResult<()> {
        self.check("rebase")?;
        self.inner.rebase(proposal).await
    }

    async fn rebase_status(&self, proposal: &ProposalId) -> ServiceResult<RebaseStatus> {
        self.check("rebase_status")?;
        self.inner.rebase_status(proposal).await
    }

    async fn close_proposal(&self, proposal: &ProposalId) -> ServiceResult<()> {
        self.check("close_proposal")?;
        self.inner.close_proposal(proposal).await
    }

    async fn create_tag(&self, name: &str, revision_id: &str, message: &str) -> ServiceResult<Tag> {
        self.check("create_tag")?;
        self.inner.create_tag(name, revision_id, message).await
    }

    async fn get_tag(&self, name: &str) -> ServiceResult<Option<Tag>> {
        self.check("get_tag")?;
        self.inner.get_tag(name).await
    }
}

/// Counts invalidations.
#[derive(Debug, Default)]
pub struct CountingCache {
    invalidations: AtomicUsize,
}

impl CountingCache {
    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

impl CredentialCache for CountingCache {
    fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}
