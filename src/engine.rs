//! Engine facade.
//!
//! [`Engine`] owns everything a request needs: the repository service
//! handle, the immutable configuration, the reference scheme, the foreground
//! retry policy, and the background executor. It holds no per-project state;
//! every operation is a fresh call sequence against the service.
//!
//! Operations live next to their concerns:
//! - `changeset`: [`Engine::submit_changeset`]
//! - `workspace`: workspace lifecycle
//! - `update`: workspace update, currency status, conflict resolution
//! - `entity`: comparisons

use std::future::Future;
use std::sync::Arc;

use tracing::warn;

use crate::background::BackgroundExecutor;
use crate::config::Config;
use crate::credentials::CredentialCache;
use crate::error::{Error, Result};
use crate::refs::ReferenceScheme;
use crate::retry::RetryPolicy;
use crate::service::{RepositoryService, ServiceError, ServiceResult};

pub struct Engine {
    service: Arc<dyn RepositoryService>,
    config: Arc<Config>,
    scheme: ReferenceScheme,
    retry: RetryPolicy,
    executor: BackgroundExecutor,
    credentials: Option<Arc<dyn CredentialCache>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("mainline", &self.config.mainline)
            .field("retry", &self.retry)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine after validating `config`.
    pub fn new(service: Arc<dyn RepositoryService>, config: Config) -> Result<Self> {
        config.validate()?;
        let scheme = ReferenceScheme::new(&config);
        let retry = RetryPolicy::from_config(&config.retry);
        let executor = BackgroundExecutor::new(RetryPolicy::from_config(&config.background));
        Ok(Self {
            service,
            config: Arc::new(config),
            scheme,
            retry,
            executor,
            credentials: None,
        })
    }

    /// Invalidate `cache` whenever the service rejects the credential.
    pub fn with_credential_cache(mut self, cache: Arc<dyn CredentialCache>) -> Self {
        self.credentials = Some(cache);
        self
    }

    pub fn service(&self) -> &Arc<dyn RepositoryService> {
        &self.service
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheme(&self) -> &ReferenceScheme {
        &self.scheme
    }

    pub fn executor(&self) -> &BackgroundExecutor {
        &self.executor
    }

    pub(crate) fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run a remote call under the foreground retry policy and surface its
    /// failure as a caller-facing error.
    pub(crate) async fn call<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        self.retry
            .run(what, ServiceError::is_transient, op)
            .await
            .map_err(|err| self.surface(what, err))
    }

    /// Translate a service failure, invalidating credentials when asked to.
    pub(crate) fn surface(&self, what: &str, err: ServiceError) -> Error {
        match err {
            ServiceError::NotFound(message) => Error::NotFound(format!("{what}: {message}")),
            ServiceError::InvalidCredentials(message) => {
                if let Some(cache) = &self.credentials {
                    cache.invalidate();
                }
                warn!(operation = what, "credential rejected; cache invalidated");
                Error::CredentialsExpired(format!("{what}: {message}"))
            }
            ServiceError::Unauthorized(message) | ServiceError::Forbidden(message) => {
                Error::Forbidden(format!("{what}: {message}"))
            }
            ServiceError::BadRequest(message) => Error::Fatal(format!("{what}: {message}")),
            ServiceError::Conflict(message) => Error::Conflict(format!("{what}: {message}")),
            ServiceError::RateLimited(_) | ServiceError::Server(_) => Error::Transient {
                message: format!("{what}: {err}"),
                attempts: self.retry.max_attempts(),
            },
        }
    }

    /// Current tip of a branch, or `None` when it does not exist.
    pub(crate) async fn branch_tip(&self, name: &str) -> Result<Option<String>> {
        let branch = self
            .call("read branch", move || self.service.get_branch(name))
            .await?;
        Ok(branch.map(|branch| branch.tip))
    }

    /// Current tip of a branch that must exist.
    pub(crate) async fn require_branch_tip(&self, name: &str) -> Result<String> {
        self.branch_tip(name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("branch {name} does not exist")))
    }

    /// Fail with `Conflict` unless `branch` still points at `expected`.
    pub(crate) async fn ensure_tip(&self, branch: &str, expected: &str) -> Result<()> {
        match self.branch_tip(branch).await? {
            Some(tip) if tip == expected => Ok(()),
            Some(tip) => Err(Error::Conflict(format!(
                "{branch} has moved: expected revision {expected}, found {tip}"
            ))),
            None => Err(Error::NotFound(format!("branch {branch} does not exist"))),
        }
    }

    /// Delete `name` now; on failure leave it to the background executor.
    pub(crate) async fn delete_branch_or_defer(&self, name: &str) {
        if let Err(err) = self
            .call("delete branch", move || self.service.delete_branch(name))
            .await
        {
            warn!(branch = name, error = %err, "deferring branch deletion");
            self.executor.delete_branch_later(&self.service, name);
        }
    }
}
