//! Fire-and-forget execution of follow-up work such as branch cleanup.
//!
//! Background tasks carry their own retry policy, separate from the
//! foreground one: cleanup races with the service's own checks on a branch,
//! so conflicts are retried here while foreground calls only retry transient
//! failures. Failures are logged and never reach the caller.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::retry::RetryPolicy;
use crate::service::{RepositoryService, ServiceError, ServiceResult};

/// Errors worth repeating in the background.
fn background_retryable(err: &ServiceError) -> bool {
    !matches!(
        err,
        ServiceError::NotFound(_)
            | ServiceError::InvalidCredentials(_)
            | ServiceError::Unauthorized(_)
            | ServiceError::Forbidden(_)
    )
}

#[derive(Clone)]
pub struct BackgroundExecutor {
    policy: RetryPolicy,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl std::fmt::Debug for BackgroundExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundExecutor")
            .field("policy", &self.policy)
            .field("pending", &self.pending())
            .finish()
    }
}

impl BackgroundExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Spawn `task`, retrying it under the background policy.
    ///
    /// `task` is invoked once per attempt. Outside a tokio runtime the task is
    /// dropped with a warning.
    pub fn submit<F, Fut>(&self, description: impl Into<String>, task: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ServiceResult<()>> + Send + 'static,
    {
        let description = description.into();
        let Ok(runtime) = Handle::try_current() else {
            warn!(task = %description, "no async runtime available; background task dropped");
            return;
        };

        let policy = self.policy.clone();
        let handle = runtime.spawn(async move {
            match policy.run(&description, background_retryable, task).await {
                Ok(()) => debug!(task = %description, "background task finished"),
                Err(err) => warn!(task = %description, error = %err, "background task failed"),
            }
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Schedule deletion of a branch. Deleting an absent branch counts as done.
    pub fn delete_branch_later(&self, service: &Arc<dyn RepositoryService>, name: &str) {
        let service = Arc::clone(service);
        let name = name.to_string();
        self.submit(format!("delete branch {name}"), move || {
            let service = Arc::clone(&service);
            let name = name.clone();
            async move { service.delete_branch(&name).await.map(|_| ()) }
        });
    }

    /// Number of tasks that have not finished yet.
    pub fn pending(&self) -> usize {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.iter().filter(|task| !task.is_finished()).count()
    }

    /// Wait until every submitted task, including ones submitted meanwhile,
    /// has finished.
    pub async fn wait_idle(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = {
                let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut *tasks)
            };
            if pending.is_empty() {
                return;
            }
            for task in pending {
                if let Err(err) = task.await {
                    warn!(error = %err, "background task panicked");
                }
            }
        }
    }
}
