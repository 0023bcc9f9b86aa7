//! Scoped temporary branches.
//!
//! A [`TemporaryBranch`] is created under the temporary namespace, used for
//! split commits or integration attempts, and deleted when it goes out of
//! scope. Deletion is handed to the background executor on every exit path,
//! including early returns through `?`, so the caller never waits for it.

use std::sync::Arc;

use tracing::debug;

use crate::background::BackgroundExecutor;
use crate::engine::Engine;
use crate::error::Result;
use crate::service::RepositoryService;

pub struct TemporaryBranch {
    service: Arc<dyn RepositoryService>,
    executor: BackgroundExecutor,
    name: String,
    tip: String,
    released: bool,
}

impl std::fmt::Debug for TemporaryBranch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporaryBranch")
            .field("name", &self.name)
            .field("tip", &self.tip)
            .finish_non_exhaustive()
    }
}

impl TemporaryBranch {
    /// Create a uniquely named branch at `from_revision`.
    pub async fn create(engine: &Engine, from_revision: &str) -> Result<Self> {
        let name = engine.scheme().temporary_branch_name();
        let service = engine.service();
        let branch = engine
            .call("create temporary branch", || {
                service.create_branch(&name, from_revision)
            })
            .await?;
        debug!(branch = %name, revision = from_revision, "created temporary branch");
        Ok(Self {
            service: Arc::clone(service),
            executor: engine.executor().clone(),
            name,
            tip: branch.tip,
            released: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last tip this handle observed or committed.
    pub fn tip(&self) -> &str {
        &self.tip
    }

    pub fn set_tip(&mut self, tip: impl Into<String>) {
        self.tip = tip.into();
    }

    /// Point the branch at `revision` by deleting and recreating it.
    pub async fn reset(&mut self, engine: &Engine, revision: &str) -> Result<()> {
        let service = engine.service();
        let name = self.name.as_str();
        engine
            .call("delete temporary branch", || service.delete_branch(name))
            .await?;
        let branch = engine
            .call("recreate temporary branch", || {
                service.create_branch(name, revision)
            })
            .await?;
        debug!(branch = %self.name, revision, "reset temporary branch");
        self.tip = branch.tip;
        Ok(())
    }

    /// Release the branch and schedule its deletion.
    pub fn close(self) {
        drop(self);
    }

    /// Release the handle without deleting the branch, returning its name.
    pub fn persist(mut self) -> String {
        self.released = true;
        std::mem::take(&mut self.name)
    }
}

impl Drop for TemporaryBranch {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.executor.delete_branch_later(&self.service, &self.name);
        }
    }
}
