//! Credential cache seam.
//!
//! When the repository service reports an invalid credential the engine
//! invalidates the caller's cached credential and asks for the request to be
//! retried; the next request picks up a refreshed credential.

/// A cache holding the credential used for repository calls.
///
/// Installed with [`Engine::with_credential_cache`](crate::engine::Engine::with_credential_cache)
/// by callers whose service authenticates; the local git backend needs none.
pub trait CredentialCache: Send + Sync {
    fn invalidate(&self);
}
