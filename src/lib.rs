//! projectflow - workspace branches over a versioned repository
//!
//! This library keeps isolated workspaces on top of a versioned repository
//! service: it names their branches, commits changesets to them safely,
//! updates them against their source branch, and projects file-level
//! diffs onto logical entities.
//!
//! # Core Concepts
//!
//! - **Reference scheme**: a reversible mapping between workspaces and branch names
//! - **Changesets**: ordered file operations committed atomically, split into
//!   chunks on a temporary branch when large
//! - **Workspace update**: rebase onto the source branch, squash-and-retry, or
//!   a replayed conflict-resolution workspace
//! - **Entity diffs**: file changes interpreted through the project structure
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `.projectflow.toml`
//! - `error`: Error types, error taxonomy and exit codes
//! - `service`: The repository service contract
//! - `git`: A local bare-repository service using libgit2
//! - `merge`: In-memory commit replay used by the git service
//! - `engine`: The facade every operation runs on
//! - `refs`: The reference scheme
//! - `revision`: Revision aliases and reference sources
//! - `changeset`: File operations and the commit protocol
//! - `workspace`: Workspace lifecycle
//! - `update`: Workspace update and conflict resolution
//! - `entity`: Entity diff projection and comparisons
//! - `retry` / `background`: Retry policies and background cleanup

pub mod background;
pub mod changeset;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod entity;
pub mod error;
pub mod git;
pub mod merge;
pub mod output;
pub mod paths;
pub mod refs;
pub mod retry;
pub mod revision;
pub mod service;
pub mod temp_branch;
pub mod update;
pub mod workspace;

pub use engine::Engine;
pub use error::{Error, Result};
