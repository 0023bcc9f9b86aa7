//! Command-line interface for projectflow
//!
//! This module defines the CLI structure using clap derive macros.
//! Each command group is defined in its own submodule and runs against a
//! [`Session`] over a local bare repository.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use crate::config::Config;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::git::GitRepositoryService;
use crate::output::OutputOptions;
use crate::refs::{VersionId, WorkspaceAccessType, WorkspaceSpec};

mod commit;
mod compare;
mod init;
mod ws;

/// projectflow - workspace branches over a versioned repository
///
/// Creates isolated workspaces, commits changesets to them, keeps them up
/// to date with their source branch, and compares revisions entity by entity.
#[derive(Parser, Debug)]
#[command(name = "projectflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the bare repository (defaults to current directory)
    #[arg(long, global = true, env = "PROJECTFLOW_REPO")]
    pub repo: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a bare repository with an initial mainline commit
    Init {
        /// Mainline branch name (defaults to the configured mainline)
        #[arg(long)]
        mainline: Option<String>,
    },

    /// Workspace management
    #[command(subcommand)]
    Ws(WsCommands),

    /// Commit a changeset read from a JSON file to a workspace
    Commit {
        #[command(flatten)]
        workspace: WorkspaceArgs,

        /// JSON file with the list of file operations ("-" for stdin)
        #[arg(short = 'F', long)]
        file: PathBuf,

        /// Commit message
        #[arg(short, long)]
        message: String,

        /// Fail unless the workspace still points at this revision
        #[arg(long)]
        expected_base: Option<String>,

        /// Commit to the workspace's conflict-resolution branch
        #[arg(long)]
        resolution: bool,
    },

    /// Compare two revisions entity by entity
    #[command(disable_version_flag = true)]
    Compare {
        /// Workspace to resolve revision aliases against (defaults to the project)
        #[arg(long)]
        workspace: Option<String>,

        /// Owner of a user workspace; without it the workspace is a group workspace
        #[arg(long, requires = "workspace")]
        user: Option<String>,

        /// Patch release the workspace belongs to
        #[arg(long, requires = "workspace")]
        patch: Option<String>,

        /// Resolve aliases against a released version instead
        #[arg(long, conflicts_with = "workspace")]
        version: Option<String>,

        /// Older side: BASE, HEAD or a revision id
        #[arg(long, default_value = "BASE")]
        from: String,

        /// Newer side: BASE, HEAD or a revision id
        #[arg(long, default_value = "HEAD")]
        to: String,
    },
}

/// Workspace subcommands
#[derive(Subcommand, Debug)]
pub enum WsCommands {
    /// Create a workspace at the tip of its source branch
    New {
        #[command(flatten)]
        workspace: WorkspaceArgs,
    },

    /// List workspaces
    List {
        /// List group workspaces instead of user workspaces
        #[arg(long)]
        group: bool,

        /// Only workspaces of this user
        #[arg(long)]
        user: Option<String>,

        /// Only workspaces of this patch release
        #[arg(long)]
        patch: Option<String>,

        /// Branch kind to list: workspace, conflict-resolution, backup
        #[arg(long, default_value = "workspace")]
        access: String,
    },

    /// Show whether a workspace is behind its source branch
    Status {
        #[command(flatten)]
        workspace: WorkspaceArgs,
    },

    /// Update a workspace against its source branch
    Update {
        #[command(flatten)]
        workspace: WorkspaceArgs,
    },

    /// Make the conflict resolution the new workspace content
    Accept {
        #[command(flatten)]
        workspace: WorkspaceArgs,
    },

    /// Reset the workspace to its source branch, dropping its changes
    Discard {
        #[command(flatten)]
        workspace: WorkspaceArgs,
    },

    /// Remove a workspace with its conflict-resolution and backup branches
    Rm {
        #[command(flatten)]
        workspace: WorkspaceArgs,
    },
}

/// Identifies one workspace on the command line.
#[derive(Args, Debug, Clone)]
pub struct WorkspaceArgs {
    /// Workspace id
    pub id: String,

    /// Treat the workspace as a group workspace
    #[arg(long)]
    pub group: bool,

    /// Owner of a user workspace
    #[arg(long, env = "PROJECTFLOW_USER")]
    pub user: Option<String>,

    /// Patch release the workspace belongs to
    #[arg(long)]
    pub patch: Option<String>,
}

impl WorkspaceArgs {
    pub fn spec(&self) -> Result<WorkspaceSpec> {
        workspace_spec(&self.id, self.group, self.user.as_deref(), self.patch.as_deref())
    }
}

fn workspace_spec(
    id: &str,
    group: bool,
    user: Option<&str>,
    patch: Option<&str>,
) -> Result<WorkspaceSpec> {
    let spec = if group {
        WorkspaceSpec::group(id)?
    } else {
        let user = user.ok_or_else(|| {
            Error::InvalidArgument(
                "user workspaces need --user (or PROJECTFLOW_USER); pass --group for a group workspace"
                    .to_string(),
            )
        })?;
        WorkspaceSpec::user(id, user)?
    };
    match patch {
        Some(raw) => Ok(spec.with_patch_version(raw.parse::<VersionId>()?)),
        None => Ok(spec),
    }
}

fn parse_access_type(raw: &str) -> Result<WorkspaceAccessType> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "workspace" => Ok(WorkspaceAccessType::Workspace),
        "conflict-resolution" | "resolution" => Ok(WorkspaceAccessType::ConflictResolution),
        "backup" => Ok(WorkspaceAccessType::Backup),
        other => Err(Error::InvalidArgument(format!(
            "unknown branch kind '{other}': expected workspace, conflict-resolution or backup"
        ))),
    }
}

/// An engine over the repository named on the command line, with the
/// runtime it runs on.
pub struct Session {
    runtime: tokio::runtime::Runtime,
    engine: Engine,
    pub output: OutputOptions,
}

impl Session {
    fn open(repo: Option<PathBuf>, output: OutputOptions) -> Result<Self> {
        let path = match repo {
            Some(path) => path,
            None => std::env::current_dir()?,
        };
        let config = Config::load_from_repo(&path);
        let service = GitRepositoryService::open(&path, config.author.clone())?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let engine = Engine::new(Arc::new(service), config)?;
        Ok(Self {
            runtime,
            engine,
            output,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run `operation` to completion, then drain background cleanup.
    pub fn block_on<'s, T, F, Fut>(&'s self, operation: F) -> Result<T>
    where
        F: FnOnce(&'s Engine) -> Fut,
        Fut: Future<Output = Result<T>> + 's,
    {
        self.runtime.block_on(async {
            let result = operation(&self.engine).await;
            self.engine.executor().wait_idle().await;
            result
        })
    }
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let output = OutputOptions {
            json: self.json,
            quiet: self.quiet,
        };
        if let Commands::Init { mainline } = &self.command {
            return init::run(self.repo, mainline.clone(), output);
        }

        let session = Session::open(self.repo, output)?;
        match self.command {
            Commands::Init { .. } => Ok(()),
            Commands::Ws(cmd) => match cmd {
                WsCommands::New { workspace } => ws::run_new(&session, &workspace.spec()?),
                WsCommands::List {
                    group,
                    user,
                    patch,
                    access,
                } => ws::run_list(
                    &session,
                    ws::ListOptions {
                        group,
                        user,
                        patch: patch.as_deref().map(str::parse).transpose()?,
                        access_type: parse_access_type(&access)?,
                    },
                ),
                WsCommands::Status { workspace } => ws::run_status(&session, &workspace.spec()?),
                WsCommands::Update { workspace } => ws::run_update(&session, &workspace.spec()?),
                WsCommands::Accept { workspace } => ws::run_accept(&session, &workspace.spec()?),
                WsCommands::Discard { workspace } => {
                    ws::run_discard(&session, &workspace.spec()?)
                }
                WsCommands::Rm { workspace } => ws::run_rm(&session, &workspace.spec()?),
            },
            Commands::Commit {
                workspace,
                file,
                message,
                expected_base,
                resolution,
            } => commit::run(
                &session,
                commit::CommitOptions {
                    spec: workspace.spec()?,
                    file,
                    message,
                    expected_base,
                    resolution,
                },
            ),
            Commands::Compare {
                workspace,
                user,
                patch,
                version,
                from,
                to,
            } => {
                let workspace = workspace
                    .as_deref()
                    .map(|id| workspace_spec(id, user.is_none(), user.as_deref(), patch.as_deref()))
                    .transpose()?;
                compare::run(
                    &session,
                    compare::CompareOptions {
                        workspace,
                        version: version.as_deref().map(str::parse).transpose()?,
                        from: from.parse()?,
                        to: to.parse()?,
                    },
                )
            }
        }
    }
}
