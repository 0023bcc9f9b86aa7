//! Workspace management commands
//!
//! Implements `projectflow ws new`, `ws list`, `ws status`, `ws update`,
//! `ws accept`, `ws discard` and `ws rm`.

use serde::Serialize;

use super::Session;
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput};
use crate::refs::{VersionId, WorkspaceAccessType, WorkspaceSpec, WorkspaceType};
use crate::update::{WorkspaceUpdateReport, WorkspaceUpdateStatus};
use crate::workspace::{Workspace, WorkspaceFilter};

/// Options for `projectflow ws list`
pub struct ListOptions {
    pub group: bool,
    pub user: Option<String>,
    pub patch: Option<VersionId>,
    pub access_type: WorkspaceAccessType,
}

/// Output for a single workspace in list
#[derive(Debug, Serialize)]
pub struct WorkspaceListItem {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<VersionId>,
    pub branch: String,
    pub revision_id: String,
}

impl From<Workspace> for WorkspaceListItem {
    fn from(workspace: Workspace) -> Self {
        Self {
            id: workspace.spec.workspace_id().to_string(),
            user: workspace.spec.owner_user_id().map(str::to_string),
            patch: workspace.spec.patch_version(),
            branch: workspace.branch,
            revision_id: workspace.revision_id,
        }
    }
}

fn workspace_human(header: String, workspace: &Workspace) -> HumanOutput {
    let mut human = HumanOutput::new(header);
    human.push_summary("branch", workspace.branch.clone());
    human.push_summary("revision", workspace.revision_id.clone());
    human
}

/// Run `projectflow ws new`
pub fn run_new(session: &Session, spec: &WorkspaceSpec) -> Result<()> {
    let workspace = session.block_on(|engine| engine.create_workspace(spec))?;
    let human = workspace_human(format!("Created {}", spec.describe()), &workspace);
    emit_success(session.output, "ws new", &workspace, Some(&human))
}

/// Run `projectflow ws list`
pub fn run_list(session: &Session, opts: ListOptions) -> Result<()> {
    let workspace_type = if opts.group {
        WorkspaceType::Group
    } else {
        WorkspaceType::User
    };
    let mut filter = WorkspaceFilter::new(workspace_type);
    filter.access_type = opts.access_type;
    filter.owner_user_id = opts.user;
    filter.patch_version = opts.patch;

    let workspaces = session.block_on(|engine| engine.list_workspaces(&filter))?;
    let items: Vec<WorkspaceListItem> = workspaces.into_iter().map(Into::into).collect();

    let mut human = HumanOutput::new(format!("{} workspace(s)", items.len()));
    for item in &items {
        let owner = item
            .user
            .as_deref()
            .map(|user| format!(" ({user})"))
            .unwrap_or_default();
        human.push_detail(format!("{}{owner} -> {}", item.id, item.revision_id));
    }
    emit_success(session.output, "ws list", &items, Some(&human))
}

/// Run `projectflow ws status`
pub fn run_status(session: &Session, spec: &WorkspaceSpec) -> Result<()> {
    let currency = session.block_on(|engine| engine.workspace_update_status(spec))?;

    let header = if currency.is_current {
        format!("{} is up to date", spec.describe())
    } else {
        format!("{} is behind {}", spec.describe(), currency.source_branch)
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("workspace", currency.workspace_revision_id.clone());
    human.push_summary("source", currency.source_revision_id.clone());
    human.push_summary("merge base", currency.merge_base_revision_id.clone());
    if currency.conflict_resolution_pending {
        human.push_warning("a conflict resolution is pending");
        human.push_next_step("projectflow ws accept <id>");
        human.push_next_step("projectflow ws discard <id>");
    } else if !currency.is_current {
        human.push_next_step("projectflow ws update <id>");
    }
    emit_success(session.output, "ws status", &currency, Some(&human))
}

/// Run `projectflow ws update`
pub fn run_update(session: &Session, spec: &WorkspaceSpec) -> Result<()> {
    let report = session.block_on(|engine| engine.update_workspace(spec))?;
    let human = update_human(spec, &report);
    emit_success(session.output, "ws update", &report, Some(&human))
}

fn update_human(spec: &WorkspaceSpec, report: &WorkspaceUpdateReport) -> HumanOutput {
    let header = match report.status {
        WorkspaceUpdateStatus::NoOp => format!("{} is already up to date", spec.describe()),
        WorkspaceUpdateStatus::Updated => format!("Updated {}", spec.describe()),
        WorkspaceUpdateStatus::Conflict => {
            format!("{} conflicts with its source branch", spec.describe())
        }
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("revision", report.resulting_revision_id.clone());
    if let Some(base) = &report.merge_base_revision_id {
        human.push_summary("merge base", base.clone());
    }
    if report.status == WorkspaceUpdateStatus::Conflict {
        human.push_next_step("projectflow commit <id> --resolution -F <changes.json> -m <message>");
        human.push_next_step("projectflow ws accept <id>");
    }
    human
}

/// Run `projectflow ws accept`
pub fn run_accept(session: &Session, spec: &WorkspaceSpec) -> Result<()> {
    let workspace = session.block_on(|engine| engine.accept_conflict_resolution(spec))?;
    let human = workspace_human(
        format!("Accepted conflict resolution for {}", spec.describe()),
        &workspace,
    );
    emit_success(session.output, "ws accept", &workspace, Some(&human))
}

/// Run `projectflow ws discard`
pub fn run_discard(session: &Session, spec: &WorkspaceSpec) -> Result<()> {
    let workspace = session.block_on(|engine| engine.discard_conflict_resolution(spec))?;
    let human = workspace_human(
        format!("Discarded changes of {}", spec.describe()),
        &workspace,
    );
    emit_success(session.output, "ws discard", &workspace, Some(&human))
}

#[derive(Debug, Serialize)]
struct RemoveReport<'a> {
    workspace: &'a WorkspaceSpec,
    removed: bool,
}

/// Run `projectflow ws rm`
pub fn run_rm(session: &Session, spec: &WorkspaceSpec) -> Result<()> {
    let removed = session.block_on(|engine| engine.delete_workspace(spec))?;
    if !removed {
        return Err(Error::NotFound(format!("{} does not exist", spec.describe())));
    }
    let human = HumanOutput::new(format!("Removed {}", spec.describe()));
    emit_success(
        session.output,
        "ws rm",
        &RemoveReport {
            workspace: spec,
            removed,
        },
        Some(&human),
    )
}
