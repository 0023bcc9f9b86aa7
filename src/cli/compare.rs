//! projectflow compare command implementation

use super::Session;
use crate::entity::EntityChangeType;
use crate::error::Result;
use crate::output::{emit_success, HumanOutput};
use crate::refs::{VersionId, WorkspaceSpec};
use crate::revision::{RefSource, RevisionRef};

/// Options for `projectflow compare`
pub struct CompareOptions {
    pub workspace: Option<WorkspaceSpec>,
    pub version: Option<VersionId>,
    pub from: RevisionRef,
    pub to: RevisionRef,
}

impl CompareOptions {
    fn source(&self) -> RefSource {
        match (&self.workspace, self.version) {
            (Some(spec), _) => RefSource::Workspace(spec.clone()),
            (None, Some(version)) => RefSource::Version(version),
            (None, None) => RefSource::Project,
        }
    }
}

fn change_label(change: EntityChangeType) -> &'static str {
    match change {
        EntityChangeType::Create => "create",
        EntityChangeType::Modify => "modify",
        EntityChangeType::Delete => "delete",
        EntityChangeType::Rename => "rename",
    }
}

pub fn run(session: &Session, opts: CompareOptions) -> Result<()> {
    let source = opts.source();
    let subject = source.describe();
    let comparison = session
        .block_on(|engine| engine.compute_comparison(source, &opts.from, &opts.to))?;

    let mut human = HumanOutput::new(format!(
        "{} entity change(s) in {subject}",
        comparison.entity_diffs.len()
    ));
    human.push_summary("from", comparison.from_revision_id.clone());
    human.push_summary("to", comparison.to_revision_id.clone());
    for diff in &comparison.entity_diffs {
        let path = match (&diff.old_entity_path, &diff.new_entity_path) {
            (Some(old), Some(new)) if old != new => format!("{old} -> {new}"),
            (_, Some(path)) | (Some(path), None) => path.clone(),
            (None, None) => continue,
        };
        human.push_detail(format!("{} {path}", change_label(diff.change_type)));
    }
    if comparison.project_configuration_updated {
        human.push_warning("project configuration changed");
    }
    emit_success(session.output, "compare", &comparison, Some(&human))
}
