//! projectflow commit command implementation
//!
//! Reads a changeset from a JSON file and submits it to a workspace branch
//! or to its conflict-resolution branch.

use std::io::Read;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::Session;
use crate::changeset::{Changeset, FileOperation};
use crate::error::Result;
use crate::output::{emit_success, HumanOutput};
use crate::refs::{WorkspaceAccessType, WorkspaceSpec};

/// Options for `projectflow commit`
pub struct CommitOptions {
    pub spec: WorkspaceSpec,
    pub file: PathBuf,
    pub message: String,
    pub expected_base: Option<String>,
    pub resolution: bool,
}

/// One entry of the changeset file. Content is text.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum OperationEntry {
    Add {
        path: String,
        content: String,
    },
    Modify {
        path: String,
        content: String,
    },
    Delete {
        path: String,
    },
    Move {
        from: String,
        to: String,
        #[serde(default)]
        content: Option<String>,
    },
}

impl From<OperationEntry> for FileOperation {
    fn from(entry: OperationEntry) -> Self {
        match entry {
            OperationEntry::Add { path, content } => FileOperation::add(path, content),
            OperationEntry::Modify { path, content } => FileOperation::modify(path, content),
            OperationEntry::Delete { path } => FileOperation::delete(path),
            OperationEntry::Move { from, to, content } => {
                FileOperation::move_to(from, to, content.map(String::into_bytes))
            }
        }
    }
}

fn parse_changeset(raw: &str) -> Result<Changeset> {
    let entries: Vec<OperationEntry> = serde_json::from_str(raw)?;
    Changeset::new(entries.into_iter().map(Into::into).collect())
}

fn read_input(file: &PathBuf) -> Result<String> {
    if file.as_os_str() == "-" {
        let mut raw = String::new();
        std::io::stdin().read_to_string(&mut raw)?;
        Ok(raw)
    } else {
        Ok(std::fs::read_to_string(file)?)
    }
}

#[derive(Debug, Serialize)]
struct CommitReport {
    branch: String,
    revision_id: String,
    operations: usize,
}

pub fn run(session: &Session, opts: CommitOptions) -> Result<()> {
    let changeset = parse_changeset(&read_input(&opts.file)?)?;
    let target = if opts.resolution {
        opts.spec
            .with_access_type(WorkspaceAccessType::ConflictResolution)
    } else {
        opts.spec.clone()
    };

    let branch = session.engine().scheme().branch_name(&target);
    let subject = target.describe();
    let (target, branch_ref, changeset_ref) = (&target, branch.as_str(), &changeset);
    let (expected_base, message) = (opts.expected_base.as_deref(), opts.message.as_str());
    let revision = session.block_on(|engine| async move {
        engine.require_workspace(target).await?;
        engine
            .submit_changeset(branch_ref, expected_base, changeset_ref, message)
            .await
            .map_err(|err| err.with_subject(branch_ref, &subject))
    })?;

    let report = CommitReport {
        branch,
        revision_id: revision.id,
        operations: changeset.len(),
    };
    let mut human = HumanOutput::new(format!("Committed to {}", target.describe()));
    human.push_summary("revision", report.revision_id.clone());
    human.push_summary("operations", report.operations.to_string());
    emit_success(session.output, "commit", &report, Some(&human))
}
