//! In-memory commit replay for rebases.
//!
//! Replays the commits of one branch onto another with libgit2 cherry-pick
//! indexes, without a working tree and without touching any reference. The
//! caller decides whether to move a branch to the resulting tip.

use git2::{Commit, Index, IndexEntry, MergeOptions, Oid, Repository, Sort};
use serde::Serialize;

/// A single merge conflict entry.
#[derive(Debug, Clone, Serialize)]
pub struct MergeConflict {
    pub path: String,
    pub kind: MergeConflictKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ancestor_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ours_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theirs_path: Option<String>,
}

/// Conflict category for high-level reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeConflictKind {
    Content,
    AddAdd,
    ModifyDelete,
    Rename,
    Unknown,
}

/// Result of replaying a branch.
#[derive(Debug, Clone)]
pub enum ReplayOutcome {
    /// Every commit applied; `tip` is the new head. Commits that became
    /// empty on top of `onto` are dropped.
    Applied { tip: Oid, replayed: usize },
    /// Replaying `commit` conflicted; nothing was written to any reference.
    Conflicted {
        commit: Oid,
        conflicts: Vec<MergeConflict>,
    },
}

/// Summarize conflicts for human-readable output.
pub fn summarize_conflicts(conflicts: &[MergeConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| format!("{} ({})", conflict.path, conflict_kind_label(conflict.kind)))
        .collect()
}

/// Commits reachable from `source` but not from `onto`, oldest first.
pub fn commits_to_replay(repo: &Repository, source: Oid, onto: Oid) -> Result<Vec<Oid>, git2::Error> {
    let mut revwalk = repo.revwalk()?;
    revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
    revwalk.push(source)?;
    revwalk.hide(onto)?;

    let mut commits = Vec::new();
    for oid in revwalk {
        commits.push(oid?);
    }
    Ok(commits)
}

/// Replay the commits of `source` onto `onto`.
pub fn replay_onto(repo: &Repository, source: Oid, onto: Oid) -> Result<ReplayOutcome, git2::Error> {
    let commits = commits_to_replay(repo, source, onto)?;
    let mut current = repo.find_commit(onto)?;
    let mut replayed = 0;

    for oid in commits {
        let commit = repo.find_commit(oid)?;
        let mainline = if commit.parent_count() > 1 { 1 } else { 0 };
        let mut merge_opts = MergeOptions::new();
        merge_opts.find_renames(true);
        let mut index = repo.cherrypick_commit(&commit, &current, mainline, Some(&mut merge_opts))?;

        if index.has_conflicts() {
            return Ok(ReplayOutcome::Conflicted {
                commit: oid,
                conflicts: collect_conflicts(&index)?,
            });
        }

        let tree_id = index.write_tree_to(repo)?;
        if tree_id == current.tree_id() {
            continue;
        }
        current = apply(repo, &commit, &current, tree_id)?;
        replayed += 1;
    }

    Ok(ReplayOutcome::Applied {
        tip: current.id(),
        replayed,
    })
}

fn apply<'r>(repo: &'r Repository, original: &Commit<'_>, parent: &Commit<'_>, tree_id: Oid) -> Result<Commit<'r>, git2::Error> {
    let tree = repo.find_tree(tree_id)?;
    let message = original.message().unwrap_or_default();
    let new_oid = repo.commit(
        None,
        &original.author(),
        &original.committer(),
        message,
        &tree,
        &[parent],
    )?;
    repo.find_commit(new_oid)
}

fn collect_conflicts(index: &Index) -> Result<Vec<MergeConflict>, git2::Error> {
    let mut conflicts = Vec::new();
    for entry in index.conflicts()? {
        let entry = entry?;
        let ancestor_path = entry.ancestor.as_ref().map(entry_path);
        let ours_path = entry.our.as_ref().map(entry_path);
        let theirs_path = entry.their.as_ref().map(entry_path);

        let kind = classify_conflict(&ancestor_path, &ours_path, &theirs_path);
        let path = primary_path(&ancestor_path, &ours_path, &theirs_path);

        conflicts.push(MergeConflict {
            path,
            kind,
            ancestor_path,
            ours_path,
            theirs_path,
        });
    }

    conflicts.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(conflicts)
}

fn entry_path(entry: &IndexEntry) -> String {
    String::from_utf8_lossy(&entry.path).into_owned()
}

fn primary_path(
    ancestor: &Option<String>,
    ours: &Option<String>,
    theirs: &Option<String>,
) -> String {
    ours.clone()
        .or_else(|| theirs.clone())
        .or_else(|| ancestor.clone())
        .unwrap_or_else(|| "<unknown>".to_string())
}

fn classify_conflict(
    ancestor: &Option<String>,
    ours: &Option<String>,
    theirs: &Option<String>,
) -> MergeConflictKind {
    let rename = paths_differ(ancestor, ours)
        || paths_differ(ancestor, theirs)
        || paths_differ(ours, theirs);

    match (ancestor.is_some(), ours.is_some(), theirs.is_some()) {
        (false, true, true) if rename => MergeConflictKind::Rename,
        (false, true, true) => MergeConflictKind::AddAdd,
        (true, true, true) if rename => MergeConflictKind::Rename,
        (true, true, true) => MergeConflictKind::Content,
        (true, true, false) | (true, false, true) if rename => MergeConflictKind::Rename,
        (true, true, false) | (true, false, true) => MergeConflictKind::ModifyDelete,
        _ => MergeConflictKind::Unknown,
    }
}

fn conflict_kind_label(kind: MergeConflictKind) -> &'static str {
    match kind {
        MergeConflictKind::Content => "content",
        MergeConflictKind::AddAdd => "add/add",
        MergeConflictKind::ModifyDelete => "modify/delete",
        MergeConflictKind::Rename => "rename",
        MergeConflictKind::Unknown => "unknown",
    }
}

fn paths_differ(left: &Option<String>, right: &Option<String>) -> bool {
    match (left, right) {
        (Some(l), Some(r)) => l != r,
        _ => false,
    }
}
