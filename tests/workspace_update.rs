mod support;

use projectflow::error::Error;
use projectflow::refs::{VersionId, WorkspaceAccessType, WorkspaceSpec};
use projectflow::engine::Engine;
use projectflow::service::{CommitAction, RepositoryService};
use projectflow::update::WorkspaceUpdateStatus;
use support::{test_config, TestProject};

fn alice(id: &str) -> WorkspaceSpec {
    WorkspaceSpec::user(id, "alice").expect("spec")
}

/// Mainline seeded with `a.txt`, plus a fresh workspace on top of it.
async fn seeded(project: &TestProject, spec: &WorkspaceSpec) -> String {
    let main = project.mainline();
    project
        .write(&main, "seed", &[("a.txt", "x\n"), ("e.txt", "keep me\n")])
        .await;
    project.engine.create_workspace(spec).await.expect("create");
    project.branch(spec)
}

async fn no_helper_branches(project: &TestProject) -> bool {
    project.settled_branch_names().await.iter().all(|name| {
        !project.engine.scheme().is_temporary_branch(name)
            && project
                .engine
                .scheme()
                .parse_branch_name(name)
                .map_or(true, |spec| spec.access_type() != WorkspaceAccessType::Backup)
    })
}

#[tokio::test]
async fn current_workspace_is_a_no_op() {
    let project = TestProject::new();
    let spec = alice("ws1");
    let branch = seeded(&project, &spec).await;
    let main_tip = project.tip(&project.mainline()).await.expect("mainline");

    for _ in 0..2 {
        let report = project.engine.update_workspace(&spec).await.expect("update");
        assert_eq!(report.status, WorkspaceUpdateStatus::NoOp);
        assert_eq!(report.merge_base_revision_id.as_deref(), Some(main_tip.as_str()));
        assert_eq!(report.resulting_revision_id, main_tip);
    }

    let ahead = project.write(&branch, "work", &[("b.txt", "b\n")]).await;
    let report = project.engine.update_workspace(&spec).await.expect("update");
    assert_eq!(report.status, WorkspaceUpdateStatus::NoOp);
    assert_eq!(report.resulting_revision_id, ahead);
    assert_eq!(project.tip(&branch).await, Some(ahead));
}

#[tokio::test]
async fn behind_workspace_is_rebased() {
    let project = TestProject::new();
    let main = project.mainline();
    let spec = alice("ws1");
    let branch = seeded(&project, &spec).await;
    let base = project.tip(&main).await.expect("mainline");

    project.write(&branch, "workspace change", &[("b.txt", "b\n")]).await;
    let main_tip = project.write(&main, "mainline change", &[("c.txt", "c\n")]).await;

    let status = project
        .engine
        .workspace_update_status(&spec)
        .await
        .expect("status");
    assert!(!status.is_current);
    assert_eq!(status.merge_base_revision_id, base);
    assert_eq!(status.source_revision_id, main_tip);

    let report = project.engine.update_workspace(&spec).await.expect("update");
    assert_eq!(report.status, WorkspaceUpdateStatus::Updated);
    assert_eq!(report.merge_base_revision_id.as_deref(), Some(base.as_str()));
    assert_eq!(project.tip(&branch).await.as_deref(), Some(report.resulting_revision_id.as_str()));

    let tip = project
        .git
        .get_revision(&report.resulting_revision_id)
        .await
        .expect("revision")
        .expect("exists");
    assert_eq!(tip.parent_ids, vec![main_tip.clone()]);
    assert_eq!(tip.message, "workspace change");
    assert_eq!(project.read(&branch, "b.txt").await.as_deref(), Some("b\n"));
    assert_eq!(project.read(&branch, "c.txt").await.as_deref(), Some("c\n"));
    assert!(no_helper_branches(&project).await);

    let again = project.engine.update_workspace(&spec).await.expect("update");
    assert_eq!(again.status, WorkspaceUpdateStatus::NoOp);
    assert_eq!(again.resulting_revision_id, report.resulting_revision_id);
}

#[tokio::test]
async fn reverted_conflicts_are_squashed_away() {
    let project = TestProject::new();
    let main = project.mainline();
    let spec = alice("ws1");
    let branch = seeded(&project, &spec).await;

    let seed = project.tip(&main).await.expect("mainline");
    project.write(&branch, "try", &[("a.txt", "conflict\n")]).await;
    project
        .write(&branch, "undo", &[("a.txt", "x\n"), ("b.txt", "b\n")])
        .await;
    let main_tip = project.write(&main, "mainline", &[("a.txt", "main\n")]).await;

    let report = project.engine.update_workspace(&spec).await.expect("update");
    assert_eq!(report.status, WorkspaceUpdateStatus::Updated);
    assert_eq!(report.merge_base_revision_id.as_deref(), Some(seed.as_str()));
    assert_eq!(project.read(&branch, "a.txt").await.as_deref(), Some("main\n"));
    assert_eq!(project.read(&branch, "b.txt").await.as_deref(), Some("b\n"));

    // The reported revision is the squashed commit on the merge base, while
    // the workspace itself moved onto the rebased copy on mainline.
    let squashed = project
        .git
        .get_revision(&report.resulting_revision_id)
        .await
        .expect("read revision")
        .expect("squashed commit");
    assert_eq!(squashed.parent_ids, vec![seed]);
    assert_eq!(
        project.read(&report.resulting_revision_id, "b.txt").await.as_deref(),
        Some("b\n")
    );
    let tip = project.tip(&branch).await.expect("workspace");
    assert_ne!(tip, report.resulting_revision_id);
    let adopted = project
        .git
        .get_revision(&tip)
        .await
        .expect("read revision")
        .expect("workspace tip");
    assert_eq!(adopted.parent_ids, vec![main_tip.clone()]);

    let history = project
        .git
        .list_revisions(&branch, Some(&main_tip))
        .await
        .expect("history");
    assert_eq!(history.len(), 1, "changes are squashed into one commit");
    assert!(no_helper_branches(&project).await);
}

#[tokio::test]
async fn squash_threshold_is_configurable() {
    let mut config = test_config();
    config.update.squash_min_commits = 3;
    let project = TestProject::with_config(config);
    let main = project.mainline();
    let spec = alice("ws1");
    let branch = seeded(&project, &spec).await;

    project.write(&branch, "try", &[("a.txt", "conflict\n")]).await;
    project
        .write(&branch, "undo", &[("a.txt", "x\n"), ("b.txt", "b\n")])
        .await;
    project.write(&main, "mainline", &[("a.txt", "main\n")]).await;

    let report = project.engine.update_workspace(&spec).await.expect("update");
    assert_eq!(report.status, WorkspaceUpdateStatus::Conflict);
}

#[tokio::test]
async fn conflicting_workspace_gets_a_resolution_branch() {
    let project = TestProject::new();
    let main = project.mainline();
    let spec = alice("ws1");
    let branch = seeded(&project, &spec).await;
    let base = project.tip(&main).await.expect("mainline");

    let workspace_tip = project
        .write(&branch, "edit", &[("a.txt", "mine\n"), ("b.txt", "b\n")])
        .await;
    let main_tip = project.write(&main, "mainline", &[("a.txt", "theirs\n")]).await;

    let report = project.engine.update_workspace(&spec).await.expect("update");
    assert_eq!(report.status, WorkspaceUpdateStatus::Conflict);
    assert_eq!(report.merge_base_revision_id.as_deref(), Some(base.as_str()));
    assert_eq!(project.tip(&branch).await, Some(workspace_tip));

    let resolution = project.branch(&spec.with_access_type(WorkspaceAccessType::ConflictResolution));
    assert_eq!(
        project.tip(&resolution).await.as_deref(),
        Some(report.resulting_revision_id.as_str())
    );
    let replayed = project
        .git
        .get_revision(&report.resulting_revision_id)
        .await
        .expect("revision")
        .expect("exists");
    assert_eq!(replayed.parent_ids, vec![main_tip]);
    assert_eq!(project.read(&resolution, "a.txt").await.as_deref(), Some("mine\n"));
    assert_eq!(project.read(&resolution, "b.txt").await.as_deref(), Some("b\n"));

    let status = project
        .engine
        .workspace_update_status(&spec)
        .await
        .expect("status");
    assert!(status.conflict_resolution_pending);
    assert!(!status.is_current);

    let accepted = project
        .engine
        .accept_conflict_resolution(&spec)
        .await
        .expect("accept");
    assert_eq!(accepted.revision_id, report.resulting_revision_id);
    assert_eq!(project.tip(&branch).await, Some(accepted.revision_id.clone()));
    assert_eq!(project.tip(&resolution).await, None);
    assert!(no_helper_branches(&project).await);

    let after = project.engine.update_workspace(&spec).await.expect("update");
    assert_eq!(after.status, WorkspaceUpdateStatus::NoOp);
}

#[tokio::test]
async fn resolution_replays_deletes_and_renames() {
    let project = TestProject::new();
    let main = project.mainline();
    let spec = alice("ws1");
    let branch = seeded(&project, &spec).await;

    let git = &project.git;
    git.commit(
        &branch,
        "reshape",
        &[
            CommitAction::Update {
                path: "a.txt".into(),
                content: b"mine\n".to_vec(),
            },
            CommitAction::Move {
                previous_path: "e.txt".into(),
                path: "f.txt".into(),
                content: b"keep me\n".to_vec(),
            },
        ],
    )
    .await
    .expect("commit");
    project.write(&main, "mainline", &[("a.txt", "theirs\n"), ("g.txt", "g\n")]).await;
    project.write(&branch, "cleanup", &[("h.txt", "h\n")]).await;
    project.remove(&branch, "drop", "h.txt").await;

    let mut config = test_config();
    config.update.squash_min_commits = 10;
    let strict = Engine::new(project.git.clone(), config).expect("engine");
    let report = strict.update_workspace(&spec).await.expect("update");
    assert_eq!(report.status, WorkspaceUpdateStatus::Conflict);

    let resolution = project.branch(&spec.with_access_type(WorkspaceAccessType::ConflictResolution));
    assert_eq!(project.read(&resolution, "a.txt").await.as_deref(), Some("mine\n"));
    assert_eq!(project.read(&resolution, "e.txt").await, None);
    assert_eq!(project.read(&resolution, "f.txt").await.as_deref(), Some("keep me\n"));
    assert_eq!(project.read(&resolution, "g.txt").await.as_deref(), Some("g\n"));
    assert_eq!(project.read(&resolution, "h.txt").await, None);
    strict.executor().wait_idle().await;
}

#[tokio::test]
async fn discarding_resets_to_the_source_branch() {
    let project = TestProject::new();
    let main = project.mainline();
    let spec = alice("ws1");
    let branch = seeded(&project, &spec).await;

    project.write(&branch, "edit", &[("a.txt", "mine\n")]).await;
    let main_tip = project.write(&main, "mainline", &[("a.txt", "theirs\n")]).await;
    let report = project.engine.update_workspace(&spec).await.expect("update");
    assert_eq!(report.status, WorkspaceUpdateStatus::Conflict);

    let discarded = project
        .engine
        .discard_conflict_resolution(&spec)
        .await
        .expect("discard");
    assert_eq!(discarded.revision_id, main_tip);
    assert_eq!(project.tip(&branch).await, Some(main_tip));
    let resolution = project.branch(&spec.with_access_type(WorkspaceAccessType::ConflictResolution));
    assert_eq!(project.tip(&resolution).await, None);
    assert!(no_helper_branches(&project).await);

    let err = project
        .engine
        .discard_conflict_resolution(&spec)
        .await
        .expect_err("nothing to discard");
    assert!(matches!(err, Error::NotFound(_)), "{err:?}");
}

#[tokio::test]
async fn patch_workspaces_follow_their_release_branch() {
    let project = TestProject::new();
    let main = project.mainline();
    project.write(&main, "seed", &[("a.txt", "x\n")]).await;
    let version = VersionId::new(1, 0, 0);
    let release = project.engine.scheme().patch_branch_name(version);
    let root = project.tip(&main).await.expect("mainline");
    project.git.create_branch(&release, &root).await.expect("release branch");

    let spec = alice("fix").with_patch_version(version);
    let workspace = project.engine.create_workspace(&spec).await.expect("create");
    assert_eq!(workspace.branch, "patch/1.0.0/workspace/alice/fix");

    project.write(&workspace.branch, "fix", &[("fix.txt", "fix\n")]).await;
    let release_tip = project.write(&release, "backport", &[("r.txt", "r\n")]).await;
    project.write(&main, "feature", &[("m.txt", "m\n")]).await;

    let report = project.engine.update_workspace(&spec).await.expect("update");
    assert_eq!(report.status, WorkspaceUpdateStatus::Updated);
    let tip = project
        .git
        .get_revision(&report.resulting_revision_id)
        .await
        .expect("revision")
        .expect("exists");
    assert_eq!(tip.parent_ids, vec![release_tip]);
    assert_eq!(project.read(&workspace.branch, "r.txt").await.as_deref(), Some("r\n"));
    assert_eq!(project.read(&workspace.branch, "m.txt").await, None);
}

#[tokio::test]
async fn missing_workspace_is_reported_by_name() {
    let project = TestProject::new();
    let err = project
        .engine
        .update_workspace(&alice("ghost"))
        .await
        .expect_err("missing workspace");
    assert!(matches!(err, Error::NotFound(_)), "{err:?}");
    let message = err.to_string();
    assert!(message.contains("workspace 'ghost' of user 'alice'"), "{message}");
    assert!(!message.contains("workspace/alice/ghost"), "{message}");
}

#[tokio::test]
async fn derived_branches_cannot_be_updated_directly() {
    let project = TestProject::new();
    let spec = alice("ws1").with_access_type(WorkspaceAccessType::Backup);
    let err = project
        .engine
        .update_workspace(&spec)
        .await
        .expect_err("backup branch");
    assert!(matches!(err, Error::InvalidArgument(_)), "{err:?}");
}
