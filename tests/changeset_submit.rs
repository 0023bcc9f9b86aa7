mod support;

use std::sync::Arc;

use projectflow::changeset::{Changeset, FileOperation};
use projectflow::engine::Engine;
use projectflow::error::Error;
use projectflow::service::{RepositoryService, ServiceError};
use support::{test_config, CountingCache, FaultyService, TestProject};

fn numbered_files(count: usize) -> Changeset {
    let operations = (0..count)
        .map(|i| FileOperation::add(format!("data/file-{i:04}.txt"), format!("content {i}\n")))
        .collect();
    Changeset::new(operations).expect("changeset")
}

#[tokio::test]
async fn large_changeset_matches_single_commit() {
    let project = TestProject::new();
    let main = project.mainline();
    let root = project.tip(&main).await.expect("mainline");
    project.git.create_branch("split", &root).await.expect("branch");
    project.git.create_branch("whole", &root).await.expect("branch");

    let mut unsplit = test_config();
    unsplit.commit.max_single_commit_size = 5000;
    let whole_engine = Engine::new(project.git.clone(), unsplit).expect("engine");

    let changeset = numbered_files(1000);
    let split = project
        .engine
        .submit_changeset("split", None, &changeset, "bulk import")
        .await
        .expect("split submit");
    let whole = whole_engine
        .submit_changeset("whole", None, &changeset, "bulk import")
        .await
        .expect("single submit");

    assert_eq!(split.message, "bulk import [2/2]");
    assert_eq!(whole.message, "bulk import");
    assert_eq!(project.tip("split").await.as_deref(), Some(split.id.as_str()));
    assert_eq!(project.tree_of(&split.id), project.tree_of(&whole.id));

    let history = project
        .git
        .list_revisions("split", Some(&root))
        .await
        .expect("history");
    assert_eq!(history.len(), 2);
    assert!(project.temporary_branches().await.is_empty());
}

#[tokio::test]
async fn stale_expected_base_is_rejected() {
    let project = TestProject::new();
    let main = project.mainline();
    let root = project.tip(&main).await.expect("mainline");
    project.git.create_branch("target", &root).await.expect("branch");
    let moved = project.write("target", "concurrent", &[("a.txt", "a\n")]).await;

    let changeset = Changeset::new(vec![FileOperation::add("b.txt", "b\n")]).expect("changeset");
    let err = project
        .engine
        .submit_changeset("target", Some(&root), &changeset, "late")
        .await
        .expect_err("stale base");
    assert!(matches!(err, Error::Conflict(_)), "{err:?}");
    assert_eq!(project.tip("target").await, Some(moved));
    assert_eq!(project.read("target", "b.txt").await, None);
}

#[tokio::test]
async fn stale_expected_base_is_rejected_for_split_changesets() {
    let mut config = test_config();
    config.commit.max_single_commit_size = 2;
    let project = TestProject::with_config(config);
    let main = project.mainline();
    let root = project.tip(&main).await.expect("mainline");
    project.git.create_branch("target", &root).await.expect("branch");
    let moved = project.write("target", "concurrent", &[("a.txt", "a\n")]).await;

    let err = project
        .engine
        .submit_changeset("target", Some(&root), &numbered_files(5), "late")
        .await
        .expect_err("stale base");
    assert!(matches!(err, Error::Conflict(_)), "{err:?}");
    assert_eq!(project.tip("target").await, Some(moved));
    assert!(project.temporary_branches().await.is_empty());
}

#[tokio::test]
async fn moves_carry_prior_content() {
    let project = TestProject::new();
    let main = project.mainline();
    project
        .write(&main, "seed", &[("old/a.txt", "alpha\n"), ("old/b.txt", "beta\n")])
        .await;

    let changeset = Changeset::new(vec![
        FileOperation::move_to("old/a.txt", "new/a.txt", None),
        FileOperation::move_to("old/b.txt", "new/b.txt", Some(b"rewritten\n".to_vec())),
        FileOperation::add("c.txt", "gamma\n"),
    ])
    .expect("changeset");
    project
        .engine
        .submit_changeset(&main, None, &changeset, "reorganize")
        .await
        .expect("submit");

    assert_eq!(project.read(&main, "old/a.txt").await, None);
    assert_eq!(project.read(&main, "new/a.txt").await.as_deref(), Some("alpha\n"));
    assert_eq!(project.read(&main, "new/b.txt").await.as_deref(), Some("rewritten\n"));
    assert_eq!(project.read(&main, "c.txt").await.as_deref(), Some("gamma\n"));
}

#[tokio::test]
async fn chained_moves_carry_content_forward() {
    let project = TestProject::new();
    let main = project.mainline();
    project.write(&main, "seed", &[("a.txt", "alpha\n")]).await;

    let changeset = Changeset::new(vec![
        FileOperation::move_to("a.txt", "b.txt", None),
        FileOperation::move_to("b.txt", "c.txt", None),
    ])
    .expect("changeset");
    project
        .engine
        .submit_changeset(&main, None, &changeset, "shuffle")
        .await
        .expect("submit");

    assert_eq!(project.read(&main, "a.txt").await, None);
    assert_eq!(project.read(&main, "b.txt").await, None);
    assert_eq!(project.read(&main, "c.txt").await.as_deref(), Some("alpha\n"));
}

#[tokio::test]
async fn chained_moves_span_chunks() {
    let mut config = test_config();
    config.commit.max_single_commit_size = 1;
    let project = TestProject::with_config(config);
    let main = project.mainline();
    let root = project
        .write(&main, "seed", &[("a.txt", "alpha\n"), ("x.txt", "ex\n")])
        .await;

    let changeset = Changeset::new(vec![
        FileOperation::move_to("a.txt", "b.txt", None),
        FileOperation::move_to("b.txt", "c.txt", None),
        FileOperation::modify("x.txt", "changed\n"),
    ])
    .expect("changeset");
    let revision = project
        .engine
        .submit_changeset(&main, Some(&root), &changeset, "shuffle")
        .await
        .expect("submit");

    assert_eq!(revision.message, "shuffle [3/3]");
    assert_eq!(project.read(&main, "a.txt").await, None);
    assert_eq!(project.read(&main, "b.txt").await, None);
    assert_eq!(project.read(&main, "c.txt").await.as_deref(), Some("alpha\n"));
    assert_eq!(project.read(&main, "x.txt").await.as_deref(), Some("changed\n"));
    assert!(project.temporary_branches().await.is_empty());
}

#[tokio::test]
async fn moving_a_missing_file_is_not_found() {
    let project = TestProject::new();
    let main = project.mainline();
    let changeset =
        Changeset::new(vec![FileOperation::move_to("ghost.txt", "real.txt", None)]).expect("changeset");
    let err = project
        .engine
        .submit_changeset(&main, None, &changeset, "move")
        .await
        .expect_err("missing source");
    assert!(matches!(err, Error::NotFound(_)), "{err:?}");
}

#[tokio::test]
async fn failed_chunk_is_retried_alone() {
    let mut config = test_config();
    config.commit.max_single_commit_size = 2;
    let (project, faulty) = TestProject::with_service(config, FaultyService::new);
    let main = project.mainline();
    let root = project.tip(&main).await.expect("mainline");

    faulty.pass("commit");
    faulty.fail("commit", ServiceError::Server("gateway timeout".into()));

    let revision = project
        .engine
        .submit_changeset(&main, Some(&root), &numbered_files(5), "chunked")
        .await
        .expect("submit");

    assert_eq!(faulty.calls("commit"), 4);
    assert_eq!(revision.message, "chunked [3/3]");
    for i in 0..5 {
        let path = format!("data/file-{i:04}.txt");
        assert_eq!(
            project.read(&main, &path).await,
            Some(format!("content {i}\n")),
            "{path}"
        );
    }
    let history = project
        .git
        .list_revisions(&main, Some(&root))
        .await
        .expect("history");
    assert_eq!(history.len(), 3);
    assert!(project.temporary_branches().await.is_empty());
}

#[tokio::test]
async fn lost_temporary_branch_is_recreated_from_last_chunk() {
    let mut config = test_config();
    config.commit.max_single_commit_size = 2;
    let (project, faulty) = TestProject::with_service(config, FaultyService::new);
    let main = project.mainline();
    let root = project.tip(&main).await.expect("mainline");

    faulty.pass("commit");
    faulty.lose_branch_on_commit(ServiceError::Server("connection reset".into()));

    let revision = project
        .engine
        .submit_changeset(&main, Some(&root), &numbered_files(5), "chunked")
        .await
        .expect("submit");

    assert_eq!(faulty.calls("commit"), 4);
    // temporary branch, its recreation, then the target branch
    assert_eq!(faulty.calls("create_branch"), 3);
    assert_eq!(revision.message, "chunked [3/3]");
    for i in 0..5 {
        let path = format!("data/file-{i:04}.txt");
        assert_eq!(
            project.read(&main, &path).await,
            Some(format!("content {i}\n")),
            "{path}"
        );
    }

    let history = project
        .git
        .list_revisions(&main, Some(&root))
        .await
        .expect("history");
    let messages: Vec<&str> = history.iter().rev().map(|rev| rev.message.as_str()).collect();
    assert_eq!(messages, ["chunked [1/3]", "chunked [2/3]", "chunked [3/3]"]);
    assert_eq!(history[2].parent_ids, vec![root]);
    assert_eq!(history[1].parent_ids, vec![history[2].id.clone()]);
    assert!(project.temporary_branches().await.is_empty());
}

#[tokio::test]
async fn client_errors_abort_split_commits() {
    let mut config = test_config();
    config.commit.max_single_commit_size = 2;
    let (project, faulty) = TestProject::with_service(config, FaultyService::new);
    let main = project.mainline();
    let root = project.tip(&main).await.expect("mainline");

    faulty.pass("commit");
    faulty.fail("commit", ServiceError::BadRequest("file too large".into()));

    let err = project
        .engine
        .submit_changeset(&main, None, &numbered_files(5), "chunked")
        .await
        .expect_err("client error");
    assert!(matches!(err, Error::Fatal(_)), "{err:?}");
    assert_eq!(faulty.calls("commit"), 2);
    assert_eq!(project.tip(&main).await, Some(root));
    assert!(project.temporary_branches().await.is_empty());
}

#[tokio::test]
async fn transient_failures_are_retried_then_reported() {
    let (project, faulty) = TestProject::with_service(test_config(), FaultyService::new);
    let main = project.mainline();
    let changeset = Changeset::new(vec![FileOperation::add("a.txt", "a\n")]).expect("changeset");

    faulty.fail("commit", ServiceError::RateLimited("slow down".into()));
    project
        .engine
        .submit_changeset(&main, None, &changeset, "first")
        .await
        .expect("second attempt succeeds");
    assert_eq!(faulty.calls("commit"), 2);

    let changeset = Changeset::new(vec![FileOperation::add("b.txt", "b\n")]).expect("changeset");
    for _ in 0..3 {
        faulty.fail("commit", ServiceError::Server("unavailable".into()));
    }
    let err = project
        .engine
        .submit_changeset(&main, None, &changeset, "second")
        .await
        .expect_err("retries exhausted");
    match err {
        Error::Transient { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(project.read(&main, "b.txt").await, None);
}

#[tokio::test]
async fn rejected_credentials_invalidate_the_cache() {
    let (project, faulty) = TestProject::with_service(test_config(), FaultyService::new);
    let cache = Arc::new(CountingCache::default());
    let project = project.with_credential_cache(cache.clone());
    let main = project.mainline();

    faulty.fail("commit", ServiceError::InvalidCredentials("token expired".into()));
    let changeset = Changeset::new(vec![FileOperation::add("a.txt", "a\n")]).expect("changeset");
    let err = project
        .engine
        .submit_changeset(&main, None, &changeset, "commit")
        .await
        .expect_err("expired credentials");

    assert!(matches!(err, Error::CredentialsExpired(_)), "{err:?}");
    assert_eq!(err.exit_code(), 5);
    assert_eq!(cache.invalidations(), 1);
    assert_eq!(faulty.calls("commit"), 1);

    project
        .engine
        .submit_changeset(&main, None, &changeset, "commit")
        .await
        .expect("retry succeeds");
}
