//! Exercises `RevisionDriver::run` end to end against a real `git`
//! checkout, the container-via-process `TestEnv` backend, an in-memory
//! `ForgeClient`, and a local-filesystem `Publisher` — the same shape as
//! the teacher's `aivcs-ci` `pipeline_integration.rs`, adapted to a
//! revision driver instead of a single pipeline run.
//!
//! The "origin" the driver fetches from is a local repository rather
//! than a forge over the network: `resolve_branch` shells out to the
//! same `git fetch`/`checkout`/`rev-parse` regardless of what the
//! remote actually is, so a `file://`-reachable local repo exercises the
//! identical code path a real GitHub remote would.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use papr_engine::{DriverOutcome, FakeForgeClient, LocalPublisher, RefKind, RevisionDriver, RunRequest};

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("git must be on PATH for this test");
    assert!(status.success(), "git {args:?} failed in {}", dir.display());
}

/// Sets up a bare-ish "origin": a real git repo with one commit carrying
/// the given suite document.
fn init_origin(dir: &Path, suite_yaml: &str) {
    git(dir, &["init", "-q", "-b", "main"]);
    git(dir, &["config", "user.email", "papr@example.com"]);
    git(dir, &["config", "user.name", "papr"]);
    std::fs::write(dir.join(".papr.yml"), suite_yaml).unwrap();
    git(dir, &["add", "."]);
    git(dir, &["commit", "-q", "-m", "initial"]);
}

/// Pre-seeds the driver's working checkout so `ensure_cloned`'s
/// `is_git_repo` check is already satisfied: the driver only ever needs
/// to fetch and check out here, never clone.
fn seed_checkout(checkout_dir: &Path, origin_dir: &Path) {
    std::fs::create_dir_all(checkout_dir).unwrap();
    git(checkout_dir, &["init", "-q"]);
    git(
        checkout_dir,
        &["remote", "add", "origin", origin_dir.to_str().unwrap()],
    );
}

#[tokio::test]
async fn full_revision_run_passes_and_publishes() {
    let origin = tempfile::tempdir().unwrap();
    init_origin(
        origin.path(),
        "context: ci/fast\ncontainer: {image: fedora}\ntests: [\"true\"]\nbranches: [main]\nrequired: true\n",
    );

    let workdir = tempfile::tempdir().unwrap();
    let checkout_root = workdir.path().join("checkout");
    seed_checkout(&checkout_root.join("owner_repo"), origin.path());

    let forge = Arc::new(FakeForgeClient::new());
    let publisher = Arc::new(LocalPublisher::new(
        workdir.path().join("published"),
        "http://artifacts.example",
    ));

    let driver = RevisionDriver {
        forge: forge.clone(),
        publisher,
        checkout_root,
        cache_root: workdir.path().join("cache"),
    };

    let outcome = driver
        .run(RunRequest {
            repo: "owner_repo".to_string(),
            ref_kind: RefKind::Branch,
            ref_name: "main".to_string(),
            expected_head_sha: None,
            suite_filter: Vec::new(),
        })
        .await
        .expect("driver run should succeed");

    let (suite_results, required_summary) = match outcome {
        DriverOutcome::Ran {
            suite_results,
            required_summary,
        } => (suite_results, required_summary),
        DriverOutcome::SoftExit(reason) => panic!("expected a run, got soft exit: {reason}"),
    };

    assert_eq!(suite_results.len(), 1);
    assert!(suite_results[0].passed());
    assert!(suite_results[0].publish_url.as_deref().unwrap().starts_with("http://artifacts.example"));

    let summary = required_summary.expect("the suite is marked required");
    assert_eq!(summary.passed, 1);
    assert_eq!(summary.total, 1);

    let statuses = forge.statuses.lock().await;
    assert!(statuses
        .iter()
        .any(|s| s.context == "ci/fast" && s.state == "success"));
    assert!(statuses
        .iter()
        .any(|s| s.context == "required" && s.state == "success"));
}

#[tokio::test]
async fn failing_suite_is_not_counted_as_required_pass() {
    let origin = tempfile::tempdir().unwrap();
    init_origin(
        origin.path(),
        "context: ci/fast\ncontainer: {image: fedora}\ntests: [\"false\"]\nbranches: [main]\nrequired: true\n",
    );

    let workdir = tempfile::tempdir().unwrap();
    let checkout_root = workdir.path().join("checkout");
    seed_checkout(&checkout_root.join("owner_repo"), origin.path());

    let forge = Arc::new(FakeForgeClient::new());
    let publisher = Arc::new(LocalPublisher::new(
        workdir.path().join("published"),
        "http://artifacts.example",
    ));

    let driver = RevisionDriver {
        forge: forge.clone(),
        publisher,
        checkout_root,
        cache_root: workdir.path().join("cache"),
    };

    let outcome = driver
        .run(RunRequest {
            repo: "owner_repo".to_string(),
            ref_kind: RefKind::Branch,
            ref_name: "main".to_string(),
            expected_head_sha: None,
            suite_filter: Vec::new(),
        })
        .await
        .expect("driver run should succeed even when the suite fails");

    let (suite_results, required_summary) = match outcome {
        DriverOutcome::Ran {
            suite_results,
            required_summary,
        } => (suite_results, required_summary),
        DriverOutcome::SoftExit(reason) => panic!("expected a run, got soft exit: {reason}"),
    };

    assert!(!suite_results[0].passed());
    let summary = required_summary.expect("the suite is marked required");
    assert_eq!(summary.passed, 0);
    assert_eq!(summary.total, 1);

    let statuses = forge.statuses.lock().await;
    assert!(statuses
        .iter()
        .any(|s| s.context == "required" && s.state == "failure"));
}

#[tokio::test]
async fn raced_ref_is_a_clean_soft_exit() {
    let origin = tempfile::tempdir().unwrap();
    init_origin(
        origin.path(),
        "context: ci/fast\ncontainer: {image: fedora}\ntests: [\"true\"]\nbranches: [main]\n",
    );

    let workdir = tempfile::tempdir().unwrap();
    let checkout_root = workdir.path().join("checkout");
    seed_checkout(&checkout_root.join("owner_repo"), origin.path());

    let forge = Arc::new(FakeForgeClient::new());
    let publisher = Arc::new(LocalPublisher::new(
        workdir.path().join("published"),
        "http://artifacts.example",
    ));

    let driver = RevisionDriver {
        forge: forge.clone(),
        publisher,
        checkout_root,
        cache_root: workdir.path().join("cache"),
    };

    let outcome = driver
        .run(RunRequest {
            repo: "owner_repo".to_string(),
            ref_kind: RefKind::Branch,
            ref_name: "main".to_string(),
            expected_head_sha: Some("not-the-real-sha".to_string()),
            suite_filter: Vec::new(),
        })
        .await
        .expect("a raced ref is not an error");

    assert!(matches!(outcome, DriverOutcome::SoftExit("ref raced")));
    assert!(forge.statuses.lock().await.is_empty());
}
