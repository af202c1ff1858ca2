//! Git wrapper against real repositories.
//!
//! These tests use local temp repos and the system `git`, suitable for CI.

use std::process::Command;

use tempfile::TempDir;

use release_cycle::{ExecContext, Git};

fn git(dir: &TempDir, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir.path())
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Helper to create a temp git repo with one commit on `feat/widget`.
fn create_temp_git_repo() -> TempDir {
    let dir = TempDir::new().expect("failed to create temp dir");
    git(&dir, &["init"]);
    git(&dir, &["config", "user.email", "test@test.com"]);
    git(&dir, &["config", "user.name", "Test User"]);
    git(&dir, &["config", "commit.gpgsign", "false"]);
    std::fs::write(dir.path().join("README.md"), "# Test\n").expect("failed to create readme");
    git(&dir, &["add", "."]);
    git(&dir, &["commit", "-m", "initial"]);
    git(&dir, &["checkout", "-b", "feat/widget"]);
    dir
}

#[test]
fn reads_branch_subject_and_status() {
    let repo = create_temp_git_repo();
    let ctx = ExecContext::system(repo.path());
    let g = Git::new(&ctx);

    assert!(g.is_inside_work_tree().unwrap());
    assert_eq!(g.current_branch().unwrap(), "feat/widget");
    assert_eq!(g.last_commit_subject("feat/widget").unwrap(), "initial");
    assert_eq!(g.status_porcelain().unwrap(), "");
    assert_eq!(g.upstream("feat/widget").unwrap(), None);

    std::fs::write(repo.path().join("dirty.txt"), "x").unwrap();
    assert!(g.status_porcelain().unwrap().contains("dirty.txt"));
}

#[test]
fn detached_head_is_a_context_error() {
    let repo = create_temp_git_repo();
    git(&repo, &["checkout", "--detach"]);
    let ctx = ExecContext::system(repo.path());

    let err = Git::new(&ctx).current_branch().unwrap_err();
    assert_eq!(err.class(), "context");
}

#[test]
fn outside_a_repository_is_detected() {
    let dir = TempDir::new().unwrap();
    let ceiling = dir.path().parent().unwrap_or(dir.path()).to_path_buf();
    let ctx = ExecContext::system(dir.path())
        .with_env("GIT_CEILING_DIRECTORIES", ceiling.to_string_lossy());

    assert!(!Git::new(&ctx).is_inside_work_tree().unwrap());
}

#[test]
fn merged_branch_can_be_deleted() {
    let repo = create_temp_git_repo();
    git(&repo, &["branch", "feat/done"]);
    let ctx = ExecContext::system(repo.path());

    Git::new(&ctx).delete_branch("feat/done").unwrap();
    let output = Command::new("git")
        .args(["branch", "--list", "feat/done"])
        .current_dir(repo.path())
        .output()
        .unwrap();
    assert!(String::from_utf8_lossy(&output.stdout).trim().is_empty());
}
