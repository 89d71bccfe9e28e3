//! Shelling out to `git` to resolve refs, mirroring the teacher's own
//! `std::process::Command`-based git plumbing rather than reaching for a
//! libgit2 binding.
//!
//! Grounded on `original_source/papr/git.py`'s `Git.update()`: clone into
//! `repo_dir` the first time (no `.git` present yet), fetch on every
//! subsequent call.

use std::path::Path;
use std::process::Command;

use crate::error::{PaprError, Result};
use crate::revision::Revision;

fn run_git(repo_dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .map_err(|e| PaprError::Infra(format!("failed to spawn git: {e}")))?;
    if !output.status.success() {
        return Err(PaprError::Infra(format!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Clones `repo` into `repo_dir` if it isn't a git checkout yet, matching
/// `Git.update()`'s clone-or-fetch split. Subsequent calls are no-ops here;
/// the caller's own `fetch` does the rest.
fn ensure_cloned(repo_dir: &Path, repo: &str) -> Result<()> {
    if is_git_repo(repo_dir) {
        return Ok(());
    }
    let repo_url = format!("https://github.com/{repo}.git");
    let parent = repo_dir.parent().unwrap_or(repo_dir);
    std::fs::create_dir_all(parent)?;
    let output = Command::new("git")
        .args(["clone", &repo_url, "."])
        .current_dir(repo_dir)
        .output()
        .map_err(|e| PaprError::Infra(format!("failed to spawn git: {e}")))?;
    if !output.status.success() {
        return Err(PaprError::Infra(format!(
            "git clone {repo_url:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// Fetches and checks out a branch, returning a `Revision` with
/// `head_sha == test_sha`.
pub fn resolve_branch(repo_dir: &Path, repo: &str, branch: &str) -> Result<Revision> {
    ensure_cloned(repo_dir, repo)?;
    run_git(repo_dir, &["fetch", "origin", branch])?;
    run_git(repo_dir, &["checkout", "FETCH_HEAD"])?;
    let sha = run_git(repo_dir, &["rev-parse", "HEAD"])?;
    Ok(Revision::branch(repo, branch, sha))
}

/// Resolves a pull request ref. Tries the synthetic merge ref first; if the
/// forge hasn't materialized one (conflicts, closed PR, etc.) falls back to
/// the PR head, matching §4.4 step 1.
pub fn resolve_pull(repo_dir: &Path, repo: &str, pull_id: &str) -> Result<Revision> {
    ensure_cloned(repo_dir, repo)?;
    let merge_ref = format!("refs/pull/{pull_id}/merge");
    if run_git(repo_dir, &["fetch", "origin", &merge_ref]).is_ok() {
        run_git(repo_dir, &["checkout", "FETCH_HEAD"])?;
        let merge_sha = run_git(repo_dir, &["rev-parse", "FETCH_HEAD"])?;
        let head_sha = run_git(repo_dir, &["rev-parse", "FETCH_HEAD^2"])?;
        return Ok(Revision::pull_with_merge(repo, pull_id, head_sha, merge_sha));
    }

    let head_ref = format!("refs/pull/{pull_id}/head");
    run_git(repo_dir, &["fetch", "origin", &head_ref])?;
    run_git(repo_dir, &["checkout", "FETCH_HEAD"])?;
    let sha = run_git(repo_dir, &["rev-parse", "FETCH_HEAD"])?;
    Ok(Revision::pull_head_only(repo, pull_id, sha))
}

/// Returns true if `dir` is (inside) a git working tree.
pub fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
