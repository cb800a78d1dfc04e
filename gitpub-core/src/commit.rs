//! Change detection and commit
//!
//! Stages everything in the working tree (adds, modifications, deletions),
//! then commits only when something actually changed. Re-running with
//! unchanged content is a no-op, which is what lets the caller's build
//! system skip downstream work.

use std::io::Write;
use std::process::{Command, Stdio};

use git2::{IndexAddOption, Signature, StatusOptions};
use tracing::{debug, info};

use crate::repo::PublishRepo;
use crate::{Error, Result};

/// Commit author override; falls back to the ambient git identity
#[derive(Debug, Clone, Default)]
pub struct AuthorOverride {
    /// Author name
    pub name: Option<String>,
    /// Author email
    pub email: Option<String>,
}

/// Stage all changes and commit them if the tree differs from HEAD
///
/// Returns whether a commit was created. An explicit `sign` preference is
/// applied as given; when absent, the repository's effective
/// `commit.gpgsign` configuration decides.
pub fn commit_changes(
    repo: &PublishRepo,
    message: &str,
    sign: Option<bool>,
    author: &AuthorOverride,
) -> Result<bool> {
    stage_all(repo)?;

    if worktree_clean(repo)? {
        debug!("Working tree clean, nothing to commit");
        return Ok(false);
    }

    if effective_sign(repo, sign) {
        commit_signed(repo, message)?;
    } else {
        commit_unsigned(repo, message, author)?;
    }

    info!(message, "Created publish commit");
    Ok(true)
}

/// Stage adds, modifications, and deletions across the whole tree
fn stage_all(repo: &PublishRepo) -> Result<()> {
    let mut index = repo.inner().index()?;
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
    index.update_all(["*"].iter(), None)?;
    index.write()?;
    Ok(())
}

/// Whether index and working tree both match the last commit
fn worktree_clean(repo: &PublishRepo) -> Result<bool> {
    let mut options = StatusOptions::new();
    options
        .include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false);

    let statuses = repo.inner().statuses(Some(&mut options))?;
    Ok(statuses.is_empty())
}

fn effective_sign(repo: &PublishRepo, sign: Option<bool>) -> bool {
    match sign {
        Some(explicit) => explicit,
        None => repo
            .inner()
            .config()
            .and_then(|config| config.get_bool("commit.gpgsign"))
            .unwrap_or(false),
    }
}

/// Create the commit through git2
fn commit_unsigned(repo: &PublishRepo, message: &str, author: &AuthorOverride) -> Result<()> {
    let git = repo.inner();

    let signature = match (author.name.as_deref(), author.email.as_deref()) {
        (Some(name), Some(email)) => Signature::now(name, email)?,
        _ => git
            .signature()
            .map_err(|e| Error::Commit(e.message().to_string()))?,
    };

    let mut index = git.index()?;
    let tree = git.find_tree(index.write_tree()?)?;

    // unborn HEAD means this is the orphan branch's first commit
    let parent = match git.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        Err(e) if e.code() == git2::ErrorCode::UnbornBranch => None,
        Err(e) => return Err(e.into()),
    };
    let parents: Vec<&git2::Commit> = parent.iter().collect();

    git.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
    Ok(())
}

/// Create a GPG-signed commit by shelling out
///
/// libgit2 cannot invoke a signing program, so signing goes through the git
/// binary with the message on stdin.
fn commit_signed(repo: &PublishRepo, message: &str) -> Result<()> {
    let mut child = Command::new("git")
        .args(["commit", "--gpg-sign", "--file", "-"])
        .current_dir(repo.workdir())
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Commit(format!("Failed to run git commit: {}", e)))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(message.as_bytes())
            .map_err(|e| Error::Commit(format!("Failed to pass commit message: {}", e)))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| Error::Commit(format!("Failed to run git commit: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Commit(stderr.trim().to_string()));
    }

    Ok(())
}
