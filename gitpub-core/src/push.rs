//! Push gating
//!
//! Pushes the publish branch to origin only when it is actually ahead, and
//! reports whether anything was transmitted so the caller's build system can
//! treat an up-to-date push as a no-op.

use git2::{BranchType, PushOptions};
use tracing::{debug, info};

use crate::config::Credentials;
use crate::repo::{PublishRepo, ORIGIN_REMOTE};
use crate::sync::{remote_branch_tip, remote_callbacks};
use crate::{Error, Result};

/// Push `refs/heads/<branch>` to origin if it is ahead of the remote
///
/// Returns whether anything was transmitted. A branch with no upstream yet
/// (first publish) is treated as "must push"; with an upstream and an
/// ahead-count of zero the network is not touched at all. Authentication
/// failures, non-fast-forward rejections, and transport errors are fatal.
pub fn push_branch(
    repo: &PublishRepo,
    branch: &str,
    credentials: Option<&Credentials>,
) -> Result<bool> {
    let git = repo.inner();

    let local = match git.find_branch(branch, BranchType::Local) {
        Ok(local) => local,
        Err(_) => {
            // orphan branch that never received a commit: nothing to push
            debug!(branch, "Local branch has no commits, skipping push");
            return Ok(false);
        }
    };
    let local_tip = local.get().peel_to_commit()?.id();

    if let Ok(upstream) = local.upstream() {
        let upstream_tip = upstream.get().peel_to_commit()?.id();
        let (ahead, _behind) = git.graph_ahead_behind(local_tip, upstream_tip)?;
        if ahead == 0 {
            debug!(branch, "Branch not ahead of upstream, skipping push");
            return Ok(false);
        }
    }

    let mut origin = git.find_remote(ORIGIN_REMOTE)?;

    // a remote already at our tip means someone else transmitted it; record
    // the upstream and report a no-op
    if remote_branch_tip(&mut origin, branch, credentials) == Some(local_tip) {
        record_upstream(repo, branch, local_tip)?;
        debug!(branch, "Remote already at local tip, skipping push");
        return Ok(false);
    }

    let refspec = format!("refs/heads/{}:refs/heads/{}", branch, branch);

    let mut callbacks = remote_callbacks(credentials);
    callbacks.push_update_reference(|refname, status| match status {
        Some(message) => Err(git2::Error::from_str(&format!(
            "Push of {} rejected: {}",
            refname, message
        ))),
        None => Ok(()),
    });

    let mut options = PushOptions::new();
    options.remote_callbacks(callbacks);

    origin
        .push(&[refspec.as_str()], Some(&mut options))
        .map_err(|e| Error::Push {
            remote: ORIGIN_REMOTE.to_string(),
            source: e,
        })?;

    record_upstream(repo, branch, local_tip)?;
    info!(branch, "Pushed publish branch");
    Ok(true)
}

/// Update the tracking ref and mark origin as the branch's upstream
///
/// libgit2 does not move remote-tracking refs on push the way the git CLI
/// does, so the ref is written here before the upstream is configured.
fn record_upstream(repo: &PublishRepo, branch: &str, tip: git2::Oid) -> Result<()> {
    let git = repo.inner();

    git.reference(
        &format!("refs/remotes/{}/{}", ORIGIN_REMOTE, branch),
        tip,
        true,
        "update tracking ref after push",
    )?;

    let mut local = git.find_branch(branch, BranchType::Local)?;
    local.set_upstream(Some(&format!("{}/{}", ORIGIN_REMOTE, branch)))?;
    Ok(())
}
