//! Branch synchronization
//!
//! Brings the publish clone's branch in line with the remote before new
//! content is deposited: fetch and hard-reset when the remote branch exists,
//! or start an orphan branch when it does not (the first-ever publish). When
//! a reference remote is configured it is probed and fetched first, so its
//! objects are available to speed up the origin fetch.

use std::fs;
use std::path::Path;

use git2::build::CheckoutBuilder;
use git2::{
    AutotagOption, BranchType, Cred, CredentialType, Direction, FetchOptions, Oid, Remote,
    RemoteCallbacks, ResetType,
};
use tracing::{debug, info, warn};

use crate::config::{Credentials, PublishSettings};
use crate::repo::{PublishRepo, ORIGIN_REMOTE, REFERENCE_REMOTE};
use crate::{Error, Result};

/// Synchronize the publish branch with the remote
///
/// Postcondition: the clone's current branch is `settings.branch` and the
/// working tree matches either the remote branch tip or an empty orphan
/// state.
pub fn synchronize(
    repo: &PublishRepo,
    settings: &PublishSettings,
    credentials: Option<&Credentials>,
) -> Result<()> {
    let branch = settings.branch.as_str();

    if settings.reference_uri.is_some() {
        warm_from_reference(repo, branch, credentials)?;
    }

    let mut origin = repo.inner().find_remote(ORIGIN_REMOTE)?;

    match remote_branch_tip(&mut origin, branch, credentials) {
        Some(tip) => {
            debug!(%tip, branch, "Remote branch found, resetting to its tip");
            fetch_branch(
                &mut origin,
                ORIGIN_REMOTE,
                branch,
                settings.fetch_depth,
                credentials,
            )?;
            reset_to_fetched(repo, branch)
        }
        None => {
            info!(branch, "Remote branch not found, starting an orphan branch");
            orphan_branch(repo, branch)
        }
    }
}

/// Probe the reference remote for the branch and fetch it if present
///
/// This only populates the object store and a tracking ref under the
/// reference namespace; the working branch is untouched.
fn warm_from_reference(
    repo: &PublishRepo,
    branch: &str,
    credentials: Option<&Credentials>,
) -> Result<()> {
    let mut reference = match repo.inner().find_remote(REFERENCE_REMOTE) {
        Ok(remote) => remote,
        Err(e) => {
            debug!(error = %e, "Reference remote not registered, skipping warm-up fetch");
            return Ok(());
        }
    };

    if remote_branch_tip(&mut reference, branch, credentials).is_some() {
        fetch_branch(&mut reference, REFERENCE_REMOTE, branch, None, credentials)?;
    }

    Ok(())
}

/// Look up the advertised tip of `refs/heads/<branch>` on a remote
///
/// Equivalent of `git ls-remote --heads`. Connection or listing failures are
/// logged and reported as "branch absent"; the fetch or push that follows
/// surfaces real transport errors.
pub(crate) fn remote_branch_tip(
    remote: &mut Remote<'_>,
    branch: &str,
    credentials: Option<&Credentials>,
) -> Option<Oid> {
    let refname = format!("refs/heads/{}", branch);

    let connection =
        match remote.connect_auth(Direction::Fetch, Some(remote_callbacks(credentials)), None) {
            Ok(connection) => connection,
            Err(e) => {
                warn!(error = %e, "Failed to probe remote, treating branch as absent");
                return None;
            }
        };

    match connection.list() {
        Ok(heads) => heads
            .iter()
            .find(|head| head.name() == refname)
            .map(|head| head.oid()),
        Err(e) => {
            warn!(error = %e, "Failed to list remote refs, treating branch as absent");
            None
        }
    }
}

/// Fetch one branch into its remote-tracking ref, tags excluded
fn fetch_branch(
    remote: &mut Remote<'_>,
    remote_name: &str,
    branch: &str,
    depth: Option<u32>,
    credentials: Option<&Credentials>,
) -> Result<()> {
    let refspec = format!("+refs/heads/{}:refs/remotes/{}/{}", branch, remote_name, branch);

    let mut options = FetchOptions::new();
    options.remote_callbacks(remote_callbacks(credentials));
    options.download_tags(AutotagOption::None);
    if let Some(depth) = depth {
        options.depth(depth as i32);
    }

    remote
        .fetch(&[refspec.as_str()], Some(&mut options), None)
        .map_err(|e| Error::Fetch {
            remote: remote_name.to_string(),
            source: e,
        })
}

/// Point the local branch at the fetched tracking ref and force the working
/// tree to match it exactly
///
/// Untracked and ignored files are removed as part of the reset, so the tree
/// holds only the remote's committed state.
fn reset_to_fetched(repo: &PublishRepo, branch: &str) -> Result<()> {
    let git = repo.inner();

    let tracking = git.find_reference(&format!("refs/remotes/{}/{}", ORIGIN_REMOTE, branch))?;
    let commit = tracking.peel_to_commit()?;

    if git.find_branch(branch, BranchType::Local).is_err() {
        git.branch(branch, &commit, false)?;
    }
    git.set_head(&format!("refs/heads/{}", branch))?;

    let mut checkout = CheckoutBuilder::new();
    checkout
        .force()
        .remove_untracked(true)
        .remove_ignored(true);
    git.reset(commit.as_object(), ResetType::Hard, Some(&mut checkout))?;

    Ok(())
}

/// Switch to an unborn branch with an empty index and working tree
fn orphan_branch(repo: &PublishRepo, branch: &str) -> Result<()> {
    let git = repo.inner();
    let refname = format!("refs/heads/{}", branch);

    // drop any stale local branch so the new history starts unborn
    if let Ok(mut stale) = git.find_reference(&refname) {
        stale.delete()?;
    }
    git.set_head(&refname)?;

    let mut index = git.index()?;
    index.clear()?;
    index.write()?;

    wipe_worktree(repo.workdir())
}

/// Remove everything in the working tree except the repository metadata
fn wipe_worktree(workdir: &Path) -> Result<()> {
    for entry in fs::read_dir(workdir)? {
        let entry = entry?;
        if entry.file_name() == ".git" {
            continue;
        }

        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }

    Ok(())
}

/// Build remote callbacks carrying per-invocation credentials
///
/// Configured username/password is offered as plaintext (HTTP remotes);
/// otherwise ssh-agent and default credentials are tried. Nothing is ever
/// written into the clone's git config.
pub(crate) fn remote_callbacks(credentials: Option<&Credentials>) -> RemoteCallbacks<'static> {
    let mut callbacks = RemoteCallbacks::new();

    match credentials.and_then(|c| c.username.clone().zip(c.password.clone())) {
        Some((username, password)) => {
            callbacks.credentials(move |_url, _username_from_url, _allowed| {
                Cred::userpass_plaintext(&username, &password)
            });
        }
        None => {
            callbacks.credentials(|_url, username_from_url, allowed| {
                if allowed.contains(CredentialType::SSH_KEY) {
                    Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"))
                } else {
                    Cred::default()
                }
            });
        }
    }

    callbacks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::PublishRepo;
    use git2::Repository;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn settings(dir: &Path, origin: &str) -> PublishSettings {
        PublishSettings {
            repo_dir: dir.to_path_buf(),
            origin_uri: origin.to_string(),
            reference_uri: None,
            branch: "site".to_string(),
            fetch_depth: None,
            commit_message: "Publish".to_string(),
            sign: None,
            preserve: Vec::new(),
            author_name: None,
            author_email: None,
        }
    }

    fn bare_remote(tmp: &TempDir, name: &str) -> (PathBuf, Repository) {
        let path = tmp.path().join(name);
        let repo = Repository::init_bare(&path).unwrap();
        (path, repo)
    }

    fn seed_branch(
        bare: &Repository,
        branch: &str,
        files: &[(&str, &str)],
        parent: Option<Oid>,
    ) -> Oid {
        let mut builder = bare.treebuilder(None).unwrap();
        for (name, contents) in files {
            let blob = bare.blob(contents.as_bytes()).unwrap();
            builder.insert(name, blob, 0o100644).unwrap();
        }
        let tree = bare.find_tree(builder.write().unwrap()).unwrap();

        let sig = git2::Signature::now("Seeder", "seed@example.com").unwrap();
        let parents: Vec<git2::Commit> = parent
            .map(|oid| bare.find_commit(oid).unwrap())
            .into_iter()
            .collect();
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();

        bare.commit(
            Some(&format!("refs/heads/{}", branch)),
            &sig,
            &sig,
            "seed",
            &tree,
            &parent_refs,
        )
        .unwrap()
    }

    #[test]
    fn test_orphan_when_remote_branch_absent() {
        let tmp = TempDir::new().unwrap();
        let (remote_path, _bare) = bare_remote(&tmp, "remote.git");
        let clone_dir = tmp.path().join("clone");
        let settings = settings(&clone_dir, remote_path.to_str().unwrap());

        let repo = PublishRepo::resolve(&settings).unwrap();
        synchronize(&repo, &settings, None).unwrap();

        // unborn branch: HEAD is symbolic to the publish branch, no commits
        let head = repo.inner().find_reference("HEAD").unwrap();
        assert_eq!(head.symbolic_target(), Some("refs/heads/site"));
        assert!(repo.inner().head().is_err());
        assert!(repo.inner().find_branch("site", BranchType::Local).is_err());
    }

    #[test]
    fn test_reset_to_remote_tip() {
        let tmp = TempDir::new().unwrap();
        let (remote_path, bare) = bare_remote(&tmp, "remote.git");
        let tip = seed_branch(&bare, "site", &[("hello.txt", "hi")], None);

        let clone_dir = tmp.path().join("clone");
        let settings = settings(&clone_dir, remote_path.to_str().unwrap());

        let repo = PublishRepo::resolve(&settings).unwrap();
        // junk that should not survive the forced reset
        fs::write(clone_dir.join("junk.txt"), "junk").unwrap();

        synchronize(&repo, &settings, None).unwrap();

        assert!(clone_dir.join("hello.txt").exists());
        assert!(!clone_dir.join("junk.txt").exists());

        let head = repo.inner().head().unwrap();
        assert_eq!(head.shorthand(), Some("site"));
        assert_eq!(head.peel_to_commit().unwrap().id(), tip);
    }

    #[test]
    fn test_reset_discards_stale_local_history() {
        let tmp = TempDir::new().unwrap();
        let (remote_path, bare) = bare_remote(&tmp, "remote.git");
        seed_branch(&bare, "site", &[("v1.txt", "one")], None);

        let clone_dir = tmp.path().join("clone");
        let settings = settings(&clone_dir, remote_path.to_str().unwrap());

        let repo = PublishRepo::resolve(&settings).unwrap();
        synchronize(&repo, &settings, None).unwrap();
        assert!(clone_dir.join("v1.txt").exists());

        // remote moves on; the local clone must follow exactly
        let old_tip = repo.inner().head().unwrap().peel_to_commit().unwrap().id();
        let new_tip = seed_branch(&bare, "site", &[("v2.txt", "two")], Some(old_tip));

        synchronize(&repo, &settings, None).unwrap();
        assert!(clone_dir.join("v2.txt").exists());
        assert_eq!(
            repo.inner().head().unwrap().peel_to_commit().unwrap().id(),
            new_tip
        );
    }

    #[test]
    fn test_reference_remote_warms_tracking_ref() {
        let tmp = TempDir::new().unwrap();
        let (origin_path, origin_bare) = bare_remote(&tmp, "origin.git");
        let (reference_path, reference_bare) = bare_remote(&tmp, "reference.git");

        let tip = seed_branch(&origin_bare, "site", &[("page.html", "x")], None);
        seed_branch(&reference_bare, "site", &[("page.html", "x")], None);

        let clone_dir = tmp.path().join("clone");
        let mut settings = settings(&clone_dir, origin_path.to_str().unwrap());
        settings.reference_uri = Some(reference_path.to_str().unwrap().to_string());

        let repo = PublishRepo::resolve(&settings).unwrap();
        synchronize(&repo, &settings, None).unwrap();

        assert!(repo
            .inner()
            .find_reference("refs/remotes/reference/site")
            .is_ok());
        assert_eq!(
            repo.inner().head().unwrap().peel_to_commit().unwrap().id(),
            tip
        );
    }

    #[test]
    fn test_probe_failure_treated_as_absent() {
        let tmp = TempDir::new().unwrap();
        let clone_dir = tmp.path().join("clone");
        let missing = tmp.path().join("nonexistent.git");
        let settings = settings(&clone_dir, missing.to_str().unwrap());

        let repo = PublishRepo::resolve(&settings).unwrap();
        let mut origin = repo.inner().find_remote(ORIGIN_REMOTE).unwrap();
        assert!(remote_branch_tip(&mut origin, "site", None).is_none());
    }
}
