//! Working-clone resolution
//!
//! Decides whether the directory holding the publish clone can be reused as
//! is, or must be wiped and re-initialized. A clone is reusable only when it
//! opens cleanly, its origin (and, if configured, reference) remote matches
//! the configured URI, and its current branch is the publish branch.

use std::fs;
use std::path::{Path, PathBuf};

use git2::{Repository, RepositoryInitOptions};
use tracing::{debug, info};

use crate::config::PublishSettings;
use crate::remote::uris_match;
use crate::{Error, Result};

/// Name of the primary remote every publish clone carries
pub const ORIGIN_REMOTE: &str = "origin";

/// Name of the optional object-warming remote
pub const REFERENCE_REMOTE: &str = "reference";

/// An open handle on the publish clone
///
/// Acquired once per publish run and released on drop, on every exit path.
pub struct PublishRepo {
    repo: Repository,
    workdir: PathBuf,
}

impl std::fmt::Debug for PublishRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishRepo")
            .field("workdir", &self.workdir)
            .finish_non_exhaustive()
    }
}

impl PublishRepo {
    /// Open the existing clone if it is still valid, otherwise recreate it
    ///
    /// Recreation deletes the directory recursively and initializes a fresh
    /// repository with the configured remotes. The publish branch itself is
    /// not created here; branch synchronization owns that.
    pub fn resolve(settings: &PublishSettings) -> Result<Self> {
        let dir = &settings.repo_dir;

        match Self::open_valid(dir, settings)? {
            Some(repo) => {
                debug!(dir = %dir.display(), "Reusing existing publish clone");
                Ok(Self {
                    repo,
                    workdir: dir.clone(),
                })
            }
            None => {
                let repo = Self::fresh(dir, settings)?;
                Ok(Self {
                    repo,
                    workdir: dir.clone(),
                })
            }
        }
    }

    /// Try to open an existing clone and validate it against the settings
    ///
    /// A clone that fails to open (missing, corrupt) is reported as `None`;
    /// so is one whose remotes or current branch do not match. Unparseable
    /// URIs on either side are fatal, not a mismatch.
    fn open_valid(dir: &Path, settings: &PublishSettings) -> Result<Option<Repository>> {
        let repo = match Repository::open(dir) {
            Ok(repo) => repo,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "No reusable publish clone");
                return Ok(None);
            }
        };

        if !remote_uri_matches(&repo, ORIGIN_REMOTE, &settings.origin_uri)? {
            return Ok(None);
        }

        if let Some(ref reference_uri) = settings.reference_uri {
            if !remote_uri_matches(&repo, REFERENCE_REMOTE, reference_uri)? {
                return Ok(None);
            }
        }

        match current_branch_name(&repo) {
            Some(name) if name == settings.branch => Ok(Some(repo)),
            other => {
                debug!(
                    current = ?other,
                    wanted = %settings.branch,
                    "Publish clone is on the wrong branch"
                );
                Ok(None)
            }
        }
    }

    /// Wipe the directory and initialize a fresh repository with remotes
    fn fresh(dir: &Path, settings: &PublishSettings) -> Result<Repository> {
        if dir.exists() {
            info!(dir = %dir.display(), "Recreating publish clone");
            fs::remove_dir_all(dir)?;
        }

        let mut opts = RepositoryInitOptions::new();
        opts.initial_head(&settings.branch);
        let repo = Repository::init_opts(dir, &opts)?;

        repo.remote(ORIGIN_REMOTE, &settings.origin_uri)?;
        if let Some(ref reference_uri) = settings.reference_uri {
            repo.remote(REFERENCE_REMOTE, reference_uri)?;
        }

        Ok(repo)
    }

    /// Path of the working tree
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Access to the underlying git2 repository
    pub fn inner(&self) -> &Repository {
        &self.repo
    }
}

/// Name of the branch HEAD points at, including an unborn branch
fn current_branch_name(repo: &Repository) -> Option<String> {
    match repo.head() {
        Ok(head) if head.is_branch() => head.shorthand().map(|s| s.to_string()),
        Ok(_) => None, // detached HEAD
        Err(e) if e.code() == git2::ErrorCode::UnbornBranch => {
            // freshly initialized repo: HEAD is symbolic to a branch that has
            // no commit yet
            repo.find_reference("HEAD")
                .ok()
                .and_then(|head| head.symbolic_target().map(|s| s.to_string()))
                .and_then(|target| target.strip_prefix("refs/heads/").map(|s| s.to_string()))
        }
        Err(_) => None,
    }
}

/// Compare a clone's remote URL against the configured URI
///
/// A missing remote or a remote without a URL is a mismatch.
fn remote_uri_matches(repo: &Repository, name: &str, uri: &str) -> Result<bool> {
    let remote = match repo.find_remote(name) {
        Ok(remote) => remote,
        Err(_) => {
            debug!(remote = name, "Remote not present in existing clone");
            return Ok(false);
        }
    };

    match remote.url() {
        Some(current) => uris_match(uri, current),
        None => Ok(false),
    }
}
