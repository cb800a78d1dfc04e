//! The publish pipeline
//!
//! Strictly sequential per run: resolve the clone, link the reference object
//! store, synchronize the branch, hand the tree to the caller's content
//! copier, drop unpreserved leftovers, commit real changes, push when ahead.
//! The clone handle lives inside `publish` and is released on every exit
//! path. At most one run may own a given clone directory at a time; callers
//! that might race must serialize externally.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::alternates::link_reference;
use crate::commit::{commit_changes, AuthorOverride};
use crate::config::{Credentials, PublishSettings};
use crate::preserve::{clean_unpreserved, PreserveSet};
use crate::push::push_branch;
use crate::remote::CanonicalUri;
use crate::repo::PublishRepo;
use crate::sync::synchronize;
use crate::{Error, Result};

/// Per-stage "did work" flags for one publish run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    /// The reset/synchronize stage always runs
    pub reset_ran: bool,
    /// Whether a commit was created
    pub committed: bool,
    /// Whether anything was transmitted to the remote
    pub pushed: bool,
}

/// A validated, ready-to-run publication
#[derive(Debug)]
pub struct Publisher {
    settings: PublishSettings,
    credentials: Option<Credentials>,
    preserve: PreserveSet,
}

impl Publisher {
    /// Validate settings into a runnable publisher
    ///
    /// URI syntax, branch name, and preserve patterns are all checked here,
    /// before any network or filesystem mutation.
    pub fn new(settings: PublishSettings, credentials: Option<Credentials>) -> Result<Self> {
        CanonicalUri::parse(&settings.origin_uri)?;
        if let Some(ref reference_uri) = settings.reference_uri {
            CanonicalUri::parse(reference_uri)?;
        }

        let full_ref = format!("refs/heads/{}", settings.branch);
        if settings.branch.is_empty() || !git2::Reference::is_valid_name(&full_ref) {
            return Err(Error::InvalidBranch(settings.branch.clone()));
        }

        let preserve = PreserveSet::new(&settings.preserve)?;

        Ok(Self {
            settings,
            credentials,
            preserve,
        })
    }

    /// The validated settings this publisher runs with
    pub fn settings(&self) -> &PublishSettings {
        &self.settings
    }

    /// Run the full pipeline
    ///
    /// `copy` is the external content collaborator: it receives the clone's
    /// working directory after branch synchronization, materializes the
    /// content to publish there, and returns the clone-relative paths it
    /// wrote. Those paths are this run's output and are exempt from the
    /// cleanup that follows; everything else not preserved is removed.
    pub fn publish<F>(&self, copy: F) -> Result<PublishOutcome>
    where
        F: FnOnce(&Path) -> Result<Vec<PathBuf>>,
    {
        let settings = &self.settings;
        info!(
            branch = %settings.branch,
            dir = %settings.repo_dir.display(),
            "Publishing to {}",
            settings.origin_uri
        );

        let repo = PublishRepo::resolve(settings)?;

        // shallow history and alternates do not mix; depth wins
        if let Some(ref reference_uri) = settings.reference_uri {
            if settings.fetch_depth.is_none() {
                link_reference(repo.workdir(), reference_uri);
            } else {
                debug!("Fetch depth set, skipping reference object store link");
            }
        }

        synchronize(&repo, settings, self.credentials.as_ref())?;

        let fresh: HashSet<PathBuf> = copy(repo.workdir())?.into_iter().collect();

        clean_unpreserved(repo.workdir(), &self.preserve, &fresh)?;

        let author = AuthorOverride {
            name: settings.author_name.clone(),
            email: settings.author_email.clone(),
        };
        let committed = commit_changes(&repo, &settings.commit_message, settings.sign, &author)?;

        let pushed = push_branch(&repo, &settings.branch, self.credentials.as_ref())?;

        Ok(PublishOutcome {
            reset_ran: true,
            committed,
            pushed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(branch: &str, origin: &str) -> PublishSettings {
        PublishSettings {
            repo_dir: PathBuf::from("/tmp/unused"),
            origin_uri: origin.to_string(),
            reference_uri: None,
            branch: branch.to_string(),
            fetch_depth: None,
            commit_message: "Publish".to_string(),
            sign: None,
            preserve: Vec::new(),
            author_name: None,
            author_email: None,
        }
    }

    #[test]
    fn test_rejects_invalid_branch_names() {
        for bad in ["", "has space", "double..dot", "ends.lock", "back\\slash"] {
            let result = Publisher::new(settings(bad, "https://example.com/repo.git"), None);
            assert!(
                matches!(result, Err(Error::InvalidBranch(_))),
                "branch {:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_accepts_hierarchical_branch_names() {
        assert!(Publisher::new(settings("docs/site", "https://example.com/repo.git"), None).is_ok());
    }

    #[test]
    fn test_rejects_malformed_origin_uri() {
        let result = Publisher::new(settings("site", "https://exa mple.com/repo"), None);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_bad_preserve_pattern() {
        let mut s = settings("site", "https://example.com/repo.git");
        s.preserve = vec!["{unclosed".to_string()];
        assert!(matches!(Publisher::new(s, None), Err(Error::Config(_))));
    }
}
