//! Preserve-pattern cleanup
//!
//! After branch synchronization and the external content copy, the working
//! tree may still hold leftovers neither accounted for: stale generated
//! files from a previous run that the current run no longer produces. This
//! stage deletes every file that neither matches the preserve set nor was
//! just materialized by the copy stage. Directories are never deleted
//! directly; git does not track them, so emptied directories fall out at
//! the staging step.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;
use walkdir::WalkDir;

use crate::{Error, Result};

/// Compiled set of patterns whose matches are exempt from cleanup
///
/// Patterns are glob-style, relative to the clone directory. The repository
/// metadata under `.git` is always preserved, independent of configuration.
#[derive(Debug, Clone)]
pub struct PreserveSet {
    set: GlobSet,
}

impl PreserveSet {
    /// Compile a preserve set from configured patterns
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();

        // repository metadata is preserved unconditionally
        builder.add(implicit_glob(".git")?);
        builder.add(implicit_glob(".git/**")?);

        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| {
                Error::Config(format!("Invalid preserve pattern '{}': {}", pattern, e))
            })?;
            builder.add(glob);
        }

        let set = builder
            .build()
            .map_err(|e| Error::Config(format!("Invalid preserve patterns: {}", e)))?;

        Ok(Self { set })
    }

    /// Whether a clone-relative path is exempt from deletion
    pub fn is_preserved(&self, relative: &Path) -> bool {
        self.set.is_match(relative)
    }
}

fn implicit_glob(pattern: &str) -> Result<Glob> {
    Glob::new(pattern).map_err(|e| Error::Other(format!("Bad builtin pattern: {}", e)))
}

/// Delete every file under `workdir` that is neither preserved nor fresh
///
/// `fresh` holds the clone-relative paths the copy stage just materialized;
/// those are this run's output and exempt. Any single failed deletion
/// aborts with the offending path identified.
pub fn clean_unpreserved(
    workdir: &Path,
    preserve: &PreserveSet,
    fresh: &HashSet<PathBuf>,
) -> Result<()> {
    let walker = WalkDir::new(workdir)
        .into_iter()
        // .git is preserved wholesale, no need to walk into it
        .filter_entry(|entry| entry.file_name() != ".git");

    let mut removed = 0usize;
    for entry in walker {
        let entry = entry.map_err(|e| Error::Other(format!("Failed to walk {}: {}", workdir.display(), e)))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(workdir)
            .map_err(|e| Error::Other(format!("Path outside clone: {}", e)))?;

        if preserve.is_preserved(relative) || fresh.contains(relative) {
            continue;
        }

        fs::remove_file(entry.path()).map_err(|e| Error::Clean {
            path: entry.path().to_path_buf(),
            source: e,
        })?;
        removed += 1;
    }

    debug!(removed, dir = %workdir.display(), "Removed unpreserved files");
    Ok(())
}
