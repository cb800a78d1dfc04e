//! Publish command
//!
//! Resolves the selected publication, runs the pipeline, and acts as the
//! content-copy collaborator: the configured contents directory is copied
//! into the working clone between branch synchronization and cleanup.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;
use walkdir::WalkDir;

use gitpub_core::{Config, Credentials, PublishOutcome, Publisher};

/// Arguments for the publish command
#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Publication to run; required when more than one is configured
    #[arg(short, long)]
    pub name: Option<String>,

    /// Override the remote URI to publish to
    #[arg(long, env = "GITPUB_REPO_URI")]
    pub repo_uri: Option<String>,

    /// Override the branch to publish onto
    #[arg(long, env = "GITPUB_BRANCH")]
    pub branch: Option<String>,

    /// Override the commit message
    #[arg(short, long)]
    pub message: Option<String>,
}

impl PublishArgs {
    /// Execute the publish command
    pub fn execute(&self, config: &Config, verbose: bool) -> anyhow::Result<()> {
        let (name, publication) = config.publication(self.name.as_deref())?;

        let mut publication = publication.clone().with_env_overrides();
        if let Some(ref uri) = self.repo_uri {
            publication.repo_uri = Some(uri.clone());
        }
        if let Some(ref branch) = self.branch {
            publication.branch = branch.clone();
        }
        if let Some(ref message) = self.message {
            publication.commit_message = message.clone();
        }

        let contents_dir = publication
            .contents_dir
            .clone()
            .with_context(|| format!("Publication '{}' has no contents_dir", name))?;
        let include = build_globset(&publication.contents)?;

        let settings = publication.resolve(name)?;
        let credentials = Credentials::load()?;
        let credentials = credentials.is_complete().then_some(credentials);

        if verbose {
            println!("Publication: {}", name);
            println!("  remote: {}", settings.origin_uri);
            println!("  branch: {}", settings.branch);
            println!("  clone: {}", settings.repo_dir.display());
        }

        let publisher = Publisher::new(settings, credentials)?;
        let outcome =
            publisher.publish(|dest| copy_contents(&contents_dir, include.as_ref(), dest))?;

        report(name, &outcome);
        Ok(())
    }
}

fn report(name: &str, outcome: &PublishOutcome) {
    if outcome.pushed {
        println!("Published '{}'", name);
    } else if outcome.committed {
        println!("Committed '{}' but remote was already current", name);
    } else {
        println!("Nothing to publish for '{}', already up to date", name);
    }
}

fn build_globset(patterns: &[String]) -> anyhow::Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob =
            Glob::new(pattern).with_context(|| format!("Invalid contents pattern '{}'", pattern))?;
        builder.add(glob);
    }
    Ok(Some(builder.build()?))
}

/// Copy the contents directory into the clone, returning what was written
///
/// Paths are returned relative to the clone so the cleanup stage can tell
/// this run's output apart from stale leftovers.
fn copy_contents(
    source: &Path,
    include: Option<&GlobSet>,
    dest: &Path,
) -> gitpub_core::Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| {
            gitpub_core::Error::Other(format!("Failed to walk {}: {}", source.display(), e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(source).map_err(|e| {
            gitpub_core::Error::Other(format!("Path outside contents dir: {}", e))
        })?;

        if let Some(include) = include {
            if !include.is_match(relative) {
                continue;
            }
        }

        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(entry.path(), &target)?;
        written.push(relative.to_path_buf());
    }

    debug!(files = written.len(), from = %source.display(), "Copied publish contents");
    Ok(written)
}
