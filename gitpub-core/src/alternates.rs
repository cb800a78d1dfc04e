//! Alternate object store linking
//!
//! When a local reference repository is configured, its object database can
//! be linked into the publish clone so fetches and checkouts reuse objects
//! already on disk instead of re-downloading shared history. The link is an
//! optimization only: every skip is logged and none of them fails the run.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

/// Write the reference repository's object path into the clone's alternates
///
/// The reference URI must resolve to a local filesystem path. A non-bare
/// reference is entered through its `.git` directory. Shallow references are
/// skipped: their object set is incomplete. Callers must not invoke this
/// when a fetch depth is configured; shallow fetches and alternates do not
/// mix.
pub fn link_reference(workdir: &Path, reference_uri: &str) {
    let Some(mut reference_path) = resolve_local_path(reference_uri) else {
        debug!(uri = reference_uri, "Reference URI is not a local path, skipping alternates");
        return;
    };

    let git_subdir = reference_path.join(".git");
    if git_subdir.exists() {
        // not a bare repo
        reference_path = git_subdir;
    }

    if reference_path.join("shallow").exists() {
        info!("Reference repo is shallow. Cannot use as a reference.");
        return;
    }

    let objects_path = reference_path.join("objects");
    if !objects_path.exists() {
        warn!(
            path = %reference_path.display(),
            "Reference repo doesn't seem to have an objects database"
        );
        return;
    }

    let alternates_path = workdir
        .join(".git")
        .join("objects")
        .join("info")
        .join("alternates");

    let write = || -> std::io::Result<()> {
        if let Some(parent) = alternates_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&alternates_path, format!("{}\n", objects_path.display()))
    };

    match write() {
        Ok(()) => debug!(objects = %objects_path.display(), "Linked reference object store"),
        Err(e) => warn!(error = %e, "Failed to write alternates file, continuing without"),
    }
}

/// Resolve a reference URI to a local filesystem path
fn resolve_local_path(uri: &str) -> Option<PathBuf> {
    if let Some(path) = uri.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }

    if uri.contains("://") {
        return None;
    }

    Some(PathBuf::from(uri))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn clone_dir(tmp: &TempDir) -> PathBuf {
        let dir = tmp.path().join("clone");
        fs::create_dir_all(dir.join(".git").join("objects").join("info")).unwrap();
        dir
    }

    fn alternates_file(clone: &Path) -> PathBuf {
        clone.join(".git/objects/info/alternates")
    }

    #[test]
    fn test_links_bare_reference() {
        let tmp = TempDir::new().unwrap();
        let clone = clone_dir(&tmp);
        let reference = tmp.path().join("mirror.git");
        fs::create_dir_all(reference.join("objects")).unwrap();

        link_reference(&clone, reference.to_str().unwrap());

        let contents = fs::read_to_string(alternates_file(&clone)).unwrap();
        assert_eq!(contents.trim(), reference.join("objects").display().to_string());
    }

    #[test]
    fn test_links_through_git_subdir() {
        let tmp = TempDir::new().unwrap();
        let clone = clone_dir(&tmp);
        let reference = tmp.path().join("checkout");
        fs::create_dir_all(reference.join(".git").join("objects")).unwrap();

        link_reference(&clone, reference.to_str().unwrap());

        let contents = fs::read_to_string(alternates_file(&clone)).unwrap();
        assert_eq!(
            contents.trim(),
            reference.join(".git").join("objects").display().to_string()
        );
    }

    #[test]
    fn test_skips_shallow_reference() {
        let tmp = TempDir::new().unwrap();
        let clone = clone_dir(&tmp);
        let reference = tmp.path().join("mirror.git");
        fs::create_dir_all(reference.join("objects")).unwrap();
        fs::write(reference.join("shallow"), "abc\n").unwrap();

        link_reference(&clone, reference.to_str().unwrap());
        assert!(!alternates_file(&clone).exists());
    }

    #[test]
    fn test_skips_missing_objects_db() {
        let tmp = TempDir::new().unwrap();
        let clone = clone_dir(&tmp);
        let reference = tmp.path().join("not-a-repo");
        fs::create_dir_all(&reference).unwrap();

        link_reference(&clone, reference.to_str().unwrap());
        assert!(!alternates_file(&clone).exists());
    }

    #[test]
    fn test_skips_remote_uri() {
        let tmp = TempDir::new().unwrap();
        let clone = clone_dir(&tmp);

        link_reference(&clone, "https://example.com/repo.git");
        assert!(!alternates_file(&clone).exists());
    }
}
