//! Configuration for publications
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (GITPUB_*)
//! 3. Config file (`gitpub.toml`)
//! 4. Default values
//!
//! Credentials never live in the config file; they come from the
//! environment or from a permission-checked secrets file, and are injected
//! into individual remote operations rather than the clone's git config.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Default name of the publish branch
pub const DEFAULT_BRANCH: &str = "gh-pages";

/// Default commit message for published content
pub const DEFAULT_COMMIT_MESSAGE: &str = "Published by gitpub.";

/// Configuration for one named publication
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PublicationConfig {
    /// Directory holding the working clone; defaults to a per-publication
    /// directory under the user cache dir
    pub repo_dir: Option<PathBuf>,

    /// URI of the remote to publish to
    pub repo_uri: Option<String>,

    /// Optional local repository to borrow objects from
    pub reference_repo_uri: Option<String>,

    /// Branch to publish onto
    pub branch: String,

    /// Limit fetches to the most recent N commits
    pub fetch_depth: Option<u32>,

    /// Commit message for publish commits
    pub commit_message: String,

    /// Explicit GPG signing preference; absent defers to git config
    pub sign: Option<bool>,

    /// Glob patterns of paths that must survive the cleanup stage
    pub preserve: Vec<String>,

    /// Directory whose contents are copied into the clone
    pub contents_dir: Option<PathBuf>,

    /// Include patterns applied to `contents_dir`; empty means everything
    pub contents: Vec<String>,

    /// Commit author name; absent uses the ambient git identity
    pub author_name: Option<String>,

    /// Commit author email; absent uses the ambient git identity
    pub author_email: Option<String>,
}

impl Default for PublicationConfig {
    fn default() -> Self {
        Self {
            repo_dir: None,
            repo_uri: None,
            reference_repo_uri: None,
            branch: DEFAULT_BRANCH.to_string(),
            fetch_depth: None,
            commit_message: DEFAULT_COMMIT_MESSAGE.to_string(),
            sign: None,
            preserve: Vec::new(),
            contents_dir: None,
            contents: Vec::new(),
            author_name: None,
            author_email: None,
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Named publications
    pub publication: BTreeMap<String, PublicationConfig>,
}

impl Config {
    /// Load configuration from a specific file
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Look up a publication by name
    ///
    /// With no name given, a config holding exactly one publication selects
    /// it; anything else is ambiguous.
    pub fn publication(&self, name: Option<&str>) -> Result<(&str, &PublicationConfig)> {
        match name {
            Some(name) => self
                .publication
                .get_key_value(name)
                .map(|(k, v)| (k.as_str(), v))
                .ok_or_else(|| Error::Config(format!("No publication named '{}'", name))),
            None if self.publication.len() == 1 => self
                .publication
                .iter()
                .next()
                .map(|(k, v)| (k.as_str(), v))
                .ok_or_else(|| Error::Config("No publications configured".to_string())),
            None if self.publication.is_empty() => {
                Err(Error::Config("No publications configured".to_string()))
            }
            None => Err(Error::Config(format!(
                "Multiple publications configured ({}); select one with --name",
                self.publication
                    .keys()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

/// Fully-resolved settings for one publish run
#[derive(Debug, Clone)]
pub struct PublishSettings {
    /// Directory holding the working clone
    pub repo_dir: PathBuf,
    /// URI of the origin remote
    pub origin_uri: String,
    /// Optional URI of the reference remote
    pub reference_uri: Option<String>,
    /// Branch to publish onto
    pub branch: String,
    /// Shallow-fetch depth
    pub fetch_depth: Option<u32>,
    /// Commit message
    pub commit_message: String,
    /// Explicit signing preference
    pub sign: Option<bool>,
    /// Preserve patterns
    pub preserve: Vec<String>,
    /// Commit author name override
    pub author_name: Option<String>,
    /// Commit author email override
    pub author_email: Option<String>,
}

impl PublicationConfig {
    /// Resolve this publication into runnable settings
    ///
    /// `name` keys the default clone directory under the user cache dir.
    pub fn resolve(&self, name: &str) -> Result<PublishSettings> {
        let origin_uri = self
            .repo_uri
            .clone()
            .ok_or_else(|| Error::Config(format!("Publication '{}' has no repo_uri", name)))?;

        let repo_dir = match self.repo_dir {
            Some(ref dir) => dir.clone(),
            None => default_repo_dir(name)?,
        };

        Ok(PublishSettings {
            repo_dir,
            origin_uri,
            reference_uri: self.reference_repo_uri.clone(),
            branch: self.branch.clone(),
            fetch_depth: self.fetch_depth,
            commit_message: self.commit_message.clone(),
            sign: self.sign,
            preserve: self.preserve.clone(),
            author_name: self.author_name.clone(),
            author_email: self.author_email.clone(),
        })
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - GITPUB_REPO_URI: URI of the remote to publish to
    /// - GITPUB_BRANCH: branch to publish onto
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(uri) = std::env::var("GITPUB_REPO_URI") {
            self.repo_uri = Some(uri);
        }

        if let Ok(branch) = std::env::var("GITPUB_BRANCH") {
            self.branch = branch;
        }

        self
    }
}

/// Default clone directory for a named publication
///
/// Returns `~/.cache/gitpub/repos/<name>`
pub fn default_repo_dir(name: &str) -> Result<PathBuf> {
    let cache_dir = dirs::cache_dir()
        .ok_or_else(|| Error::Config("Could not determine cache directory".to_string()))?;

    Ok(cache_dir.join("gitpub").join("repos").join(name))
}

/// Username/password pair injected per remote operation
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Credentials {
    /// Username for HTTP(S) remotes
    pub username: Option<String>,
    /// Password or token
    pub password: Option<String>,
}

impl Credentials {
    /// Load credentials from the environment, then the secrets file
    ///
    /// Priority:
    /// 1. GITPUB_USERNAME / GITPUB_PASSWORD environment variables
    /// 2. Secrets file (`~/.config/gitpub/secrets.toml`, mode 0600)
    pub fn load() -> Result<Self> {
        let username = std::env::var("GITPUB_USERNAME").ok();
        let password = std::env::var("GITPUB_PASSWORD").ok();

        if username.is_some() && password.is_some() {
            return Ok(Self { username, password });
        }

        let mut creds = Self::load_secrets_file()?;
        if username.is_some() {
            creds.username = username;
        }
        if password.is_some() {
            creds.password = password;
        }
        Ok(creds)
    }

    /// True when both halves of the pair are present
    pub fn is_complete(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    fn load_secrets_file() -> Result<Self> {
        let Some(path) = dirs::config_dir().map(|p| p.join("gitpub").join("secrets.toml")) else {
            return Ok(Self::default());
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let metadata = std::fs::metadata(&path).map_err(Error::Io)?;
            let mode = metadata.permissions().mode();

            if mode & 0o077 != 0 {
                return Err(Error::Config(format!(
                    "Secrets file {} has insecure permissions {:o}. \
                     Please run: chmod 600 {}",
                    path.display(),
                    mode & 0o777,
                    path.display()
                )));
            }

            debug!(path = %path.display(), "Secrets file permissions OK");
        }

        let contents = std::fs::read_to_string(&path).map_err(Error::Io)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse secrets: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_publication() {
        let pub_config = PublicationConfig::default();
        assert_eq!(pub_config.branch, "gh-pages");
        assert_eq!(pub_config.commit_message, "Published by gitpub.");
        assert!(pub_config.sign.is_none());
        assert!(pub_config.preserve.is_empty());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[publication.site]
repo_uri = "git@github.com:org/site.git"
branch = "pages"
fetch_depth = 1
preserve = ["CNAME"]
contents_dir = "public"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let (name, site) = config.publication(None).unwrap();
        assert_eq!(name, "site");
        assert_eq!(site.repo_uri.as_deref(), Some("git@github.com:org/site.git"));
        assert_eq!(site.branch, "pages");
        assert_eq!(site.fetch_depth, Some(1));
        assert_eq!(site.preserve, vec!["CNAME".to_string()]);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml = r#"
[publication.site]
repo_uri = "https://example.com/repo.git"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let (_, site) = config.publication(Some("site")).unwrap();
        assert_eq!(site.branch, "gh-pages");
        assert_eq!(site.commit_message, "Published by gitpub.");
    }

    #[test]
    fn test_publication_selection() {
        let toml = r#"
[publication.a]
repo_uri = "https://example.com/a.git"

[publication.b]
repo_uri = "https://example.com/b.git"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.publication(None).is_err());
        assert!(config.publication(Some("a")).is_ok());
        assert!(config.publication(Some("missing")).is_err());
    }

    #[test]
    fn test_resolve_requires_repo_uri() {
        let pub_config = PublicationConfig::default();
        assert!(pub_config.resolve("site").is_err());
    }

    #[test]
    fn test_resolve_keeps_explicit_repo_dir() {
        let pub_config = PublicationConfig {
            repo_uri: Some("https://example.com/repo.git".to_string()),
            repo_dir: Some(PathBuf::from("/tmp/clone")),
            ..Default::default()
        };
        let settings = pub_config.resolve("site").unwrap();
        assert_eq!(settings.repo_dir, PathBuf::from("/tmp/clone"));
    }
}
