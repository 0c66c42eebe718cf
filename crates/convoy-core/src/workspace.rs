//! Workspace loading: find the nearest `convoy.json` by walking up from the
//! current directory, then discover the repository set it names.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::{self, CONFIG_FILE, ConvoyConfig};
use crate::repo::{self, Repository};

/// A loaded collection: the config plus the discovered repositories.
pub struct Workspace {
    /// Absolute path to the collection root (where `convoy.json` lives).
    pub root_path: PathBuf,

    /// Parsed configuration.
    pub config: ConvoyConfig,

    /// All repositories discovered in the collection, sorted by name.
    pub repos: Vec<Repository>,

    /// Warnings collected during loading. The caller is responsible for
    /// presenting these to the user.
    pub warnings: Vec<String>,
}

impl Workspace {
    /// Find `convoy.json` by walking up from the current directory, then
    /// load the workspace.
    pub fn find_and_load() -> Result<Self> {
        let config_path = find_config()?;
        let root_path = config_path
            .parent()
            .context("Config file has no parent directory")?
            .to_path_buf();
        Self::load_from(&root_path)
    }

    /// Load the workspace rooted at a known directory.
    pub fn load_from(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_FILE);
        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config = config::parse_config(&content)?;

        let mut warnings = Vec::new();
        let repos = repo::discover_repos(root, &config.repos)?;
        if repos.is_empty() {
            warnings.push(format!(
                "No repositories matched the configured patterns: {}",
                config.repos.join(", ")
            ));
        }

        Ok(Workspace {
            root_path: root.to_path_buf(),
            config,
            repos,
            warnings,
        })
    }

    /// Look up a repository by canonical name.
    pub fn repo(&self, name: &str) -> Option<&Repository> {
        self.repos.iter().find(|r| r.name == name)
    }
}

/// Search for `convoy.json` starting from the current directory and walking
/// up to the filesystem root.
fn find_config() -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let mut dir: &Path = &cwd;

    loop {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            return Ok(candidate);
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => break,
        }
    }

    anyhow::bail!(
        "Could not find {} in '{}' or any parent directory.\n\
         \n\
         Hint: create a convoy.json listing your repository directories, e.g. {{ \"repos\": [\"repos/*\"] }}.",
        CONFIG_FILE,
        cwd.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_repo(root: &Path, dir: &str, manifest: &str) {
        let path = root.join(dir);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("package.json"), manifest).unwrap();
    }

    #[test]
    fn test_load_from_discovers_repos() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{ "repos": ["repos/*"] }"#,
        )
        .unwrap();
        write_repo(dir.path(), "repos/lib", r#"{ "name": "lib", "version": "0.1.0" }"#);
        write_repo(
            dir.path(),
            "repos/app",
            r#"{ "name": "app", "version": "0.2.0", "dependencies": { "lib": "^0.1.0" } }"#,
        );

        let ws = Workspace::load_from(dir.path()).unwrap();
        assert_eq!(ws.repos.len(), 2);
        assert_eq!(ws.repos[0].name, "app");
        assert!(ws.warnings.is_empty());
        assert_eq!(ws.repo("lib").unwrap().version.to_string(), "0.1.0");
        assert!(ws.repo("nope").is_none());
    }

    #[test]
    fn test_empty_match_warns() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), r#"{ "repos": ["repos/*"] }"#).unwrap();
        let ws = Workspace::load_from(dir.path()).unwrap();
        assert!(ws.repos.is_empty());
        assert_eq!(ws.warnings.len(), 1);
    }

    #[test]
    fn test_missing_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(Workspace::load_from(dir.path()).is_err());
    }
}
