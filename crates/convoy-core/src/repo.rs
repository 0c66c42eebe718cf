//! Repository descriptors: one per local clone, parsed from its manifest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;
use semver::Version;
use serde::Deserialize;

use crate::version::parse_version;

/// The package manifest file name at a repository root.
pub const MANIFEST_FILE: &str = "package.json";

/// A repository in the collection, constructed once from on-disk manifest
/// state at the start of an operation and not mutated in memory.
#[derive(Debug, Clone)]
pub struct Repository {
    /// Canonical package name, unique across the collection.
    pub name: String,

    /// Absolute path to the repository directory.
    pub path: PathBuf,

    /// Declared version from the manifest.
    pub version: Version,

    /// Production dependencies: name -> range string.
    pub dependencies: BTreeMap<String, String>,

    /// Peer dependencies: name -> range string.
    pub peer_dependencies: BTreeMap<String, String>,

    /// Development dependencies: name -> range string.
    pub dev_dependencies: BTreeMap<String, String>,

    /// Derived from the manifest's `private` marker: `private: true` makes a
    /// repository unpublishable.
    pub publishable: bool,
}

/// Minimal manifest structure for parsing.
#[derive(Debug, Deserialize)]
pub struct ManifestJson {
    pub name: String,

    pub version: String,

    #[serde(default)]
    pub private: Option<bool>,

    #[serde(default)]
    pub dependencies: Option<BTreeMap<String, String>>,

    #[serde(default, rename = "devDependencies")]
    pub dev_dependencies: Option<BTreeMap<String, String>>,

    #[serde(default, rename = "peerDependencies")]
    pub peer_dependencies: Option<BTreeMap<String, String>>,
}

impl Repository {
    /// Parse a repository from a directory containing a `package.json`.
    pub fn from_path(path: &Path) -> Result<Self> {
        let manifest_path = path.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&manifest_path)
            .with_context(|| format!("Failed to read {}", manifest_path.display()))?;
        Self::from_manifest_str(path, &content)
    }

    /// Parse a repository from manifest content already in memory.
    pub fn from_manifest_str(path: &Path, content: &str) -> Result<Self> {
        let manifest: ManifestJson = serde_json::from_str(content)
            .with_context(|| format!("Failed to parse {}", path.join(MANIFEST_FILE).display()))?;

        let version = parse_version(&manifest.version)
            .with_context(|| format!("in {}", path.join(MANIFEST_FILE).display()))?;

        Ok(Repository {
            name: manifest.name,
            path: path.to_path_buf(),
            version,
            dependencies: manifest.dependencies.unwrap_or_default(),
            peer_dependencies: manifest.peer_dependencies.unwrap_or_default(),
            dev_dependencies: manifest.dev_dependencies.unwrap_or_default(),
            publishable: !manifest.private.unwrap_or(false),
        })
    }

    /// Path to this repository's manifest file.
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    /// The production-or-peer range this repository declares on `dep`, with
    /// production taking precedence when both sections list it.
    pub fn prod_or_peer_range(&self, dep: &str) -> Option<(&str, crate::graph::DepKind)> {
        if let Some(range) = self.dependencies.get(dep) {
            return Some((range.as_str(), crate::graph::DepKind::Prod));
        }
        self.peer_dependencies
            .get(dep)
            .map(|range| (range.as_str(), crate::graph::DepKind::Peer))
    }
}

/// Directories never treated as repository roots during discovery.
const EXCLUDED_REPO_DIRS: &[&str] = &["node_modules", ".git", "dist", "build", ".cache"];

/// Returns `true` if any component of `path` (relative to `root`) is an
/// artifact directory that should be skipped during discovery.
fn is_in_excluded_dir(path: &Path, root: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .any(|c| matches!(c, std::path::Component::Normal(s) if EXCLUDED_REPO_DIRS.contains(&s.to_str().unwrap_or(""))))
}

/// Discover repositories matching the given glob patterns under `root`.
///
/// Glob iteration is sequential (cheap directory matching); manifest parsing
/// is parallelized via rayon. Results are sorted by name, and duplicate
/// names are rejected because the rest of the system keys everything on the
/// canonical name.
pub fn discover_repos(root: &Path, patterns: &[String]) -> Result<Vec<Repository>> {
    let mut candidate_dirs: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let full_pattern = root.join(pattern).display().to_string();
        for entry in glob::glob(&full_pattern)
            .with_context(|| format!("Invalid glob pattern: {}", pattern))?
        {
            let entry_path = entry.context("Failed to read glob entry")?;
            if is_in_excluded_dir(&entry_path, root) {
                continue;
            }
            if entry_path.is_dir() && entry_path.join(MANIFEST_FILE).is_file() {
                candidate_dirs.push(entry_path);
            }
        }
    }

    candidate_dirs.sort();
    candidate_dirs.dedup();

    let mut repos: Vec<Repository> = candidate_dirs
        .par_iter()
        .map(|dir| Repository::from_path(dir))
        .collect::<Result<Vec<_>>>()?;

    repos.sort_by(|a, b| a.name.cmp(&b.name));

    for pair in repos.windows(2) {
        if pair[0].name == pair[1].name {
            anyhow::bail!(
                "Duplicate repository name '{}' at {} and {}",
                pair[0].name,
                pair[0].path.display(),
                pair[1].path.display()
            );
        }
    }

    Ok(repos)
}
