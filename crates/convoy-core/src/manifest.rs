//! The dependency-file updater: rewrites manifest dependency sections with
//! new versions, preserving the range prefix and the file's tab-indented,
//! trailing-newline shape.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use semver::Version;

use crate::changeset::DependencyBump;
use crate::graph::DepKind;
use crate::ops::{ChangesetOps, FsOps, GitOps};
use crate::repo::Repository;
use crate::version::{RangePrefix, needs_update, range_anchor, range_prefix};

/// Commit message used for every dependency-update commit.
pub const UPDATE_COMMIT_MESSAGE: &str = "update dependencies after publishing";

/// How rewritten ranges are prefixed.
///
/// `Caret` is the default and does not force: a recognized prefix on the
/// current range is reused. The other strategies override whatever prefix
/// the range had.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionStrategy {
    Exact,
    #[default]
    Caret,
    Tilde,
    Gte,
}

impl VersionStrategy {
    fn forced_prefix(self) -> Option<RangePrefix> {
        match self {
            VersionStrategy::Exact => Some(RangePrefix::Exact),
            VersionStrategy::Caret => None,
            VersionStrategy::Tilde => Some(RangePrefix::Tilde),
            VersionStrategy::Gte => Some(RangePrefix::Gte),
        }
    }
}

impl fmt::Display for VersionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionStrategy::Exact => write!(f, "exact"),
            VersionStrategy::Caret => write!(f, "caret"),
            VersionStrategy::Tilde => write!(f, "tilde"),
            VersionStrategy::Gte => write!(f, "gte"),
        }
    }
}

impl FromStr for VersionStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "exact" => Ok(VersionStrategy::Exact),
            "caret" => Ok(VersionStrategy::Caret),
            "tilde" => Ok(VersionStrategy::Tilde),
            "gte" => Ok(VersionStrategy::Gte),
            other => bail!("unknown version strategy '{}'", other),
        }
    }
}

/// Compute the range string to write for `new_version`, given the range
/// currently in the manifest.
pub fn format_range(current_range: &str, new_version: &Version, strategy: VersionStrategy) -> String {
    let prefix = strategy.forced_prefix().unwrap_or_else(|| {
        match range_prefix(current_range) {
            // A wildcard or unparseable range gets pinned with a caret.
            RangePrefix::Any => RangePrefix::Caret,
            prefix if range_anchor(current_range).is_some() => prefix,
            _ => RangePrefix::Caret,
        }
    });
    format!("{}{}", prefix.as_str(), new_version)
}

/// What updating a repository against freshly published versions would
/// change. Pure inspection; nothing is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateNeeded {
    pub current: String,
    pub new_version: Version,
    pub kind: DepKind,
}

/// Inspect a repository's three dependency sections against a map of
/// published versions. When a name appears in several sections the highest
/// precedence kind is reported (prod > peer > dev).
pub fn find_updates_needed(
    repo: &Repository,
    published: &BTreeMap<String, Version>,
) -> BTreeMap<String, UpdateNeeded> {
    let mut needed = BTreeMap::new();

    let sections = [
        (&repo.dev_dependencies, DepKind::Dev),
        (&repo.peer_dependencies, DepKind::Peer),
        (&repo.dependencies, DepKind::Prod),
    ];
    for (section, kind) in sections {
        for (name, range) in section {
            if let Some(version) = published.get(name) {
                if needs_update(range, version) {
                    needed.insert(
                        name.clone(),
                        UpdateNeeded {
                            current: range.clone(),
                            new_version: version.clone(),
                            kind,
                        },
                    );
                }
            }
        }
    }

    needed
}

const DEPENDENCY_SECTIONS: &[&str] = &["dependencies", "devDependencies", "peerDependencies"];

/// Rewrite the repository manifest with new versions for the given
/// dependencies, stage and commit the result, and (optionally) drop an
/// auto-changeset recording the updates.
pub fn update_manifest(
    repo: &Repository,
    bumps: &[DependencyBump],
    strategy: VersionStrategy,
    add_changeset: bool,
    changesets: &impl ChangesetOps,
    fs: &impl FsOps,
    git: &impl GitOps,
) -> Result<()> {
    let manifest_path = repo.manifest_path();
    let content = fs
        .read_file(&manifest_path)
        .with_context(|| format!("Failed to read {}", manifest_path.display()))?;

    let mut manifest: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", manifest_path.display()))?;

    let mut touched = false;
    for section_name in DEPENDENCY_SECTIONS {
        let Some(section) = manifest
            .get_mut(section_name)
            .and_then(serde_json::Value::as_object_mut)
        else {
            continue;
        };
        for bump in bumps {
            let Some(value) = section.get_mut(&bump.name) else {
                continue;
            };
            let current = value.as_str().unwrap_or_default();
            let new_range = format_range(current, &bump.version, strategy);
            if current != new_range {
                *value = serde_json::Value::String(new_range);
                touched = true;
            }
        }
    }

    if !touched {
        return Ok(());
    }

    fs.write_file(&manifest_path, &to_tab_indented_json(&manifest)?)
        .with_context(|| format!("Failed to write {}", manifest_path.display()))?;

    if add_changeset {
        changesets.write_auto_changeset(repo, bumps)?;
    }

    git.add_and_commit(&repo.path, UPDATE_COMMIT_MESSAGE)
        .with_context(|| format!("Failed to commit dependency updates in {}", repo.name))?;

    Ok(())
}

/// Serialize a manifest with tab indentation and a trailing newline.
fn to_tab_indented_json(value: &serde_json::Value) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    serde::Serialize::serialize(value, &mut serializer).context("Failed to serialize manifest")?;
    let mut out = String::from_utf8(buf).context("Manifest serialization produced invalid UTF-8")?;
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::memory::{MemoryChangesets, MemoryFs, MemoryGit};
    use std::path::PathBuf;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn repo_with_manifest(fs: &MemoryFs, manifest: &str) -> Repository {
        let path = PathBuf::from("/repos/app");
        fs.seed(path.join("package.json"), manifest);
        Repository::from_manifest_str(&path, manifest).unwrap()
    }

    // -----------------------------------------------------------------------
    // format_range
    // -----------------------------------------------------------------------

    #[test]
    fn test_caret_strategy_preserves_recognized_prefixes() {
        assert_eq!(format_range("^0.1.0", &v("0.1.1"), VersionStrategy::Caret), "^0.1.1");
        assert_eq!(format_range("~0.1.0", &v("0.1.1"), VersionStrategy::Caret), "~0.1.1");
        assert_eq!(format_range(">=0.1.0", &v("0.1.1"), VersionStrategy::Caret), ">=0.1.1");
        assert_eq!(format_range("0.1.0", &v("0.1.1"), VersionStrategy::Caret), "0.1.1");
    }

    #[test]
    fn test_caret_strategy_pins_wildcard_and_garbage() {
        assert_eq!(format_range("*", &v("1.2.0"), VersionStrategy::Caret), "^1.2.0");
        assert_eq!(
            format_range("workspace:^", &v("1.2.0"), VersionStrategy::Caret),
            "^1.2.0"
        );
    }

    #[test]
    fn test_forcing_strategies_override_prefix() {
        assert_eq!(format_range("^0.1.0", &v("0.2.0"), VersionStrategy::Exact), "0.2.0");
        assert_eq!(format_range("0.1.0", &v("0.2.0"), VersionStrategy::Tilde), "~0.2.0");
        assert_eq!(format_range("~0.1.0", &v("0.2.0"), VersionStrategy::Gte), ">=0.2.0");
    }

    #[test]
    fn test_strategy_parse_display_roundtrip() {
        for strategy in [
            VersionStrategy::Exact,
            VersionStrategy::Caret,
            VersionStrategy::Tilde,
            VersionStrategy::Gte,
        ] {
            assert_eq!(strategy.to_string().parse::<VersionStrategy>().unwrap(), strategy);
        }
        assert!("loose".parse::<VersionStrategy>().is_err());
    }

    // -----------------------------------------------------------------------
    // find_updates_needed
    // -----------------------------------------------------------------------

    #[test]
    fn test_find_updates_needed() {
        let fs = MemoryFs::default();
        let repo = repo_with_manifest(
            &fs,
            r#"{
	"name": "app",
	"version": "0.2.0",
	"dependencies": { "lib": "^0.1.0", "stable": "^2.0.0" },
	"devDependencies": { "toolkit": "*" }
}"#,
        );

        let published = BTreeMap::from([
            ("lib".to_string(), v("0.1.1")),
            ("stable".to_string(), v("2.0.0")),
            ("toolkit".to_string(), v("1.0.0")),
            ("unrelated".to_string(), v("9.9.9")),
        ]);

        let needed = find_updates_needed(&repo, &published);
        assert_eq!(needed.len(), 2);
        assert_eq!(needed["lib"].kind, DepKind::Prod);
        assert_eq!(needed["lib"].current, "^0.1.0");
        // `*` is always considered in need of an update.
        assert_eq!(needed["toolkit"].kind, DepKind::Dev);
        // `stable` already satisfies 2.0.0.
        assert!(!needed.contains_key("stable"));
    }

    #[test]
    fn test_find_updates_kind_precedence() {
        let fs = MemoryFs::default();
        let repo = repo_with_manifest(
            &fs,
            r#"{
	"name": "app",
	"version": "1.0.0",
	"dependencies": { "shared": "^1.0.0" },
	"devDependencies": { "shared": "^1.0.0" }
}"#,
        );
        let published = BTreeMap::from([("shared".to_string(), v("1.1.0"))]);
        let needed = find_updates_needed(&repo, &published);
        assert_eq!(needed["shared"].kind, DepKind::Prod);
    }

    // -----------------------------------------------------------------------
    // update_manifest
    // -----------------------------------------------------------------------

    #[test]
    fn test_update_manifest_rewrites_and_commits() {
        let fs = MemoryFs::default();
        let git = MemoryGit::default();
        let repo = repo_with_manifest(
            &fs,
            "{\n\t\"name\": \"app\",\n\t\"version\": \"0.2.0\",\n\t\"dependencies\": {\n\t\t\"lib\": \"^0.1.0\"\n\t}\n}\n",
        );

        let bumps = vec![DependencyBump {
            name: "lib".into(),
            version: v("0.1.1"),
            breaking: false,
        }];
        update_manifest(
            &repo,
            &bumps,
            VersionStrategy::Caret,
            false,
            &MemoryChangesets::default(),
            &fs,
            &git,
        )
        .unwrap();

        let written = fs.get(&repo.manifest_path()).unwrap();
        assert!(written.contains("\"lib\": \"^0.1.1\""));
        assert!(written.contains("\t\"name\""), "tab indentation preserved");
        assert!(written.ends_with('\n'), "trailing newline preserved");
        // Key order is untouched.
        assert!(written.find("\"name\"").unwrap() < written.find("\"version\"").unwrap());

        assert_eq!(git.commits_in(&repo.path), vec![UPDATE_COMMIT_MESSAGE]);

        // Round-trip: the rewritten manifest parses and carries the caret.
        let reread = Repository::from_manifest_str(&repo.path, &written).unwrap();
        assert_eq!(reread.dependencies["lib"], "^0.1.1");
    }

    #[test]
    fn test_update_manifest_touches_all_sections() {
        let fs = MemoryFs::default();
        let git = MemoryGit::default();
        let repo = repo_with_manifest(
            &fs,
            r#"{
	"name": "app",
	"version": "1.0.0",
	"dependencies": { "shared": "^1.0.0" },
	"peerDependencies": { "shared": ">=1.0.0" },
	"devDependencies": { "shared": "~1.0.0" }
}"#,
        );

        let bumps = vec![DependencyBump {
            name: "shared".into(),
            version: v("1.1.0"),
            breaking: false,
        }];
        update_manifest(
            &repo,
            &bumps,
            VersionStrategy::Caret,
            false,
            &MemoryChangesets::default(),
            &fs,
            &git,
        )
        .unwrap();

        let written = fs.get(&repo.manifest_path()).unwrap();
        assert!(written.contains("\"shared\": \"^1.1.0\""));
        assert!(written.contains("\"shared\": \">=1.1.0\""));
        assert!(written.contains("\"shared\": \"~1.1.0\""));
    }

    #[test]
    fn test_update_manifest_noop_when_nothing_listed() {
        let fs = MemoryFs::default();
        let git = MemoryGit::default();
        let repo = repo_with_manifest(
            &fs,
            r#"{ "name": "app", "version": "1.0.0", "dependencies": { "lib": "^1.0.0" } }"#,
        );

        let changesets = MemoryChangesets::default();
        let bumps = vec![DependencyBump {
            name: "absent".into(),
            version: v("2.0.0"),
            breaking: false,
        }];
        update_manifest(&repo, &bumps, VersionStrategy::Caret, true, &changesets, &fs, &git)
            .unwrap();

        // No rewrite, no commit, no changeset.
        assert!(git.commits_in(&repo.path).is_empty());
        assert_eq!(fs.paths().len(), 1);
        assert_eq!(changesets.count("app"), 0);
    }

    #[test]
    fn test_update_manifest_writes_auto_changeset() {
        let fs = MemoryFs::default();
        let git = MemoryGit::default();
        let repo = repo_with_manifest(
            &fs,
            r#"{ "name": "app", "version": "0.2.0", "dependencies": { "lib": "0.1.0" } }"#,
        );

        let changesets = MemoryChangesets::default();
        let bumps = vec![DependencyBump {
            name: "lib".into(),
            version: v("0.2.0"),
            breaking: true,
        }];
        update_manifest(&repo, &bumps, VersionStrategy::Caret, true, &changesets, &fs, &git)
            .unwrap();

        // The repo is now publishable again through its auto-changeset,
        // carrying the breaking-forced minor bump.
        assert_eq!(changesets.count("app"), 1);
        let read = changesets.read_changesets(&repo).unwrap();
        let generated = &read.changesets[0];
        assert_eq!(generated.entries.len(), 1);
        assert_eq!(generated.entries[0].package, "app");
        assert_eq!(generated.entries[0].bump, crate::version::Bump::Minor);
        assert!(generated.summary.contains("BREAKING CHANGES"));
    }
}
