//! The changeset file format: the small declarative format that drives
//! version planning, plus the generator for auto-synthesized changesets.
//!
//! A changeset lives in the repository's `.changeset/` directory as a `.md`
//! file (the `README.md` there is reserved documentation, not a changeset):
//!
//! ```text
//! ---
//! "package-name": minor
//! "other-package": patch
//! ---
//!
//! Free-text summary of the change.
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use semver::Version;

use crate::ops::FsOps;
use crate::repo::Repository;
use crate::version::{Bump, bump_version};

/// Reserved subdirectory holding changeset files.
pub const CHANGESET_DIR: &str = ".changeset";

/// Extension of changeset files.
pub const CHANGESET_EXT: &str = "md";

/// Documentation file excluded from changeset reading.
pub const RESERVED_DOC_FILE: &str = "README.md";

/// One `(package, bump)` declaration inside a changeset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangesetEntry {
    pub package: String,
    pub bump: Bump,
}

/// A parsed changeset file.
#[derive(Debug, Clone)]
pub struct Changeset {
    /// Originating file name (not the full path).
    pub filename: String,
    pub entries: Vec<ChangesetEntry>,
    pub summary: String,
}

/// Result of scanning a repository's changeset directory. Unparseable files
/// are skipped with a warning rather than failing the scan.
#[derive(Debug, Default)]
pub struct ReadChangesets {
    pub changesets: Vec<Changeset>,
    pub warnings: Vec<String>,
}

/// A predicted next version, aggregated from all pending changesets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictedVersion {
    pub version: Version,
    pub bump: Bump,
}

/// Path to a repository's changeset directory.
pub fn changeset_dir(repo_path: &Path) -> PathBuf {
    repo_path.join(CHANGESET_DIR)
}

/// Parse a changeset from file content.
///
/// The frame is two lines of exactly three hyphens. Between them, each
/// non-blank line is `"<name>": <bump>` (single quotes tolerated, leading
/// whitespace tolerated). The remainder after the closing frame is the
/// summary. A file with no parseable package lines yields `None`.
pub fn parse_changeset(filename: &str, content: &str) -> Option<Changeset> {
    let entry_re = regex::Regex::new(
        r#"^\s*["']([^"']+)["']\s*:\s*(major|minor|patch)\s*$"#,
    )
    .ok()?;

    let mut lines = content.lines();
    let mut entries = Vec::new();
    let mut in_frame = false;
    let mut closed = false;

    for line in lines.by_ref() {
        let trimmed = line.trim();
        if trimmed == "---" {
            if in_frame {
                closed = true;
                break;
            }
            in_frame = true;
            continue;
        }
        if !in_frame || trimmed.is_empty() {
            continue;
        }
        if let Some(caps) = entry_re.captures(line) {
            let bump = match &caps[2] {
                "major" => Bump::Major,
                "minor" => Bump::Minor,
                _ => Bump::Patch,
            };
            entries.push(ChangesetEntry {
                package: caps[1].to_string(),
                bump,
            });
        }
    }

    if !closed || entries.is_empty() {
        return None;
    }

    let summary = lines.collect::<Vec<_>>().join("\n").trim().to_string();

    Some(Changeset {
        filename: filename.to_string(),
        entries,
        summary,
    })
}

/// Whether a directory entry name looks like a changeset file.
fn is_changeset_filename(name: &str) -> bool {
    name != RESERVED_DOC_FILE
        && Path::new(name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(CHANGESET_EXT))
}

/// Whether the repository has at least one pending changeset file.
///
/// A missing directory is not an error, it simply means "no changesets".
pub fn has_changesets(repo_path: &Path) -> bool {
    let dir = changeset_dir(repo_path);
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        entry
            .file_name()
            .to_str()
            .is_some_and(is_changeset_filename)
    })
}

/// Read and parse all changesets of a repository, in file-name order.
pub fn read_changesets(repo_path: &Path) -> Result<ReadChangesets> {
    let dir = changeset_dir(repo_path);
    let mut out = ReadChangesets::default();

    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", dir.display()));
        }
    };

    let mut filenames: Vec<String> = entries
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .into_iter()
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| is_changeset_filename(name))
        .collect();
    filenames.sort();

    for filename in filenames {
        let path = dir.join(&filename);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        match parse_changeset(&filename, &content) {
            Some(changeset) => out.changesets.push(changeset),
            None => out.warnings.push(format!(
                "changeset {} has no parseable package entries; skipping",
                path.display()
            )),
        }
    }

    Ok(out)
}

/// Aggregate all changesets mentioning `repo` into a predicted next version:
/// the maximum declared bump applied to the current version. `None` when no
/// changeset mentions the repository.
pub fn predict_next_version(repo: &Repository, changesets: &[Changeset]) -> Option<PredictedVersion> {
    let bump = changesets
        .iter()
        .flat_map(|cs| cs.entries.iter())
        .filter(|entry| entry.package == repo.name)
        .map(|entry| entry.bump)
        .max()?;

    Some(PredictedVersion {
        version: bump_version(&repo.version, bump),
        bump,
    })
}

/// Render a declared changeset from entries and a summary, in the same
/// framing the parser reads back.
pub fn compose_changeset(entries: &[ChangesetEntry], summary: &str) -> String {
    let mut out = String::from("---\n");
    for entry in entries {
        out.push_str(&format!("\"{}\": {}\n", entry.package, entry.bump));
    }
    out.push_str("---\n");
    if !summary.trim().is_empty() {
        out.push('\n');
        out.push_str(summary.trim());
        out.push('\n');
    }
    out
}

// ---------------------------------------------------------------------------
// Auto-changeset generation
// ---------------------------------------------------------------------------

/// A dependency update to record in an auto-changeset.
#[derive(Debug, Clone)]
pub struct DependencyBump {
    pub name: String,
    pub version: Version,
    pub breaking: bool,
}

/// Bump a package must take because of the given dependency updates: at
/// least patch, and a breaking update forces minor (0.x) or major (>=1.0).
pub fn required_bump_for(updates: &[DependencyBump], current: &Version) -> Bump {
    if updates.iter().any(|u| u.breaking) {
        if current.major == 0 { Bump::Minor } else { Bump::Major }
    } else {
        Bump::Patch
    }
}

/// Render auto-changeset content for a package.
pub fn generate_changeset_content(
    package: &str,
    bump: Bump,
    updates: &[DependencyBump],
) -> String {
    let breaking: Vec<&DependencyBump> = updates.iter().filter(|u| u.breaking).collect();
    let regular: Vec<&DependencyBump> = updates.iter().filter(|u| !u.breaking).collect();

    let mut out = String::new();
    out.push_str("---\n");
    out.push_str(&format!("\"{}\": {}\n", package, bump));
    out.push_str("---\n\n");

    if breaking.is_empty() {
        out.push_str("Update dependencies\n");
    } else {
        out.push_str("Update dependencies (BREAKING CHANGES)\n");
    }

    if !breaking.is_empty() {
        out.push_str("\nBreaking updates:\n\n");
        for update in &breaking {
            out.push_str(&format!("- `{}@{}`\n", update.name, update.version));
        }
    }
    if !regular.is_empty() {
        out.push_str("\nUpdates:\n\n");
        for update in &regular {
            out.push_str(&format!("- `{}@{}`\n", update.name, update.version));
        }
    }

    out
}

/// Generate a changeset file name: `dependency-update-<unixMs>-<suffix>.md`.
fn auto_changeset_filename(unix_ms: u128, suffix: &str) -> String {
    format!("dependency-update-{}-{}.{}", unix_ms, suffix, CHANGESET_EXT)
}

fn random_suffix() -> String {
    use rand::Rng;
    use rand::distributions::Alphanumeric;
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect()
}

/// Write an auto-changeset recording `updates` into the repository's
/// changeset directory. The file name embeds a timestamp and a random
/// suffix; on the (unlikely) collision the name is regenerated.
pub fn write_auto_changeset(
    repo: &Repository,
    updates: &[DependencyBump],
    fs: &impl FsOps,
) -> Result<PathBuf> {
    let bump = required_bump_for(updates, &repo.version);
    let content = generate_changeset_content(&repo.name, bump, updates);

    let unix_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);

    let dir = changeset_dir(&repo.path);
    let mut path = dir.join(auto_changeset_filename(unix_ms, &random_suffix()));
    while fs.exists(&path) {
        path = dir.join(auto_changeset_filename(unix_ms, &random_suffix()));
    }

    fs.write_file(&path, &content)
        .with_context(|| format!("Failed to write auto-changeset for {}", repo.name))?;

    Ok(path)
}
