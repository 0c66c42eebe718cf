//! Semantic version algebra: bump classification, breaking-change rules,
//! and the small range subset the manifest updater understands.
//!
//! Versions themselves are `semver::Version`; comparison (including
//! pre-release ordering) comes from the semver crate. This module adds the
//! bump arithmetic on top.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use semver::Version;

/// The kind of version bump declared by a changeset or required by a
/// dependency update. Ordered `Patch < Minor < Major`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bump {
    Patch,
    Minor,
    Major,
}

impl fmt::Display for Bump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bump::Patch => write!(f, "patch"),
            Bump::Minor => write!(f, "minor"),
            Bump::Major => write!(f, "major"),
        }
    }
}

impl FromStr for Bump {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "patch" => Ok(Bump::Patch),
            "minor" => Ok(Bump::Minor),
            "major" => Ok(Bump::Major),
            other => bail!("unknown bump type '{}'", other),
        }
    }
}

/// Parse a version string, with file/field context in the error.
pub fn parse_version(raw: &str) -> Result<Version> {
    Version::parse(raw.trim()).with_context(|| format!("invalid version '{}'", raw))
}

/// Apply a bump to a version: strips pre-release and build metadata,
/// increments the requested field and zeroes the lower ones.
pub fn bump_version(version: &Version, bump: Bump) -> Version {
    match bump {
        Bump::Major => Version::new(version.major + 1, 0, 0),
        Bump::Minor => Version::new(version.major, version.minor + 1, 0),
        Bump::Patch => Version::new(version.major, version.minor, version.patch + 1),
    }
}

/// Whether applying `bump` to `current` is a breaking change.
///
/// For `>= 1.0.0` only a major bump breaks; in the 0.x range a minor bump
/// already signals an interface break, so minor-or-greater counts.
pub fn is_breaking(current: &Version, bump: Bump) -> bool {
    if current.major == 0 {
        bump >= Bump::Minor
    } else {
        bump == Bump::Major
    }
}

/// Derive the bump that produced `to` from `from`. Assumes `from < to`.
pub fn detect_bump(from: &Version, to: &Version) -> Bump {
    if to.major > from.major {
        Bump::Major
    } else if to.minor > from.minor {
        Bump::Minor
    } else {
        Bump::Patch
    }
}

// ---------------------------------------------------------------------------
// Ranges
// ---------------------------------------------------------------------------

/// The range prefix subset the system understands. Anything else is treated
/// as unparseable (and therefore always in need of an update).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangePrefix {
    /// No prefix: an exact pin (`1.2.3`).
    Exact,
    /// `^1.2.3`
    Caret,
    /// `~1.2.3`
    Tilde,
    /// `>=1.2.3`
    Gte,
    /// `*`, which matches nothing concrete for update-detection purposes.
    Any,
}

impl RangePrefix {
    pub fn as_str(self) -> &'static str {
        match self {
            RangePrefix::Exact => "",
            RangePrefix::Caret => "^",
            RangePrefix::Tilde => "~",
            RangePrefix::Gte => ">=",
            RangePrefix::Any => "*",
        }
    }
}

/// Detect the prefix of a range string.
pub fn range_prefix(range: &str) -> RangePrefix {
    let trimmed = range.trim();
    if trimmed == "*" {
        RangePrefix::Any
    } else if trimmed.starts_with(">=") {
        RangePrefix::Gte
    } else if trimmed.starts_with('^') {
        RangePrefix::Caret
    } else if trimmed.starts_with('~') {
        RangePrefix::Tilde
    } else {
        RangePrefix::Exact
    }
}

/// Parse the anchor version out of a range string.
///
/// Returns `None` for `*` and for anything that does not parse as a version
/// once the recognized prefix is stripped.
pub fn range_anchor(range: &str) -> Option<Version> {
    let trimmed = range.trim();
    let bare = match range_prefix(trimmed) {
        RangePrefix::Any => return None,
        prefix => trimmed[prefix.as_str().len()..].trim(),
    };
    Version::parse(bare).ok()
}

/// Whether a range already covers `version`: the version is at or above the
/// range's anchor. `*` and unparseable ranges match nothing concrete.
pub fn range_matches(range: &str, version: &Version) -> bool {
    range_anchor(range).is_some_and(|anchor| *version >= anchor)
}

/// Whether a recorded range needs rewriting for `new_version`: the anchor is
/// strictly below it. Unparseable ranges (including `*`) always do.
pub fn needs_update(range: &str, new_version: &Version) -> bool {
    match range_anchor(range) {
        Some(anchor) => anchor < *new_version,
        None => true,
    }
}
