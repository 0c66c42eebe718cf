//! Changeset reading behind the injection boundary, so the plan engine can
//! run against in-memory changesets in tests.

use std::path::PathBuf;

use crate::changeset::{self, DependencyBump, PredictedVersion, ReadChangesets};
use crate::error::OpsError;
use crate::ops::fs::LocalFs;
use crate::repo::Repository;

pub trait ChangesetOps {
    /// Whether the repository has at least one pending changeset file.
    fn has_changesets(&self, repo: &Repository) -> bool;

    /// All parsed changesets of the repository, plus per-file warnings.
    fn read_changesets(&self, repo: &Repository) -> Result<ReadChangesets, OpsError>;

    /// Aggregate pending changesets mentioning the repository into the
    /// predicted next version (maximum declared bump applied to the current
    /// version); `None` when nothing mentions it.
    fn predict_next_version(&self, repo: &Repository) -> Result<Option<PredictedVersion>, OpsError> {
        let read = self.read_changesets(repo)?;
        Ok(changeset::predict_next_version(repo, &read.changesets))
    }

    /// Synthesize an auto-changeset recording dependency updates, making
    /// the repository publishable on the next pass.
    fn write_auto_changeset(
        &self,
        repo: &Repository,
        updates: &[DependencyBump],
    ) -> Result<PathBuf, OpsError>;
}

/// Production implementation reading the repository's `.changeset/`
/// directory from disk.
#[derive(Debug, Clone, Default)]
pub struct FsChangesets;

impl ChangesetOps for FsChangesets {
    fn has_changesets(&self, repo: &Repository) -> bool {
        changeset::has_changesets(&repo.path)
    }

    fn read_changesets(&self, repo: &Repository) -> Result<ReadChangesets, OpsError> {
        changeset::read_changesets(&repo.path).map_err(|e| OpsError::Other(format!("{e:#}")))
    }

    fn write_auto_changeset(
        &self,
        repo: &Repository,
        updates: &[DependencyBump],
    ) -> Result<PathBuf, OpsError> {
        changeset::write_auto_changeset(repo, updates, &LocalFs)
            .map_err(|e| OpsError::Other(format!("{e:#}")))
    }
}
