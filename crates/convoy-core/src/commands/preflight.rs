//! Pre-flight validation: the single gate executed before the orchestrator
//! mutates anything. Checks accumulate; nothing short-circuits.

use anyhow::Result;

use crate::config::DEFAULT_BRANCH;
use crate::ops::{BuildOps, ChangesetOps, GitOps, RegistryOps};
use crate::repo::Repository;

#[derive(Debug, Clone)]
pub struct PreflightOptions {
    /// Branch every repository must be on.
    pub required_branch: String,
    /// Skip the changeset-presence warnings.
    pub skip_changeset_check: bool,
}

impl Default for PreflightOptions {
    fn default() -> Self {
        Self {
            required_branch: DEFAULT_BRANCH.to_string(),
            skip_changeset_check: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct PreflightResult {
    pub ok: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub repos_with_changesets: Vec<String>,
    pub repos_without_changesets: Vec<String>,
}

/// Run every check for every repository, then the registry identity check
/// once. The gate fails iff any check produced an error; warnings never
/// fail it.
pub fn run_preflight_checks(
    repos: &[Repository],
    opts: &PreflightOptions,
    changesets: &impl ChangesetOps,
    git: &impl GitOps,
    registry: &impl RegistryOps,
    build: &impl BuildOps,
) -> Result<PreflightResult> {
    let mut result = PreflightResult::default();

    for repo in repos {
        // Workspace cleanliness: any uncommitted file is an error.
        match git.changed_files(&repo.path) {
            Ok(files) if files.is_empty() => {}
            Ok(files) => result.errors.push(format!(
                "{} has uncommitted changes: {}",
                repo.name,
                files.join(", ")
            )),
            Err(e) => result
                .errors
                .push(format!("{}: could not inspect working tree: {e}", repo.name)),
        }

        // Branch check.
        match git.current_branch(&repo.path) {
            Ok(branch) if branch == opts.required_branch => {}
            Ok(branch) => result.errors.push(format!(
                "{} is on branch '{}', expected '{}'",
                repo.name, branch, opts.required_branch
            )),
            Err(e) => result
                .errors
                .push(format!("{}: could not determine branch: {e}", repo.name)),
        }

        // Changeset presence: a warning, never an error.
        if changesets.has_changesets(repo) {
            result.repos_with_changesets.push(repo.name.clone());
        } else {
            result.repos_without_changesets.push(repo.name.clone());
            if !opts.skip_changeset_check {
                result
                    .warnings
                    .push(format!("{} has no pending changesets", repo.name));
            }
        }
    }

    // Build validation for every repository that will publish.
    for name in result.repos_with_changesets.clone() {
        let repo = repos
            .iter()
            .find(|r| r.name == name)
            .expect("name collected from this repo list");
        let outcome = build.build_package(repo);
        if !outcome.ok {
            result.errors.push(format!(
                "build failed for {}: {}",
                repo.name,
                outcome.failure_message()
            ));
        }
    }

    // Registry authentication, once.
    if let Err(e) = registry.check_identity() {
        result
            .errors
            .push(format!("registry authentication failed: {e}"));
    }

    result.ok = result.errors.is_empty();
    Ok(result)
}
