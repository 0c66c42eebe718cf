//! In-memory operation variants for tests.
//!
//! Every variant is a cheap clone sharing its state behind `Arc<Mutex<_>>`,
//! so a test can keep a handle, hand a clone to the orchestrator, and
//! mutate or inspect the shared state from the outside (for example, a
//! scripted publish command that consumes changesets and bumps manifests).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use semver::Version;

use crate::changeset::{Changeset, ChangesetEntry, ReadChangesets};
use crate::error::OpsError;
use crate::ops::build::BuildOps;
use crate::ops::changesets::ChangesetOps;
use crate::ops::fs::FsOps;
use crate::ops::git::GitOps;
use crate::ops::process::{ProcessOps, SpawnRequest, SpawnResult};
use crate::ops::registry::RegistryOps;
use crate::repo::Repository;
use crate::version::Bump;

// ---------------------------------------------------------------------------
// Changesets
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MemoryChangesets {
    sets: Arc<Mutex<HashMap<String, Vec<Changeset>>>>,
}

impl MemoryChangesets {
    /// Add a changeset declaring bumps, keyed by the repository it lives in.
    pub fn add(&self, repo_name: &str, filename: &str, entries: &[(&str, Bump)], summary: &str) {
        let changeset = Changeset {
            filename: filename.to_string(),
            entries: entries
                .iter()
                .map(|(package, bump)| ChangesetEntry {
                    package: (*package).to_string(),
                    bump: *bump,
                })
                .collect(),
            summary: summary.to_string(),
        };
        self.sets
            .lock()
            .unwrap()
            .entry(repo_name.to_string())
            .or_default()
            .push(changeset);
    }

    /// Remove all changesets of a repository (what the external publish
    /// tool does when it consumes them).
    pub fn clear(&self, repo_name: &str) {
        self.sets.lock().unwrap().remove(repo_name);
    }

    pub fn count(&self, repo_name: &str) -> usize {
        self.sets
            .lock()
            .unwrap()
            .get(repo_name)
            .map_or(0, Vec::len)
    }
}

impl ChangesetOps for MemoryChangesets {
    fn has_changesets(&self, repo: &Repository) -> bool {
        self.count(&repo.name) > 0
    }

    fn read_changesets(&self, repo: &Repository) -> Result<ReadChangesets, OpsError> {
        Ok(ReadChangesets {
            changesets: self
                .sets
                .lock()
                .unwrap()
                .get(&repo.name)
                .cloned()
                .unwrap_or_default(),
            warnings: Vec::new(),
        })
    }

    fn write_auto_changeset(
        &self,
        repo: &Repository,
        updates: &[crate::changeset::DependencyBump],
    ) -> Result<PathBuf, OpsError> {
        let bump = crate::changeset::required_bump_for(updates, &repo.version);
        let filename = format!("dependency-update-{}.md", self.count(&repo.name));
        let content = crate::changeset::generate_changeset_content(&repo.name, bump, updates);
        let parsed = crate::changeset::parse_changeset(&filename, &content)
            .ok_or_else(|| OpsError::Other("generated changeset failed to parse".to_string()))?;
        self.sets
            .lock()
            .unwrap()
            .entry(repo.name.clone())
            .or_default()
            .push(parsed);
        Ok(repo.path.join(".changeset").join(filename))
    }
}

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MemoryFs {
    files: Arc<Mutex<BTreeMap<PathBuf, String>>>,
}

impl MemoryFs {
    pub fn seed(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.files.lock().unwrap().insert(path.into(), content.into());
    }

    pub fn get(&self, path: &Path) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    /// All file paths currently present, in sorted order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.lock().unwrap().keys().cloned().collect()
    }
}

impl FsOps for MemoryFs {
    fn read_file(&self, path: &Path) -> Result<String, OpsError> {
        self.get(path).ok_or_else(|| OpsError::ReadFile {
            path: path.to_path_buf(),
            message: "no such file".to_string(),
        })
    }

    fn write_file(&self, path: &Path, content: &str) -> Result<(), OpsError> {
        self.seed(path, content);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }
}

// ---------------------------------------------------------------------------
// Git
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MemoryGit {
    branch: Arc<Mutex<String>>,
    dirty: Arc<Mutex<BTreeMap<PathBuf, Vec<String>>>>,
    commits: Arc<Mutex<Vec<(PathBuf, String)>>>,
}

impl Default for MemoryGit {
    fn default() -> Self {
        Self {
            branch: Arc::new(Mutex::new("main".to_string())),
            dirty: Arc::new(Mutex::new(BTreeMap::new())),
            commits: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MemoryGit {
    pub fn set_branch(&self, branch: &str) {
        *self.branch.lock().unwrap() = branch.to_string();
    }

    /// Mark a repository directory as having uncommitted files.
    pub fn set_dirty(&self, dir: &Path, files: &[&str]) {
        self.dirty.lock().unwrap().insert(
            dir.to_path_buf(),
            files.iter().map(|s| (*s).to_string()).collect(),
        );
    }

    /// Commit messages recorded for a directory.
    pub fn commits_in(&self, dir: &Path) -> Vec<String> {
        self.commits
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| d == dir)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl GitOps for MemoryGit {
    fn current_branch(&self, _dir: &Path) -> Result<String, OpsError> {
        Ok(self.branch.lock().unwrap().clone())
    }

    fn current_commit(&self, _dir: &Path) -> Result<String, OpsError> {
        Ok("0000000000000000000000000000000000000abc".to_string())
    }

    fn clean_workspace(&self, dir: &Path) -> Result<bool, OpsError> {
        Ok(self.changed_files(dir)?.is_empty())
    }

    fn checkout(&self, _dir: &Path, _git_ref: &str) -> Result<(), OpsError> {
        Ok(())
    }

    fn pull(&self, _dir: &Path) -> Result<(), OpsError> {
        Ok(())
    }

    fn switch_branch(&self, _dir: &Path, branch: &str) -> Result<(), OpsError> {
        self.set_branch(branch);
        Ok(())
    }

    fn has_remote(&self, _dir: &Path) -> Result<bool, OpsError> {
        Ok(true)
    }

    fn add(&self, _dir: &Path, _paths: &[&str]) -> Result<(), OpsError> {
        Ok(())
    }

    fn commit(&self, dir: &Path, message: &str) -> Result<(), OpsError> {
        self.commits
            .lock()
            .unwrap()
            .push((dir.to_path_buf(), message.to_string()));
        Ok(())
    }

    fn add_and_commit(&self, dir: &Path, message: &str) -> Result<(), OpsError> {
        self.commit(dir, message)
    }

    fn has_changes(&self, dir: &Path) -> Result<bool, OpsError> {
        Ok(!self.changed_files(dir)?.is_empty())
    }

    fn changed_files(&self, dir: &Path) -> Result<Vec<String>, OpsError> {
        Ok(self
            .dirty
            .lock()
            .unwrap()
            .get(dir)
            .cloned()
            .unwrap_or_default())
    }

    fn tag(&self, _dir: &Path, _tag: &str, _message: &str) -> Result<(), OpsError> {
        Ok(())
    }

    fn push_tag(&self, _dir: &Path, _tag: &str) -> Result<(), OpsError> {
        Ok(())
    }

    fn stash(&self, _dir: &Path) -> Result<(), OpsError> {
        Ok(())
    }

    fn stash_pop(&self, _dir: &Path) -> Result<(), OpsError> {
        Ok(())
    }

    fn file_changed_between(
        &self,
        _dir: &Path,
        _file: &str,
        _from: &str,
        _to: &str,
    ) -> Result<bool, OpsError> {
        Ok(false)
    }
}

// ---------------------------------------------------------------------------
// Process
// ---------------------------------------------------------------------------

pub type SpawnHandler = Arc<dyn Fn(&SpawnRequest) -> SpawnResult + Send + Sync>;

#[derive(Clone)]
pub struct MemoryProcess {
    handler: SpawnHandler,
    calls: Arc<Mutex<Vec<SpawnRequest>>>,
}

impl MemoryProcess {
    /// A process runner whose every spawn succeeds with empty output.
    pub fn ok() -> Self {
        Self::with_handler(|_| SpawnResult::success(""))
    }

    pub fn with_handler(handler: impl Fn(&SpawnRequest) -> SpawnResult + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<SpawnRequest> {
        self.calls.lock().unwrap().clone()
    }
}

impl ProcessOps for MemoryProcess {
    fn spawn(&self, request: &SpawnRequest) -> SpawnResult {
        self.calls.lock().unwrap().push(request.clone());
        (self.handler)(request)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MemoryRegistry {
    available: Arc<Mutex<BTreeSet<String>>>,
    /// `spec -> remaining polls before it reports available`.
    delayed: Arc<Mutex<HashMap<String, u32>>>,
    polls: Arc<Mutex<HashMap<String, u32>>>,
    identity: Arc<Mutex<Option<String>>>,
    install_results: Arc<Mutex<HashMap<PathBuf, Vec<SpawnResult>>>>,
    installs: Arc<Mutex<Vec<PathBuf>>>,
    cache_cleans: Arc<Mutex<u32>>,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self {
            available: Arc::new(Mutex::new(BTreeSet::new())),
            delayed: Arc::new(Mutex::new(HashMap::new())),
            polls: Arc::new(Mutex::new(HashMap::new())),
            identity: Arc::new(Mutex::new(Some("ci-bot".to_string()))),
            install_results: Arc::new(Mutex::new(HashMap::new())),
            installs: Arc::new(Mutex::new(Vec::new())),
            cache_cleans: Arc::new(Mutex::new(0)),
        }
    }
}

impl MemoryRegistry {
    fn spec(name: &str, version: &Version) -> String {
        format!("{name}@{version}")
    }

    pub fn make_available(&self, name: &str, version: &Version) {
        self.available.lock().unwrap().insert(Self::spec(name, version));
    }

    /// Report available only from the `polls_needed`-th availability check.
    pub fn make_available_after(&self, name: &str, version: &Version, polls_needed: u32) {
        self.delayed
            .lock()
            .unwrap()
            .insert(Self::spec(name, version), polls_needed);
    }

    pub fn poll_count(&self, name: &str, version: &Version) -> u32 {
        self.polls
            .lock()
            .unwrap()
            .get(&Self::spec(name, version))
            .copied()
            .unwrap_or(0)
    }

    pub fn set_identity(&self, identity: Option<&str>) {
        *self.identity.lock().unwrap() = identity.map(str::to_string);
    }

    /// Queue install outcomes for a directory; consumed in order, then
    /// installs succeed.
    pub fn script_install(&self, cwd: &Path, results: Vec<SpawnResult>) {
        self.install_results
            .lock()
            .unwrap()
            .insert(cwd.to_path_buf(), results);
    }

    pub fn installs(&self) -> Vec<PathBuf> {
        self.installs.lock().unwrap().clone()
    }

    pub fn cache_clean_count(&self) -> u32 {
        *self.cache_cleans.lock().unwrap()
    }
}

impl RegistryOps for MemoryRegistry {
    fn is_package_available(&self, name: &str, version: &Version) -> Result<bool, OpsError> {
        let spec = Self::spec(name, version);
        let count = {
            let mut polls = self.polls.lock().unwrap();
            let count = polls.entry(spec.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if let Some(needed) = self.delayed.lock().unwrap().get(&spec) {
            return Ok(count >= *needed);
        }
        Ok(self.available.lock().unwrap().contains(&spec))
    }

    fn check_identity(&self) -> Result<String, OpsError> {
        self.identity
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| OpsError::Registry {
                operation: "whoami".to_string(),
                message: "not authenticated".to_string(),
            })
    }

    fn ping(&self) -> Result<(), OpsError> {
        Ok(())
    }

    fn install(&self, cwd: &Path) -> SpawnResult {
        self.installs.lock().unwrap().push(cwd.to_path_buf());
        let mut scripted = self.install_results.lock().unwrap();
        if let Some(queue) = scripted.get_mut(cwd) {
            if !queue.is_empty() {
                return queue.remove(0);
            }
        }
        SpawnResult::success("")
    }

    fn cache_clean(&self) -> Result<(), OpsError> {
        *self.cache_cleans.lock().unwrap() += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MemoryBuild {
    failures: Arc<Mutex<BTreeMap<String, String>>>,
    builds: Arc<Mutex<Vec<String>>>,
}

impl MemoryBuild {
    /// Make builds of the named repository fail with the given stderr.
    pub fn fail(&self, repo_name: &str, stderr: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(repo_name.to_string(), stderr.to_string());
    }

    pub fn builds(&self) -> Vec<String> {
        self.builds.lock().unwrap().clone()
    }
}

impl BuildOps for MemoryBuild {
    fn build_package(&self, repo: &Repository) -> SpawnResult {
        self.builds.lock().unwrap().push(repo.name.clone());
        match self.failures.lock().unwrap().get(&repo.name) {
            Some(stderr) => SpawnResult::failure(stderr.clone()),
            None => SpawnResult::success(""),
        }
    }
}
