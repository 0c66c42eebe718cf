//! Build validation: runs the configured build command in a repository.

use crate::ops::process::{ProcessOps, ShellProcess, SpawnRequest, SpawnResult};
use crate::repo::Repository;

pub trait BuildOps {
    fn build_package(&self, repo: &Repository) -> SpawnResult;
}

/// Production implementation running the configured build command line in
/// the repository directory.
#[derive(Debug, Clone)]
pub struct ShellBuild {
    pub command: Vec<String>,
    process: ShellProcess,
}

impl ShellBuild {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            process: ShellProcess,
        }
    }
}

impl BuildOps for ShellBuild {
    fn build_package(&self, repo: &Repository) -> SpawnResult {
        let request = SpawnRequest::from_command(&self.command, &repo.path);
        self.process.spawn(&request)
    }
}
