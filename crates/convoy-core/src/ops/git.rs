//! Git operations, shelling out to the `git` binary per repository
//! directory.

use std::path::Path;

use crate::error::OpsError;

pub trait GitOps {
    fn current_branch(&self, dir: &Path) -> Result<String, OpsError>;
    fn current_commit(&self, dir: &Path) -> Result<String, OpsError>;
    /// `true` when the working tree has no uncommitted changes.
    fn clean_workspace(&self, dir: &Path) -> Result<bool, OpsError>;
    fn checkout(&self, dir: &Path, git_ref: &str) -> Result<(), OpsError>;
    fn pull(&self, dir: &Path) -> Result<(), OpsError>;
    fn switch_branch(&self, dir: &Path, branch: &str) -> Result<(), OpsError>;
    fn has_remote(&self, dir: &Path) -> Result<bool, OpsError>;
    fn add(&self, dir: &Path, paths: &[&str]) -> Result<(), OpsError>;
    fn commit(&self, dir: &Path, message: &str) -> Result<(), OpsError>;
    fn add_and_commit(&self, dir: &Path, message: &str) -> Result<(), OpsError>;
    fn has_changes(&self, dir: &Path) -> Result<bool, OpsError>;
    /// Uncommitted paths from `git status --porcelain`.
    fn changed_files(&self, dir: &Path) -> Result<Vec<String>, OpsError>;
    fn tag(&self, dir: &Path, tag: &str, message: &str) -> Result<(), OpsError>;
    fn push_tag(&self, dir: &Path, tag: &str) -> Result<(), OpsError>;
    fn stash(&self, dir: &Path) -> Result<(), OpsError>;
    fn stash_pop(&self, dir: &Path) -> Result<(), OpsError>;
    fn file_changed_between(
        &self,
        dir: &Path,
        file: &str,
        from: &str,
        to: &str,
    ) -> Result<bool, OpsError>;
}

/// Production implementation shelling out to `git`.
#[derive(Debug, Clone, Default)]
pub struct ShellGit;

impl ShellGit {
    fn run(&self, dir: &Path, args: &[&str]) -> Result<std::process::Output, OpsError> {
        std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| OpsError::Git {
                operation: args.first().unwrap_or(&"?").to_string(),
                dir: dir.to_path_buf(),
                message: e.to_string(),
            })
    }

    fn run_ok(&self, dir: &Path, args: &[&str]) -> Result<(), OpsError> {
        let output = self.run(dir, args)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(OpsError::Git {
                operation: args.first().unwrap_or(&"?").to_string(),
                dir: dir.to_path_buf(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    fn run_stdout(&self, dir: &Path, args: &[&str]) -> Result<String, OpsError> {
        let output = self.run(dir, args)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(OpsError::Git {
                operation: args.first().unwrap_or(&"?").to_string(),
                dir: dir.to_path_buf(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl GitOps for ShellGit {
    fn current_branch(&self, dir: &Path) -> Result<String, OpsError> {
        self.run_stdout(dir, &["rev-parse", "--abbrev-ref", "HEAD"])
    }

    fn current_commit(&self, dir: &Path) -> Result<String, OpsError> {
        self.run_stdout(dir, &["rev-parse", "HEAD"])
    }

    fn clean_workspace(&self, dir: &Path) -> Result<bool, OpsError> {
        Ok(self.changed_files(dir)?.is_empty())
    }

    fn checkout(&self, dir: &Path, git_ref: &str) -> Result<(), OpsError> {
        self.run_ok(dir, &["checkout", git_ref])
    }

    fn pull(&self, dir: &Path) -> Result<(), OpsError> {
        self.run_ok(dir, &["pull", "--ff-only"])
    }

    fn switch_branch(&self, dir: &Path, branch: &str) -> Result<(), OpsError> {
        self.run_ok(dir, &["switch", branch])
    }

    fn has_remote(&self, dir: &Path) -> Result<bool, OpsError> {
        Ok(!self.run_stdout(dir, &["remote"])?.is_empty())
    }

    fn add(&self, dir: &Path, paths: &[&str]) -> Result<(), OpsError> {
        let mut args = vec!["add", "--"];
        args.extend_from_slice(paths);
        self.run_ok(dir, &args)
    }

    fn commit(&self, dir: &Path, message: &str) -> Result<(), OpsError> {
        self.run_ok(dir, &["commit", "-m", message])
    }

    fn add_and_commit(&self, dir: &Path, message: &str) -> Result<(), OpsError> {
        self.run_ok(dir, &["add", "-A"])?;
        self.commit(dir, message)
    }

    fn has_changes(&self, dir: &Path) -> Result<bool, OpsError> {
        Ok(!self.changed_files(dir)?.is_empty())
    }

    fn changed_files(&self, dir: &Path) -> Result<Vec<String>, OpsError> {
        let stdout = self.run_stdout(dir, &["status", "--porcelain"])?;
        Ok(stdout
            .lines()
            .filter(|line| line.len() > 3)
            .map(|line| line[3..].trim().to_string())
            .collect())
    }

    fn tag(&self, dir: &Path, tag: &str, message: &str) -> Result<(), OpsError> {
        self.run_ok(dir, &["tag", "-a", tag, "-m", message])
    }

    fn push_tag(&self, dir: &Path, tag: &str) -> Result<(), OpsError> {
        self.run_ok(dir, &["push", "origin", tag])
    }

    fn stash(&self, dir: &Path) -> Result<(), OpsError> {
        self.run_ok(dir, &["stash", "push", "--include-untracked"])
    }

    fn stash_pop(&self, dir: &Path) -> Result<(), OpsError> {
        self.run_ok(dir, &["stash", "pop"])
    }

    fn file_changed_between(
        &self,
        dir: &Path,
        file: &str,
        from: &str,
        to: &str,
    ) -> Result<bool, OpsError> {
        let range = format!("{from}..{to}");
        let stdout = self.run_stdout(dir, &["diff", "--name-only", &range, "--", file])?;
        Ok(!stdout.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command;
    use tempfile::TempDir;

    /// Initialize a throwaway git repository with one commit. Tests that
    /// need a real git binary are skipped when it is unavailable.
    fn init_repo(dir: &Path) -> bool {
        let git = |args: &[&str]| {
            Command::new("git")
                .args(args)
                .current_dir(dir)
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
        };
        if !git(&["init", "-b", "main"]) {
            return false;
        }
        git(&["config", "user.email", "test@example.com"]);
        git(&["config", "user.name", "Test"]);
        fs::write(dir.join("file.txt"), "initial").unwrap();
        git(&["add", "-A"]) && git(&["commit", "-m", "initial"])
    }

    #[test]
    fn test_branch_commit_and_cleanliness() {
        let dir = TempDir::new().unwrap();
        if !init_repo(dir.path()) {
            eprintln!("git unavailable; skipping");
            return;
        }
        let git = ShellGit;

        assert_eq!(git.current_branch(dir.path()).unwrap(), "main");
        assert_eq!(git.current_commit(dir.path()).unwrap().len(), 40);
        assert!(git.clean_workspace(dir.path()).unwrap());
        assert!(!git.has_changes(dir.path()).unwrap());

        fs::write(dir.path().join("dirty.txt"), "uncommitted").unwrap();
        assert!(!git.clean_workspace(dir.path()).unwrap());
        let changed = git.changed_files(dir.path()).unwrap();
        assert_eq!(changed, vec!["dirty.txt"]);
    }

    #[test]
    fn test_add_and_commit_cleans_tree() {
        let dir = TempDir::new().unwrap();
        if !init_repo(dir.path()) {
            eprintln!("git unavailable; skipping");
            return;
        }
        let git = ShellGit;

        fs::write(dir.path().join("new.txt"), "content").unwrap();
        git.add_and_commit(dir.path(), "update dependencies after publishing")
            .unwrap();
        assert!(git.clean_workspace(dir.path()).unwrap());
    }

    #[test]
    fn test_commit_without_changes_is_typed_error() {
        let dir = TempDir::new().unwrap();
        if !init_repo(dir.path()) {
            eprintln!("git unavailable; skipping");
            return;
        }
        let err = ShellGit.commit(dir.path(), "empty").unwrap_err();
        assert!(matches!(err, OpsError::Git { .. }));
    }
}
