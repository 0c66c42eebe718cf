//! Subprocess spawning. All external tools (publish, deploy, and anything
//! configured as an argv vector) run through here.

use std::path::{Path, PathBuf};

/// A subprocess to run: program, arguments, working directory. The working
/// directory is always set explicitly per spawn.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl SpawnRequest {
    /// Build a request from an argv vector (first element = program).
    pub fn from_command(command: &[String], cwd: &Path) -> Self {
        Self {
            program: command.first().cloned().unwrap_or_default(),
            args: command.iter().skip(1).cloned().collect(),
            cwd: cwd.to_path_buf(),
        }
    }
}

/// Outcome of a spawn. Spawning never returns an error across the
/// operations boundary: failures are carried as `ok = false` plus whatever
/// output and message are available.
#[derive(Debug, Clone, Default)]
pub struct SpawnResult {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    pub message: Option<String>,
}

impl SpawnResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            ok: true,
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            ok: false,
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    /// Best human-readable description of why the spawn failed.
    pub fn failure_message(&self) -> String {
        if let Some(message) = &self.message {
            return message.clone();
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        "command failed with no output".to_string()
    }
}

pub trait ProcessOps {
    fn spawn(&self, request: &SpawnRequest) -> SpawnResult;
}

/// Production implementation: blocking `std::process` spawn with captured
/// output.
#[derive(Debug, Clone, Default)]
pub struct ShellProcess;

impl ProcessOps for ShellProcess {
    fn spawn(&self, request: &SpawnRequest) -> SpawnResult {
        if request.program.is_empty() {
            return SpawnResult {
                ok: false,
                message: Some("empty command".to_string()),
                ..SpawnResult::default()
            };
        }

        let output = std::process::Command::new(&request.program)
            .args(&request.args)
            .current_dir(&request.cwd)
            .output();

        match output {
            Ok(output) => SpawnResult {
                ok: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                message: None,
            },
            Err(e) => SpawnResult {
                ok: false,
                stdout: String::new(),
                stderr: String::new(),
                message: Some(format!("failed to spawn '{}': {}", request.program, e)),
            },
        }
    }
}
