use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

/// Events emitted by the plan engine and the publishing orchestrator.
///
/// These decouple the core from the presentation layer: the CLI renders them
/// with a progress bar and colored lines, other frontends can consume the
/// same stream. Senders are optional everywhere; with no sender attached the
/// core is silent.
#[derive(Debug, Clone)]
pub enum Event {
    /// A publishing run is starting.
    PublishStarted { repo_count: usize, dry_run: bool },
    /// Work has started on a specific repository.
    PackageStarted { name: String },
    /// A repository's package was published (or validated, in dry-run mode).
    PackagePublished {
        name: String,
        version: String,
        duration: Duration,
    },
    /// A repository failed; the current pass stops after this.
    PackageFailed { name: String, error: String },
    /// Polling the registry for a freshly published version.
    RegistryWait {
        name: String,
        version: String,
        attempt: u32,
    },
    /// A dependent repository's manifest was rewritten.
    DependencyUpdated {
        repo: String,
        dependency: String,
        version: String,
    },
    /// Dependency installation started for a repository.
    InstallStarted { name: String },
    /// Dependency installation finished for a repository.
    InstallFinished { name: String, success: bool },
    /// Deployment started for a repository.
    DeployStarted { name: String },
    /// Progress update for the progress bar.
    Progress {
        completed: usize,
        total: usize,
        message: String,
    },
    /// A warning message.
    Warning(String),
    /// An informational message.
    Info(String),
}

/// Send an event if a sender is attached, ignoring a closed receiver.
pub(crate) fn emit(tx: Option<&UnboundedSender<Event>>, event: Event) {
    if let Some(tx) = tx {
        let _ = tx.send(event);
    }
}
