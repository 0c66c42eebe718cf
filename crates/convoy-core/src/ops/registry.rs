//! Package-registry operations: availability polling, identity, install,
//! cache healing. The production implementation shells out to `npm`.

use std::path::Path;
use std::time::{Duration, Instant};

use semver::Version;
use tokio::sync::mpsc::UnboundedSender;

use crate::backoff::BackoffPolicy;
use crate::error::OpsError;
use crate::events::{Event, emit};
use crate::ops::process::{ProcessOps, ShellProcess, SpawnRequest, SpawnResult};

pub trait RegistryOps {
    /// Whether `name@version` is fetchable from the registry right now.
    fn is_package_available(&self, name: &str, version: &Version) -> Result<bool, OpsError>;

    /// The authenticated identity, or an error when not logged in.
    fn check_identity(&self) -> Result<String, OpsError>;

    fn ping(&self) -> Result<(), OpsError>;

    /// Install dependencies in `cwd` per its manifest.
    fn install(&self, cwd: &Path) -> SpawnResult;

    /// Clear the local registry cache.
    fn cache_clean(&self) -> Result<(), OpsError>;

    /// Poll until `name@version` is available: bounded exponential backoff
    /// plus a total-timeout budget. Exceeding either yields a failure that
    /// reports `is_timeout()`.
    fn wait_for_package(
        &self,
        name: &str,
        version: &Version,
        policy: &BackoffPolicy,
        max_wait: Duration,
        events: Option<&UnboundedSender<Event>>,
    ) -> Result<(), OpsError> {
        let start = Instant::now();

        for attempt in 1..=policy.max_attempts {
            if self.is_package_available(name, version)? {
                return Ok(());
            }

            let delay = policy.delay_for_attempt(attempt);
            if start.elapsed() + delay > max_wait {
                break;
            }

            emit(
                events,
                Event::RegistryWait {
                    name: name.to_string(),
                    version: version.to_string(),
                    attempt,
                },
            );
            std::thread::sleep(delay);
        }

        Err(OpsError::WaitTimeout {
            name: name.to_string(),
            version: version.to_string(),
            waited_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Production implementation talking to the npm registry through the `npm`
/// CLI. The install command line is configurable (`npm install` by
/// default); everything else is fixed npm surface.
#[derive(Debug, Clone)]
pub struct NpmRegistry {
    pub install_command: Vec<String>,
    process: ShellProcess,
}

impl NpmRegistry {
    pub fn new(install_command: Vec<String>) -> Self {
        Self {
            install_command,
            process: ShellProcess,
        }
    }

    fn npm(&self, args: &[&str]) -> SpawnResult {
        let request = SpawnRequest {
            program: "npm".to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: std::env::temp_dir(),
        };
        self.process.spawn(&request)
    }
}

impl Default for NpmRegistry {
    fn default() -> Self {
        Self::new(vec!["npm".to_string(), "install".to_string()])
    }
}

impl RegistryOps for NpmRegistry {
    fn is_package_available(&self, name: &str, version: &Version) -> Result<bool, OpsError> {
        let spec = format!("{name}@{version}");
        let result = self.npm(&["view", spec.as_str(), "version"]);
        if let Some(message) = result.message {
            // npm itself could not be spawned; that is an operational error,
            // not "package missing".
            return Err(OpsError::Registry {
                operation: "view".to_string(),
                message,
            });
        }
        Ok(result.ok && !result.stdout.trim().is_empty())
    }

    fn check_identity(&self) -> Result<String, OpsError> {
        let result = self.npm(&["whoami"]);
        if result.ok {
            Ok(result.stdout.trim().to_string())
        } else {
            Err(OpsError::Registry {
                operation: "whoami".to_string(),
                message: result.failure_message(),
            })
        }
    }

    fn ping(&self) -> Result<(), OpsError> {
        let result = self.npm(&["ping"]);
        if result.ok {
            Ok(())
        } else {
            Err(OpsError::Registry {
                operation: "ping".to_string(),
                message: result.failure_message(),
            })
        }
    }

    fn install(&self, cwd: &Path) -> SpawnResult {
        let request = SpawnRequest::from_command(&self.install_command, cwd);
        self.process.spawn(&request)
    }

    fn cache_clean(&self) -> Result<(), OpsError> {
        let result = self.npm(&["cache", "clean", "--force"]);
        if result.ok {
            Ok(())
        } else {
            Err(OpsError::Registry {
                operation: "cache clean".to_string(),
                message: result.failure_message(),
            })
        }
    }
}
