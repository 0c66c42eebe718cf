//! The multi-repo publishing orchestrator: executes a plan against the
//! registry in dependency order, confirms availability, cascades manifest
//! updates to dependents, batch-installs, and optionally deploys.
//!
//! Strictly sequential by design: the registry and the on-disk clones are
//! shared mutable resources, and publishing order carries meaning. Partial
//! failure leaves committed manifest edits and auto-changesets on disk;
//! re-running resumes because published packages no longer have changesets
//! and stale dependents are re-detected.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use semver::Version;
use tokio::sync::mpsc::UnboundedSender;

use crate::backoff::BackoffPolicy;
use crate::changeset::DependencyBump;
use crate::commands::plan::MAX_ITERATIONS;
use crate::commands::preflight::{PreflightOptions, run_preflight_checks};
use crate::config::{CommandsConfig, ConvoyConfig, DEFAULT_BRANCH};
use crate::events::{Event, emit};
use crate::manifest::{self, VersionStrategy};
use crate::ops::{
    BuildOps, ChangesetOps, FsOps, GitOps, Ops, ProcessOps, RegistryOps, SpawnRequest,
};
use crate::repo::Repository;
use crate::validation::{ValidateOptions, validate_graph};
use crate::version::{Bump, detect_bump, is_breaking, needs_update};

/// Total availability-wait budget per package (10 minutes).
pub const DEFAULT_MAX_WAIT_MS: u64 = 600_000;

#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub dry_run: bool,
    /// Always true in production; exists so tests can isolate the publish
    /// step.
    pub update_deps: bool,
    pub version_strategy: VersionStrategy,
    pub deploy: bool,
    pub max_wait_ms: u64,
    pub skip_install: bool,
    pub required_branch: String,
    pub publish_command: Vec<String>,
    pub deploy_command: Vec<String>,
    pub backoff: BackoffPolicy,
}

impl Default for PublishOptions {
    fn default() -> Self {
        let commands = CommandsConfig::default();
        Self {
            dry_run: false,
            update_deps: true,
            version_strategy: VersionStrategy::Caret,
            deploy: false,
            max_wait_ms: DEFAULT_MAX_WAIT_MS,
            skip_install: false,
            required_branch: DEFAULT_BRANCH.to_string(),
            publish_command: commands.publish,
            deploy_command: commands.deploy,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl PublishOptions {
    /// Options wired from a loaded configuration.
    pub fn from_config(config: &ConvoyConfig) -> Self {
        Self {
            required_branch: config.required_branch.clone(),
            publish_command: config.commands.publish.clone(),
            deploy_command: config.commands.deploy.clone(),
            ..Self::default()
        }
    }
}

/// One successfully published package version.
#[derive(Debug, Clone)]
pub struct PublishedVersion {
    pub name: String,
    pub version: Version,
    pub bump: Option<Bump>,
    pub breaking: bool,
    /// Commit hash after the publish tool's own commit; `"dry_run"` when
    /// nothing was executed.
    pub commit: String,
}

#[derive(Debug, Clone)]
pub struct PublishFailure {
    pub name: String,
    pub error: String,
}

#[derive(Debug)]
pub struct PublishingResult {
    pub ok: bool,
    pub published: Vec<PublishedVersion>,
    pub failed: Vec<PublishFailure>,
    pub duration: Duration,
}

/// Publish every repository with pending changesets, in dependency order.
pub fn publish<C, G, F, P, R, B>(
    repos: &[Repository],
    opts: &PublishOptions,
    ops: &Ops<C, G, F, P, R, B>,
    events: Option<&UnboundedSender<Event>>,
) -> Result<PublishingResult>
where
    C: ChangesetOps,
    G: GitOps,
    F: FsOps,
    P: ProcessOps,
    R: RegistryOps,
    B: BuildOps,
{
    let start = Instant::now();

    if !opts.dry_run {
        let preflight = run_preflight_checks(
            repos,
            &PreflightOptions {
                required_branch: opts.required_branch.clone(),
                skip_changeset_check: false,
            },
            &ops.changesets,
            &ops.git,
            &ops.registry,
            &ops.build,
        )?;
        for warning in &preflight.warnings {
            emit(events, Event::Warning(warning.clone()));
        }
        if !preflight.ok {
            bail!("pre-flight validation failed:\n  {}", preflight.errors.join("\n  "));
        }
    }

    let validated = validate_graph(
        repos,
        &ValidateOptions {
            fail_on_production_cycles: true,
            log_cycles: true,
            log_order: true,
        },
        events,
    )?;
    let order = validated.publishing_order;

    emit(
        events,
        Event::PublishStarted {
            repo_count: repos.len(),
            dry_run: opts.dry_run,
        },
    );

    let by_name: BTreeMap<&str, &Repository> =
        repos.iter().map(|r| (r.name.as_str(), r)).collect();

    let mut published: Vec<PublishedVersion> = Vec::new();
    let mut published_names: BTreeSet<String> = BTreeSet::new();
    // name -> (version, breaking), cumulative across passes.
    let mut published_versions: BTreeMap<String, (Version, bool)> = BTreeMap::new();
    let mut failed: Vec<PublishFailure> = Vec::new();
    let mut changed_repos: BTreeSet<String> = BTreeSet::new();

    'outer: for pass in 1..=MAX_ITERATIONS {
        let mut published_this_pass = 0usize;
        let mut changed_in_pass: BTreeSet<String> = BTreeSet::new();
        let mut fatal = false;

        for name in &order {
            if published_names.contains(name) {
                continue;
            }
            let repo = by_name[name.as_str()];
            if !ops.changesets.has_changesets(repo) {
                continue;
            }

            emit(events, Event::PackageStarted { name: name.clone() });
            let package_start = Instant::now();

            let outcome = publish_one(repo, opts, ops).and_then(|maybe| {
                let Some(version) = maybe else { return Ok(None) };
                if !opts.dry_run {
                    ops.registry
                        .wait_for_package(
                            &version.name,
                            &version.version,
                            &opts.backoff,
                            Duration::from_millis(opts.max_wait_ms),
                            events,
                        )
                        .map_err(|e| anyhow!(e))?;
                }
                Ok(Some(version))
            });

            let version = match outcome {
                Ok(Some(version)) => version,
                Ok(None) => continue,
                Err(e) => {
                    let error = format!("{e:#}");
                    emit(
                        events,
                        Event::PackageFailed {
                            name: name.clone(),
                            error: error.clone(),
                        },
                    );
                    failed.push(PublishFailure {
                        name: name.clone(),
                        error,
                    });
                    fatal = true;
                    break;
                }
            };

            emit(
                events,
                Event::PackagePublished {
                    name: version.name.clone(),
                    version: version.version.to_string(),
                    duration: package_start.elapsed(),
                },
            );
            published_names.insert(name.clone());
            published_versions.insert(name.clone(), (version.version.clone(), version.breaking));
            changed_repos.insert(name.clone());
            published_this_pass += 1;

            // Cascade: rewrite every repository (in the full set) whose
            // prod/peer range no longer covers the fresh version.
            if opts.update_deps && !opts.dry_run {
                for other in repos {
                    if other.name == version.name {
                        continue;
                    }
                    let Some((range, _)) = other.prod_or_peer_range(&version.name) else {
                        continue;
                    };
                    if !needs_update(range, &version.version) {
                        continue;
                    }
                    let bumps = vec![DependencyBump {
                        name: version.name.clone(),
                        version: version.version.clone(),
                        breaking: version.breaking,
                    }];
                    if let Err(e) = manifest::update_manifest(
                        other,
                        &bumps,
                        opts.version_strategy,
                        true,
                        &ops.changesets,
                        &ops.fs,
                        &ops.git,
                    ) {
                        let error = format!("{e:#}");
                        emit(
                            events,
                            Event::PackageFailed {
                                name: other.name.clone(),
                                error: error.clone(),
                            },
                        );
                        failed.push(PublishFailure {
                            name: other.name.clone(),
                            error,
                        });
                        fatal = true;
                        break;
                    }
                    emit(
                        events,
                        Event::DependencyUpdated {
                            repo: other.name.clone(),
                            dependency: version.name.clone(),
                            version: version.version.to_string(),
                        },
                    );
                    changed_in_pass.insert(other.name.clone());
                    changed_repos.insert(other.name.clone());
                }
            }

            published.push(version);
            if fatal {
                break;
            }
        }

        // Batch install for manifests rewritten in this pass (never for
        // merely republished repositories).
        if !opts.dry_run && !opts.skip_install {
            for name in &changed_in_pass {
                let repo = by_name[name.as_str()];
                if let Err(e) = install_with_cache_healing(repo, &ops.registry, events) {
                    failed.push(PublishFailure {
                        name: name.clone(),
                        error: format!("{e:#}"),
                    });
                }
            }
        }

        if fatal {
            break 'outer;
        }
        if published_this_pass == 0 {
            break;
        }
        if pass == MAX_ITERATIONS {
            emit(
                events,
                Event::Warning(format!(
                    "publishing did not converge after {MAX_ITERATIONS} maximum iterations; \
                     re-run to continue with the remaining packages"
                )),
            );
        }
    }

    // Dev-dependency pass: point dev ranges at versions published in this
    // run. No republish and no changeset generation.
    if failed.is_empty() && !opts.dry_run && opts.update_deps && !published_versions.is_empty() {
        let mut dev_changed: BTreeSet<String> = BTreeSet::new();
        for repo in repos {
            let bumps: Vec<DependencyBump> = repo
                .dev_dependencies
                .iter()
                .filter_map(|(dep, range)| {
                    let (version, breaking) = published_versions.get(dep)?;
                    needs_update(range, version).then(|| DependencyBump {
                        name: dep.clone(),
                        version: version.clone(),
                        breaking: *breaking,
                    })
                })
                .collect();
            if bumps.is_empty() {
                continue;
            }
            if let Err(e) = manifest::update_manifest(
                repo,
                &bumps,
                opts.version_strategy,
                false,
                &ops.changesets,
                &ops.fs,
                &ops.git,
            ) {
                failed.push(PublishFailure {
                    name: repo.name.clone(),
                    error: format!("{e:#}"),
                });
                continue;
            }
            for bump in &bumps {
                emit(
                    events,
                    Event::DependencyUpdated {
                        repo: repo.name.clone(),
                        dependency: bump.name.clone(),
                        version: bump.version.to_string(),
                    },
                );
            }
            dev_changed.insert(repo.name.clone());
            changed_repos.insert(repo.name.clone());
        }

        if !opts.skip_install {
            for name in &dev_changed {
                let repo = by_name[name.as_str()];
                if let Err(e) = install_with_cache_healing(repo, &ops.registry, events) {
                    failed.push(PublishFailure {
                        name: name.clone(),
                        error: format!("{e:#}"),
                    });
                }
            }
        }
    }

    // Deployment: changed = republished + updated dependents. Failures are
    // warnings, not errors.
    if failed.is_empty() && opts.deploy && !opts.dry_run {
        for name in &changed_repos {
            let repo = by_name[name.as_str()];
            emit(events, Event::DeployStarted { name: name.clone() });
            let result = ops
                .process
                .spawn(&SpawnRequest::from_command(&opts.deploy_command, &repo.path));
            if !result.ok {
                emit(
                    events,
                    Event::Warning(format!(
                        "deploy failed for {name}: {}",
                        result.failure_message()
                    )),
                );
            }
        }
    }

    Ok(PublishingResult {
        ok: failed.is_empty(),
        published,
        failed,
        duration: start.elapsed(),
    })
}

/// Publish a single repository. In dry-run mode the version is predicted
/// from pending changesets and nothing is executed; `None` means the
/// changesets do not mention this repository and there is nothing to do.
fn publish_one<C, G, F, P, R, B>(
    repo: &Repository,
    opts: &PublishOptions,
    ops: &Ops<C, G, F, P, R, B>,
) -> Result<Option<PublishedVersion>>
where
    C: ChangesetOps,
    G: GitOps,
    F: FsOps,
    P: ProcessOps,
    R: RegistryOps,
    B: BuildOps,
{
    if opts.dry_run {
        let Some(prediction) = ops.changesets.predict_next_version(repo)? else {
            return Ok(None);
        };
        return Ok(Some(PublishedVersion {
            name: repo.name.clone(),
            breaking: is_breaking(&repo.version, prediction.bump),
            bump: Some(prediction.bump),
            version: prediction.version,
            commit: "dry_run".to_string(),
        }));
    }

    let result = ops
        .process
        .spawn(&SpawnRequest::from_command(&opts.publish_command, &repo.path));
    if !result.ok {
        bail!("publish failed for {}: {}", repo.name, result.failure_message());
    }

    // The external tool consumed the changesets and bumped the manifest;
    // re-read it to learn the new version.
    let manifest_content = ops
        .fs
        .read_file(&repo.manifest_path())
        .with_context(|| format!("re-reading manifest of {}", repo.name))?;
    let reread = Repository::from_manifest_str(&repo.path, &manifest_content)?;
    if reread.version <= repo.version {
        bail!(
            "publish reported success for {} but the manifest version did not advance ({} -> {})",
            repo.name,
            repo.version,
            reread.version
        );
    }

    let bump = detect_bump(&repo.version, &reread.version);
    let commit = ops.git.current_commit(&repo.path)?;

    Ok(Some(PublishedVersion {
        name: repo.name.clone(),
        breaking: is_breaking(&repo.version, bump),
        bump: Some(bump),
        version: reread.version,
        commit,
    }))
}

/// Stderr signatures of the registry's "target version not matched" error
/// family, which a cache clean typically heals.
fn is_version_not_found(stderr: &str) -> bool {
    stderr.contains("ETARGET")
        || stderr.contains("etarget")
        || stderr.to_lowercase().contains("no matching version")
}

/// Install dependencies with one cache-healing retry: a stale-version
/// signature triggers a registry cache clean and a second attempt; anything
/// else fails the repository immediately.
fn install_with_cache_healing(
    repo: &Repository,
    registry: &impl RegistryOps,
    events: Option<&UnboundedSender<Event>>,
) -> Result<()> {
    emit(events, Event::InstallStarted { name: repo.name.clone() });

    let result = registry.install(&repo.path);
    if result.ok {
        emit(
            events,
            Event::InstallFinished {
                name: repo.name.clone(),
                success: true,
            },
        );
        return Ok(());
    }

    if is_version_not_found(&result.stderr) {
        emit(
            events,
            Event::Warning(format!(
                "install for {} hit a stale registry cache; cleaning and retrying",
                repo.name
            )),
        );
        registry.cache_clean().map_err(|e| anyhow!(e))?;
        let retry = registry.install(&repo.path);
        emit(
            events,
            Event::InstallFinished {
                name: repo.name.clone(),
                success: retry.ok,
            },
        );
        if retry.ok {
            return Ok(());
        }
        bail!(
            "install failed for {} after cache clean: {}",
            repo.name,
            retry.failure_message()
        );
    }

    emit(
        events,
        Event::InstallFinished {
            name: repo.name.clone(),
            success: false,
        },
    );
    bail!("install failed for {}: {}", repo.name, result.failure_message());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset;
    use crate::ops::memory::{MemoryChangesets, MemoryFs, MemoryProcess, MemoryRegistry};
    use crate::ops::{MemoryOps, SpawnResult};
    use std::path::{Path, PathBuf};

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn manifest_json(name: &str, version: &str, deps: &[(&str, &str)], dev: &[(&str, &str)]) -> String {
        let mut m = serde_json::json!({ "name": name, "version": version });
        if !deps.is_empty() {
            m["dependencies"] = deps
                .iter()
                .map(|(k, r)| ((*k).to_string(), serde_json::json!(r)))
                .collect::<serde_json::Map<_, _>>()
                .into();
        }
        if !dev.is_empty() {
            m["devDependencies"] = dev
                .iter()
                .map(|(k, r)| ((*k).to_string(), serde_json::json!(r)))
                .collect::<serde_json::Map<_, _>>()
                .into();
        }
        m.to_string()
    }

    /// Build a repository and seed its manifest into the in-memory fs.
    fn seed_repo(
        fs: &MemoryFs,
        name: &str,
        version: &str,
        deps: &[(&str, &str)],
        dev: &[(&str, &str)],
    ) -> Repository {
        let path = PathBuf::from(format!("/repos/{name}"));
        let manifest = manifest_json(name, version, deps, dev);
        fs.seed(path.join("package.json"), manifest.clone());
        Repository::from_manifest_str(&path, &manifest).unwrap()
    }

    fn fast_options() -> PublishOptions {
        PublishOptions {
            publish_command: vec!["fake-publish".to_string()],
            deploy_command: vec!["fake-deploy".to_string()],
            backoff: BackoffPolicy::immediate(),
            max_wait_ms: 1_000,
            ..PublishOptions::default()
        }
    }

    /// A publish handler that behaves like the external changeset tool:
    /// consume the repository's changesets, bump its manifest to the
    /// predicted version, and make the new version available on the
    /// registry.
    fn scripted_publish_tool(
        fs: MemoryFs,
        changesets: MemoryChangesets,
        registry: MemoryRegistry,
    ) -> MemoryProcess {
        MemoryProcess::with_handler(move |req| {
            if req.program != "fake-publish" {
                return SpawnResult::success("");
            }
            let manifest_path = req.cwd.join("package.json");
            let Some(content) = fs.get(&manifest_path) else {
                return SpawnResult::failure("no manifest");
            };
            let repo = Repository::from_manifest_str(&req.cwd, &content).unwrap();
            let read = changesets.read_changesets(&repo).unwrap();
            let Some(prediction) = changeset::predict_next_version(&repo, &read.changesets) else {
                return SpawnResult::failure("no changesets to publish");
            };

            let mut manifest: serde_json::Value = serde_json::from_str(&content).unwrap();
            manifest["version"] = serde_json::json!(prediction.version.to_string());
            fs.seed(manifest_path, manifest.to_string());

            changesets.clear(&repo.name);
            registry.make_available(&repo.name, &prediction.version);
            SpawnResult::success("")
        })
    }

    fn wire_scripted_tool(ops: &mut MemoryOps) {
        ops.process = scripted_publish_tool(
            ops.fs.clone(),
            ops.changesets.clone(),
            ops.registry.clone(),
        );
    }

    // -----------------------------------------------------------------------
    // Dry run
    // -----------------------------------------------------------------------

    #[test]
    fn test_dry_run_predicts_without_side_effects() {
        let ops = Ops::memory();
        let lib = seed_repo(&ops.fs, "lib", "0.1.0", &[], &[]);
        let app = seed_repo(&ops.fs, "app", "0.2.0", &[("lib", "^0.1.0")], &[]);
        ops.changesets.add("lib", "fix.md", &[("lib", Bump::Patch)], "fix");

        let opts = PublishOptions {
            dry_run: true,
            ..fast_options()
        };
        let result = publish(&[lib, app.clone()], &opts, &ops, None).unwrap();

        assert!(result.ok);
        assert_eq!(result.published.len(), 1);
        let pv = &result.published[0];
        assert_eq!(pv.name, "lib");
        assert_eq!(pv.version, v("0.1.1"));
        assert_eq!(pv.commit, "dry_run");
        assert_eq!(pv.bump, Some(Bump::Patch));

        // Nothing was spawned, installed, or rewritten.
        assert!(ops.process.calls().is_empty());
        assert!(ops.registry.installs().is_empty());
        let manifest = ops.fs.get(&app.manifest_path()).unwrap();
        assert!(manifest.contains("^0.1.0"));
    }

    // -----------------------------------------------------------------------
    // Real-mode cascade
    // -----------------------------------------------------------------------

    #[test]
    fn test_publish_chain_updates_dependents_and_installs() {
        let mut ops = Ops::memory();
        let lib = seed_repo(&ops.fs, "lib", "0.1.0", &[], &[]);
        let app = seed_repo(&ops.fs, "app", "0.2.0", &[("lib", "^0.1.0")], &[]);
        ops.changesets.add("lib", "fix.md", &[("lib", Bump::Patch)], "fix");
        wire_scripted_tool(&mut ops);

        let result = publish(&[lib.clone(), app.clone()], &fast_options(), &ops, None).unwrap();

        assert!(result.ok, "failed: {:?}", result.failed);
        let names: Vec<&str> = result.published.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["lib", "app"]);
        assert_eq!(result.published[0].version, v("0.1.1"));
        // app picked up the auto-generated patch changeset.
        assert_eq!(result.published[1].version, v("0.2.1"));

        // app's manifest was rewritten with the preserved caret prefix,
        // committed, and installed once.
        let manifest = ops.fs.get(&app.manifest_path()).unwrap();
        assert!(manifest.contains("^0.1.1"), "manifest: {manifest}");
        assert_eq!(
            ops.git.commits_in(&app.path),
            vec![manifest::UPDATE_COMMIT_MESSAGE]
        );
        assert_eq!(ops.registry.installs(), vec![app.path.clone()]);

        // lib was merely republished: no install, no commit recorded here.
        assert!(ops.git.commits_in(&lib.path).is_empty());
    }

    #[test]
    fn test_breaking_publish_generates_breaking_auto_changeset() {
        let mut ops = Ops::memory();
        let lib = seed_repo(&ops.fs, "lib", "0.1.0", &[], &[]);
        let app = seed_repo(&ops.fs, "app", "0.2.0", &[("lib", "0.1.0")], &[]);
        ops.changesets.add("lib", "feat.md", &[("lib", Bump::Minor)], "break");
        wire_scripted_tool(&mut ops);

        let result = publish(&[lib, app], &fast_options(), &ops, None).unwrap();

        assert!(result.ok, "failed: {:?}", result.failed);
        // lib 0.1.0 -> 0.2.0 is breaking at 0.x, so app's auto-changeset
        // declared a minor bump: 0.2.0 -> 0.3.0.
        assert_eq!(result.published[0].version, v("0.2.0"));
        assert!(result.published[0].breaking);
        assert_eq!(result.published[1].version, v("0.3.0"));
    }

    // -----------------------------------------------------------------------
    // Failure paths
    // -----------------------------------------------------------------------

    #[test]
    fn test_availability_timeout_is_a_package_failure() {
        let ops = Ops::memory();
        let lib = seed_repo(&ops.fs, "lib", "0.1.0", &[], &[]);
        let app = seed_repo(&ops.fs, "app", "0.2.0", &[("lib", "^0.1.0")], &[]);
        ops.changesets.add("lib", "fix.md", &[("lib", Bump::Patch)], "fix");

        // The publish tool "succeeds" (bumps the manifest) but the version
        // never appears on the registry.
        let fs = ops.fs.clone();
        let changesets = ops.changesets.clone();
        let ops = MemoryOps {
            process: MemoryProcess::with_handler(move |req| {
                let manifest_path = req.cwd.join("package.json");
                let content = fs.get(&manifest_path).unwrap();
                let mut manifest: serde_json::Value = serde_json::from_str(&content).unwrap();
                manifest["version"] = serde_json::json!("0.1.1");
                fs.seed(manifest_path, manifest.to_string());
                changesets.clear("lib");
                SpawnResult::success("")
            }),
            ..ops
        };

        let result = publish(&[lib, app], &fast_options(), &ops, None).unwrap();

        assert!(!result.ok);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].name, "lib");
        assert!(result.failed[0].error.contains("timed out"), "{}", result.failed[0].error);
        // Fail-fast: app was never attempted.
        assert!(result.published.is_empty());
    }

    #[test]
    fn test_publish_tool_failure_breaks_pass() {
        let ops = Ops::memory();
        let lib = seed_repo(&ops.fs, "lib", "0.1.0", &[], &[]);
        ops.changesets.add("lib", "fix.md", &[("lib", Bump::Patch)], "fix");

        let ops = MemoryOps {
            process: MemoryProcess::with_handler(|_| SpawnResult::failure("E403 forbidden")),
            ..ops
        };

        let result = publish(&[lib], &fast_options(), &ops, None).unwrap();
        assert!(!result.ok);
        assert!(result.failed[0].error.contains("E403"));
    }

    #[test]
    fn test_preflight_failure_aborts_before_mutation() {
        let mut ops = Ops::memory();
        let lib = seed_repo(&ops.fs, "lib", "0.1.0", &[], &[]);
        ops.changesets.add("lib", "fix.md", &[("lib", Bump::Patch)], "fix");
        ops.git.set_dirty(Path::new("/repos/lib"), &["uncommitted.ts"]);
        wire_scripted_tool(&mut ops);

        let err = publish(&[lib], &fast_options(), &ops, None).unwrap_err();
        assert!(err.to_string().contains("pre-flight validation failed"));
        assert!(ops.process.calls().is_empty());
    }

    #[test]
    fn test_production_cycle_is_fatal() {
        let ops = Ops::memory();
        let x = seed_repo(&ops.fs, "x", "1.0.0", &[("y", "^1.0.0")], &[]);
        let y = seed_repo(&ops.fs, "y", "1.0.0", &[("x", "^1.0.0")], &[]);

        let opts = PublishOptions {
            dry_run: true,
            ..fast_options()
        };
        let err = publish(&[x, y], &opts, &ops, None).unwrap_err();
        assert!(err.to_string().contains("Production dependency cycle"));
    }

    // -----------------------------------------------------------------------
    // Install cache healing
    // -----------------------------------------------------------------------

    #[test]
    fn test_install_cache_healing_retries_once() {
        let mut ops = Ops::memory();
        let lib = seed_repo(&ops.fs, "lib", "0.1.0", &[], &[]);
        let app = seed_repo(&ops.fs, "app", "0.2.0", &[("lib", "^0.1.0")], &[]);
        ops.changesets.add("lib", "fix.md", &[("lib", Bump::Patch)], "fix");
        wire_scripted_tool(&mut ops);

        ops.registry.script_install(
            &app.path,
            vec![SpawnResult::failure("npm ERR! code ETARGET\nnpm ERR! notarget")],
        );

        let result = publish(&[lib, app.clone()], &fast_options(), &ops, None).unwrap();

        assert!(result.ok, "failed: {:?}", result.failed);
        assert_eq!(ops.registry.cache_clean_count(), 1);
        // First attempt failed, cache cleaned, retry succeeded.
        let installs = ops.registry.installs();
        assert_eq!(installs.iter().filter(|p| **p == app.path).count(), 2);
    }

    #[test]
    fn test_install_other_failure_is_recorded_not_healed() {
        let mut ops = Ops::memory();
        let lib = seed_repo(&ops.fs, "lib", "0.1.0", &[], &[]);
        let app = seed_repo(&ops.fs, "app", "0.2.0", &[("lib", "^0.1.0")], &[]);
        ops.changesets.add("lib", "fix.md", &[("lib", Bump::Patch)], "fix");
        wire_scripted_tool(&mut ops);

        ops.registry
            .script_install(&app.path, vec![SpawnResult::failure("EACCES: permission denied")]);

        let result = publish(&[lib, app.clone()], &fast_options(), &ops, None).unwrap();

        assert!(!result.ok);
        assert_eq!(ops.registry.cache_clean_count(), 0);
        assert!(result.failed.iter().any(|f| f.name == "app"));
    }

    // -----------------------------------------------------------------------
    // Dev pass and deployment
    // -----------------------------------------------------------------------

    #[test]
    fn test_dev_dependency_pass_updates_without_republish() {
        let mut ops = Ops::memory();
        let lib = seed_repo(&ops.fs, "lib", "0.1.0", &[], &[]);
        let tools = seed_repo(&ops.fs, "tools", "1.0.0", &[], &[("lib", "^0.1.0")]);
        ops.changesets.add("lib", "fix.md", &[("lib", Bump::Patch)], "fix");
        wire_scripted_tool(&mut ops);

        let result = publish(&[lib, tools.clone()], &fast_options(), &ops, None).unwrap();

        assert!(result.ok, "failed: {:?}", result.failed);
        // Only lib published; tools was updated in the dev pass.
        assert_eq!(result.published.len(), 1);
        let manifest = ops.fs.get(&tools.manifest_path()).unwrap();
        assert!(manifest.contains("^0.1.1"), "manifest: {manifest}");
        // No auto-changeset for a dev-only update.
        assert_eq!(ops.changesets.count("tools"), 0);
        assert_eq!(ops.registry.installs(), vec![tools.path.clone()]);
        assert_eq!(
            ops.git.commits_in(&tools.path),
            vec![manifest::UPDATE_COMMIT_MESSAGE]
        );
    }

    #[test]
    fn test_deploy_covers_republished_and_updated_repos() {
        let mut ops = Ops::memory();
        let lib = seed_repo(&ops.fs, "lib", "0.1.0", &[], &[]);
        let app = seed_repo(&ops.fs, "app", "0.2.0", &[("lib", "^0.1.0")], &[]);
        let tools = seed_repo(&ops.fs, "tools", "1.0.0", &[], &[("lib", "^0.1.0")]);
        ops.changesets.add("lib", "fix.md", &[("lib", Bump::Patch)], "fix");
        wire_scripted_tool(&mut ops);

        let opts = PublishOptions {
            deploy: true,
            ..fast_options()
        };
        let result = publish(&[lib.clone(), app.clone(), tools.clone()], &opts, &ops, None).unwrap();

        assert!(result.ok, "failed: {:?}", result.failed);
        let deploys: Vec<PathBuf> = ops
            .process
            .calls()
            .into_iter()
            .filter(|c| c.program == "fake-deploy")
            .map(|c| c.cwd)
            .collect();
        assert!(deploys.contains(&lib.path));
        assert!(deploys.contains(&app.path));
        assert!(deploys.contains(&tools.path));
    }

    #[test]
    fn test_deploy_failure_is_only_a_warning() {
        let ops = Ops::memory();
        let lib = seed_repo(&ops.fs, "lib", "0.1.0", &[], &[]);
        ops.changesets.add("lib", "fix.md", &[("lib", Bump::Patch)], "fix");

        let fs = ops.fs.clone();
        let changesets = ops.changesets.clone();
        let registry = ops.registry.clone();
        let ops = MemoryOps {
            process: MemoryProcess::with_handler(move |req| {
                if req.program == "fake-deploy" {
                    return SpawnResult::failure("deploy target unreachable");
                }
                scripted_publish_tool(fs.clone(), changesets.clone(), registry.clone())
                    .spawn(req)
            }),
            ..ops
        };

        let opts = PublishOptions {
            deploy: true,
            ..fast_options()
        };
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let result = publish(&[lib], &opts, &ops, Some(&tx)).unwrap();
        drop(tx);

        assert!(result.ok, "deploy failure must not fail the run");
        let mut saw_warning = false;
        while let Ok(event) = rx.try_recv() {
            if let Event::Warning(w) = event {
                saw_warning |= w.contains("deploy failed for lib");
            }
        }
        assert!(saw_warning);
    }

    // -----------------------------------------------------------------------
    // Resumption
    // -----------------------------------------------------------------------

    #[test]
    fn test_rerun_after_success_is_a_noop() {
        let mut ops = Ops::memory();
        let lib = seed_repo(&ops.fs, "lib", "0.1.0", &[], &[]);
        let app = seed_repo(&ops.fs, "app", "0.2.0", &[("lib", "^0.1.0")], &[]);
        ops.changesets.add("lib", "fix.md", &[("lib", Bump::Patch)], "fix");
        wire_scripted_tool(&mut ops);

        let repos = vec![lib, app];
        let first = publish(&repos, &fast_options(), &ops, None).unwrap();
        assert!(first.ok);
        assert_eq!(first.published.len(), 2);

        // Re-read the repository set the way a fresh invocation would.
        let repos: Vec<Repository> = repos
            .iter()
            .map(|r| {
                Repository::from_manifest_str(&r.path, &ops.fs.get(&r.manifest_path()).unwrap())
                    .unwrap()
            })
            .collect();

        let second = publish(&repos, &fast_options(), &ops, None).unwrap();
        assert!(second.ok);
        assert!(second.published.is_empty());
        assert!(second.failed.is_empty());
    }
}
