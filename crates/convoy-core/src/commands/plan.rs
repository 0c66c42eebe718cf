//! The publishing-plan engine: a fixed-point iteration that, starting from
//! declared changesets, predicts versions, propagates breaking changes
//! along prod/peer edges, escalates declared bumps that are smaller than
//! what a dependency update requires, and marks packages needing
//! auto-changesets.
//!
//! Pure with respect to the registry and (through the injected changeset
//! operations) the filesystem.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use semver::Version;

use crate::changeset;
use crate::graph::{DepKind, DependencyGraph, format_cycle};
use crate::ops::ChangesetOps;
use crate::repo::Repository;
use crate::validation::{ValidateOptions, validate_graph};
use crate::version::{Bump, bump_version, is_breaking, needs_update};

/// Cap on fixed-point iterations. Each iteration propagates updates one
/// dependency level further; deeper chains than this leave a divergence
/// warning on the plan and converge across re-runs.
pub const MAX_ITERATIONS: u32 = 10;

#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Record per-iteration decisions, changeset file origins, and the edge
    /// summary on the plan. Diagnostic only.
    pub verbose: bool,
}

/// One package's computed version transition.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionChange {
    pub package: String,
    pub from: Version,
    pub to: Version,
    pub bump: Bump,
    pub breaking: bool,
    /// Whether the transition originates from declared changesets.
    pub has_changesets: bool,
    /// Set on packages with no declared changeset that a dependency update
    /// forces to republish; the publish step synthesizes their changeset.
    pub will_generate_changeset: bool,
    /// Set when a declared bump had to be raised to satisfy a dependency.
    pub needs_bump_escalation: bool,
    /// The originally declared bump, when escalated.
    pub existing_bump: Option<Bump>,
    /// The bump the dependencies required, when escalated.
    pub required_bump: Option<Bump>,
}

/// One manifest rewrite the plan calls for.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyUpdate {
    pub dependent: String,
    pub dependency: String,
    pub current_range: String,
    pub new_version: Version,
    pub kind: DepKind,
    /// Prod and peer updates force the dependent to republish.
    pub causes_republish: bool,
}

/// Per-iteration decision taken for a package (verbose mode only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Publish,
    Escalation,
    AutoChangeset,
    Skip,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackageDecision {
    pub package: String,
    pub action: PlanAction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    pub iteration: u32,
    pub decisions: Vec<PackageDecision>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanDiagnostics {
    pub iterations: Vec<IterationRecord>,
    /// `repo/filename` of every changeset that seeded the plan.
    pub changeset_files: Vec<String>,
    pub edge_summary: Vec<String>,
}

/// The computed publishing plan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub publishing_order: Vec<String>,
    /// In publishing order.
    pub version_changes: Vec<VersionChange>,
    /// Sorted by dependent name, then dependency name.
    pub dependency_updates: Vec<DependencyUpdate>,
    /// `source -> affected dependents`, in first-discovery order.
    pub breaking_cascades: Vec<(String, Vec<String>)>,
    pub warnings: Vec<String>,
    pub info: Vec<String>,
    pub errors: Vec<String>,
    pub verbose: Option<PlanDiagnostics>,
}

impl Plan {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn change_for(&self, package: &str) -> Option<&VersionChange> {
        self.version_changes.iter().find(|c| c.package == package)
    }
}

/// Compute the publishing plan for a repository set.
pub fn generate_plan(
    repos: &[Repository],
    opts: &PlanOptions,
    changesets: &impl ChangesetOps,
) -> Result<Plan> {
    let validated = validate_graph(
        repos,
        &ValidateOptions {
            fail_on_production_cycles: false,
            log_cycles: false,
            log_order: false,
        },
        None,
    )?;

    let mut plan = Plan::default();

    for cycle in &validated.dev_cycles {
        plan.info.push(format!(
            "Dev dependency cycle (tolerated): {}",
            format_cycle(cycle)
        ));
    }

    if !validated.production_cycles.is_empty() {
        for cycle in &validated.production_cycles {
            plan.errors.push(format!(
                "Production dependency cycle: {}",
                format_cycle(cycle)
            ));
        }
        // No publishing order exists; nothing further can be computed.
        return Ok(plan);
    }

    let analysis = validated.graph.analyze(repos);
    for (package, dep) in &analysis.wildcard_ranges {
        plan.warnings
            .push(format!("{package} depends on {dep} with a wildcard range"));
    }
    for (package, dep) in &analysis.external_peers {
        plan.warnings.push(format!(
            "{package} has a peer dependency on {dep}, which is outside the collection"
        ));
    }

    plan.publishing_order = validated.publishing_order.clone();
    let by_name: BTreeMap<&str, &Repository> =
        repos.iter().map(|r| (r.name.as_str(), r)).collect();

    let mut changes: BTreeMap<String, VersionChange> = BTreeMap::new();
    let mut predicted: BTreeMap<String, Version> = BTreeMap::new();
    let mut breaking: BTreeSet<String> = BTreeSet::new();
    let mut diagnostics = opts.verbose.then(PlanDiagnostics::default);
    let mut without_changesets: Vec<String> = Vec::new();

    // Initial scan: seed predictions from declared changesets, in
    // publishing order.
    for name in &plan.publishing_order {
        let repo = by_name[name.as_str()];
        if !changesets.has_changesets(repo) {
            without_changesets.push(name.clone());
            continue;
        }
        let read = changesets.read_changesets(repo)?;
        plan.warnings.extend(read.warnings.iter().cloned());
        if let Some(diag) = diagnostics.as_mut() {
            diag.changeset_files
                .extend(read.changesets.iter().map(|cs| format!("{name}/{}", cs.filename)));
        }

        let Some(prediction) = changeset::predict_next_version(repo, &read.changesets) else {
            without_changesets.push(name.clone());
            continue;
        };

        let breaking_change = is_breaking(&repo.version, prediction.bump);
        changes.insert(
            name.clone(),
            VersionChange {
                package: name.clone(),
                from: repo.version.clone(),
                to: prediction.version.clone(),
                bump: prediction.bump,
                breaking: breaking_change,
                has_changesets: true,
                will_generate_changeset: false,
                needs_bump_escalation: false,
                existing_bump: None,
                required_bump: None,
            },
        );
        predicted.insert(name.clone(), prediction.version);
        if breaking_change {
            breaking.insert(name.clone());
        }
    }

    if !without_changesets.is_empty() && !changes.is_empty() {
        plan.info
            .push(format!("No pending changesets: {}", without_changesets.join(", ")));
    }

    // Fixed-point loop. The updates snapshot is taken for all packages
    // before any prediction is mutated, so each iteration propagates
    // exactly one dependency level.
    let mut diverged = false;

    for iteration in 1..=MAX_ITERATIONS {
        let updates =
            compute_dependency_updates(&plan.publishing_order, &validated.graph, &predicted);

        let mut changed = false;
        let mut decisions = Vec::new();

        for name in &plan.publishing_order {
            let repo = by_name[name.as_str()];
            let required = required_bump(name, repo, &updates, &breaking);

            let action = if let Some(required) = required {
                if let Some(change) = changes.get_mut(name) {
                    if required > change.bump {
                        if change.has_changesets {
                            change.needs_bump_escalation = true;
                            change.existing_bump.get_or_insert(change.bump);
                            change.required_bump = Some(required);
                        }
                        change.bump = required;
                        change.to = bump_version(&change.from, required);
                        change.breaking = is_breaking(&change.from, required);
                        predicted.insert(name.clone(), change.to.clone());
                        if change.breaking {
                            breaking.insert(name.clone());
                        }
                        changed = true;
                        PlanAction::Escalation
                    } else if iteration == 1 && change.has_changesets {
                        PlanAction::Publish
                    } else {
                        PlanAction::Skip
                    }
                } else {
                    let from = repo.version.clone();
                    let to = bump_version(&from, required);
                    let breaking_change = is_breaking(&from, required);
                    changes.insert(
                        name.clone(),
                        VersionChange {
                            package: name.clone(),
                            from,
                            to: to.clone(),
                            bump: required,
                            breaking: breaking_change,
                            has_changesets: false,
                            will_generate_changeset: true,
                            needs_bump_escalation: false,
                            existing_bump: None,
                            required_bump: None,
                        },
                    );
                    predicted.insert(name.clone(), to);
                    if breaking_change {
                        breaking.insert(name.clone());
                    }
                    changed = true;
                    PlanAction::AutoChangeset
                }
            } else if iteration == 1 && changes.get(name).is_some_and(|c| c.has_changesets) {
                PlanAction::Publish
            } else {
                PlanAction::Skip
            };

            decisions.push(PackageDecision {
                package: name.clone(),
                action,
            });
        }

        if let Some(diag) = diagnostics.as_mut() {
            diag.iterations.push(IterationRecord { iteration, decisions });
        }

        if !changed {
            break;
        }
        if iteration == MAX_ITERATIONS {
            diverged = true;
        }
    }

    // Final snapshot so the emitted updates reflect the final predictions.
    let mut updates =
        compute_dependency_updates(&plan.publishing_order, &validated.graph, &predicted);

    if diverged {
        let pending = pending_packages(&plan.publishing_order, &by_name, &updates, &changes, &breaking);
        let estimated = pending.len().div_ceil(2);
        plan.warnings.push(format!(
            "Plan did not converge after {MAX_ITERATIONS} maximum iterations; \
             still pending: {} (estimated {estimated} more iteration(s) needed). \
             Re-run after publishing this batch.",
            pending.join(", ")
        ));
    }

    // Breaking cascades, in first-discovery order over the publishing order.
    for name in &plan.publishing_order {
        for update in updates.iter().filter(|u| &u.dependent == name && u.causes_republish) {
            if !breaking.contains(&update.dependency) {
                continue;
            }
            match plan
                .breaking_cascades
                .iter_mut()
                .find(|(source, _)| source == &update.dependency)
            {
                Some((_, affected)) => {
                    if !affected.contains(name) {
                        affected.push(name.clone());
                    }
                }
                None => plan
                    .breaking_cascades
                    .push((update.dependency.clone(), vec![name.clone()])),
            }
        }
    }

    for name in &plan.publishing_order {
        if let Some(change) = changes.get(name) {
            plan.version_changes.push(change.clone());
        }
    }

    updates.sort_by(|a, b| {
        a.dependent
            .cmp(&b.dependent)
            .then_with(|| a.dependency.cmp(&b.dependency))
    });
    plan.dependency_updates = updates;

    if let Some(diag) = diagnostics.as_mut() {
        for (name, node) in validated.graph.nodes() {
            for (dep, edge) in &node.deps {
                diag.edge_summary
                    .push(format!("{name} → {dep} ({} {})", edge.kind, edge.range));
            }
        }
    }
    plan.verbose = diagnostics;

    Ok(plan)
}

/// The bump a package must take given the current updates snapshot: a
/// breaking prod/peer dependency forces minor (0.x) or major (>=1.0), any
/// other prod/peer update forces at least patch, dev-only updates force
/// nothing.
fn required_bump(
    name: &str,
    repo: &Repository,
    updates: &[DependencyUpdate],
    breaking: &BTreeSet<String>,
) -> Option<Bump> {
    let mut any_prod_peer = false;
    let mut any_breaking = false;
    for update in updates.iter().filter(|u| u.dependent == name && u.causes_republish) {
        any_prod_peer = true;
        if breaking.contains(&update.dependency) {
            any_breaking = true;
        }
    }

    if any_breaking {
        Some(if repo.version.major == 0 { Bump::Minor } else { Bump::Major })
    } else if any_prod_peer {
        Some(Bump::Patch)
    } else {
        None
    }
}

fn compute_dependency_updates(
    order: &[String],
    graph: &DependencyGraph,
    predicted: &BTreeMap<String, Version>,
) -> Vec<DependencyUpdate> {
    let mut updates = Vec::new();
    for name in order {
        let Some(node) = graph.node(name) else { continue };
        for (dep, edge) in &node.deps {
            let Some(version) = predicted.get(dep) else { continue };
            if needs_update(&edge.range, version) {
                updates.push(DependencyUpdate {
                    dependent: name.clone(),
                    dependency: dep.clone(),
                    current_range: edge.range.clone(),
                    new_version: version.clone(),
                    kind: edge.kind,
                    causes_republish: edge.kind.causes_republish(),
                });
            }
        }
    }
    updates
}

/// Packages another iteration would still touch, for the divergence
/// warning.
fn pending_packages(
    order: &[String],
    by_name: &BTreeMap<&str, &Repository>,
    updates: &[DependencyUpdate],
    changes: &BTreeMap<String, VersionChange>,
    breaking: &BTreeSet<String>,
) -> Vec<String> {
    order
        .iter()
        .filter(|name| {
            let repo = by_name[name.as_str()];
            match (required_bump(name, repo, updates, breaking), changes.get(*name)) {
                (Some(required), Some(change)) => required > change.bump,
                (Some(_), None) => true,
                (None, _) => false,
            }
        })
        .cloned()
        .collect()
}
