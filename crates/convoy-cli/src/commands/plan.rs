use anyhow::Result;
use clap::Args;
use colored::Colorize;

use convoy_core::commands::plan::{Plan, PlanOptions, generate_plan};
use convoy_core::ops::FsChangesets;
use convoy_core::workspace::Workspace;

/// Arguments for the `plan` command
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Show per-iteration engine decisions and the edge summary
    #[arg(long)]
    pub detailed: bool,
}

/// Compute and render the publishing plan. Exits non-zero iff the plan
/// carries errors (e.g. a production dependency cycle).
pub async fn run(workspace: &Workspace, args: PlanArgs) -> Result<()> {
    println!(
        "\n{} Computing publishing plan for {} repositories...\n",
        "$".cyan(),
        workspace.repos.len()
    );

    let opts = PlanOptions {
        verbose: args.detailed,
    };
    let plan = generate_plan(&workspace.repos, &opts, &FsChangesets)?;

    render_plan(&plan, args.detailed);

    if plan.has_errors() {
        anyhow::bail!("plan contains {} error(s)", plan.errors.len());
    }
    Ok(())
}

fn render_plan(plan: &Plan, detailed: bool) {
    if !plan.publishing_order.is_empty() {
        println!(
            "{} {}",
            "Publishing order:".bold(),
            plan.publishing_order.join(" → ")
        );
    }

    if plan.version_changes.is_empty() {
        println!("\n{}", "Nothing to publish: no pending changesets.".dimmed());
    } else {
        println!("\n{}", "Version changes:".bold());
        for change in &plan.version_changes {
            let origin = if change.has_changesets {
                "changesets"
            } else {
                "auto"
            };
            let breaking = if change.breaking {
                " BREAKING".red().bold().to_string()
            } else {
                String::new()
            };
            println!(
                "  {} {} {} → {} ({}, {}){}",
                "->".cyan(),
                change.package.bold(),
                change.from,
                change.to,
                change.bump,
                origin.dimmed(),
                breaking
            );
            if change.needs_bump_escalation {
                if let (Some(existing), Some(required)) = (change.existing_bump, change.required_bump)
                {
                    println!(
                        "     {} declared {} escalated to {}",
                        "^".yellow(),
                        existing,
                        required
                    );
                }
            }
        }
    }

    if !plan.dependency_updates.is_empty() {
        println!("\n{}", "Dependency updates:".bold());
        for update in &plan.dependency_updates {
            println!(
                "  {} {}: {} {} → {} ({})",
                "->".cyan(),
                update.dependent,
                update.dependency,
                update.current_range.dimmed(),
                update.new_version,
                update.kind
            );
        }
    }

    if !plan.breaking_cascades.is_empty() {
        println!("\n{}", "Breaking cascades:".bold());
        for (source, affected) in &plan.breaking_cascades {
            println!("  {} {} → {}", "!".red(), source.bold(), affected.join(", "));
        }
    }

    for info in &plan.info {
        println!("{}", info.dimmed());
    }
    for warning in &plan.warnings {
        eprintln!("{} {}", "WARNING:".yellow().bold(), warning);
    }
    for error in &plan.errors {
        eprintln!("{} {}", "ERROR:".red().bold(), error);
    }

    if detailed {
        if let Some(diag) = &plan.verbose {
            println!("\n{}", "Engine diagnostics:".bold());
            for file in &diag.changeset_files {
                println!("  changeset {file}");
            }
            for edge in &diag.edge_summary {
                println!("  edge {edge}");
            }
            for record in &diag.iterations {
                let touched: Vec<String> = record
                    .decisions
                    .iter()
                    .filter(|d| {
                        !matches!(d.action, convoy_core::commands::plan::PlanAction::Skip)
                    })
                    .map(|d| format!("{} ({:?})", d.package, d.action))
                    .collect();
                println!(
                    "  iteration {}: {}",
                    record.iteration,
                    if touched.is_empty() {
                        "converged".to_string()
                    } else {
                        touched.join(", ")
                    }
                );
            }
        }
    }
}
