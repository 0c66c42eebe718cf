use anyhow::Result;
use clap::Args;
use colored::Colorize;

use convoy_core::graph::format_cycle;
use convoy_core::validation::{ValidateOptions, validate_graph};
use convoy_core::workspace::Workspace;

/// Arguments for the `graph` command
#[derive(Args, Debug)]
pub struct GraphArgs {
    /// Also list every edge of the graph
    #[arg(long)]
    pub edges: bool,
}

/// Inspect the dependency graph: publishing order, cycles, findings.
pub async fn run(workspace: &Workspace, args: GraphArgs) -> Result<()> {
    let validated = validate_graph(
        &workspace.repos,
        &ValidateOptions {
            fail_on_production_cycles: false,
            log_cycles: false,
            log_order: false,
        },
        None,
    )?;

    println!(
        "\n{} {} repositories, {} in publishing order\n",
        "$".cyan(),
        workspace.repos.len(),
        validated.publishing_order.len()
    );

    if !validated.publishing_order.is_empty() {
        println!(
            "{} {}",
            "Publishing order:".bold(),
            validated.publishing_order.join(" → ")
        );
    }

    for cycle in &validated.dev_cycles {
        println!(
            "{} dev cycle (tolerated): {}",
            "INFO:".dimmed(),
            format_cycle(cycle)
        );
    }
    for cycle in &validated.production_cycles {
        eprintln!(
            "{} production cycle: {}",
            "ERROR:".red().bold(),
            format_cycle(cycle)
        );
    }

    let analysis = validated.graph.analyze(&workspace.repos);
    for (package, dep) in &analysis.wildcard_ranges {
        eprintln!(
            "{} {} depends on {} with a wildcard range",
            "WARNING:".yellow().bold(),
            package,
            dep
        );
    }
    for (package, dep) in &analysis.external_peers {
        eprintln!(
            "{} {} has a peer dependency on {} outside the collection",
            "WARNING:".yellow().bold(),
            package,
            dep
        );
    }

    if args.edges {
        println!("\n{}", "Edges:".bold());
        for (name, node) in validated.graph.nodes() {
            for (dep, edge) in &node.deps {
                println!("  {} → {} ({} {})", name, dep, edge.kind, edge.range.dimmed());
            }
        }
    }

    if !validated.production_cycles.is_empty() {
        anyhow::bail!(
            "{} production dependency cycle(s) block publishing",
            validated.production_cycles.len()
        );
    }
    Ok(())
}
