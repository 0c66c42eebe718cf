use anyhow::Result;
use clap::Args;
use colored::Colorize;

use convoy_core::commands::plan::{PlanOptions, generate_plan};
use convoy_core::commands::publish::{PublishOptions, publish};
use convoy_core::manifest::VersionStrategy;
use convoy_core::ops::{FsChangesets, ShellOps};
use convoy_core::workspace::Workspace;

/// Arguments for the `publish` command
#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Perform a dry run (default: true). Use --dry-run=false to actually publish.
    #[arg(long, default_value = "true", action = clap::ArgAction::Set)]
    pub dry_run: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Deploy every changed repository after publishing
    #[arg(long)]
    pub deploy: bool,

    /// Skip dependency installation after manifest updates
    #[arg(long)]
    pub skip_install: bool,

    /// Range prefix strategy for rewritten dependencies
    #[arg(long, default_value = "caret")]
    pub strategy: VersionStrategy,

    /// Total per-package budget for registry availability polling, in milliseconds
    #[arg(long)]
    pub max_wait_ms: Option<u64>,
}

/// Publish pending changes across the collection.
pub async fn run(workspace: &Workspace, args: PublishArgs) -> Result<()> {
    // Show the operator what is about to happen before touching anything.
    let plan = generate_plan(&workspace.repos, &PlanOptions::default(), &FsChangesets)?;
    if plan.has_errors() {
        for error in &plan.errors {
            eprintln!("{} {}", "ERROR:".red().bold(), error);
        }
        anyhow::bail!("cannot publish: plan contains {} error(s)", plan.errors.len());
    }

    if plan.version_changes.is_empty() {
        println!("{}", "Nothing to publish: no pending changesets.".yellow());
        return Ok(());
    }

    let dry_run_label = if args.dry_run {
        " (dry run)".yellow()
    } else {
        "".normal()
    };
    println!(
        "\n{} Publishing {} packages{}...\n",
        "$".cyan(),
        plan.version_changes.len(),
        dry_run_label
    );
    for change in &plan.version_changes {
        println!(
            "  {} {} {} → {}",
            "->".cyan(),
            change.package.bold(),
            change.from,
            change.to.to_string().dimmed()
        );
    }
    println!();

    if args.dry_run {
        println!("{}", "Dry run mode: nothing will actually be published.".dimmed());
        println!("{}", "Use --dry-run=false to publish for real.\n".dimmed());
    }

    if !args.yes && !args.dry_run {
        print!(
            "\n{} Publish these packages to the registry? [y/N] ",
            "CONFIRM:".yellow()
        );
        std::io::Write::flush(&mut std::io::stdout())?;

        let mut input = String::new();
        std::io::BufRead::read_line(&mut std::io::stdin().lock(), &mut input)?;
        let input = input.trim().to_lowercase();
        if input != "y" && input != "yes" {
            println!("{}", "Aborted.".yellow());
            return Ok(());
        }
    }

    let mut opts = PublishOptions::from_config(&workspace.config);
    opts.dry_run = args.dry_run;
    opts.deploy = args.deploy;
    opts.skip_install = args.skip_install;
    opts.version_strategy = args.strategy;
    if let Some(max_wait_ms) = args.max_wait_ms {
        opts.max_wait_ms = max_wait_ms;
    }

    let (tx, render_handle) =
        crate::render::spawn_renderer(plan.version_changes.len(), "publishing");

    // The orchestrator is blocking (subprocesses, registry polling); run it
    // off the async runtime so the renderer keeps drawing.
    let repos = workspace.repos.clone();
    let commands = workspace.config.commands.clone();
    let core_opts = opts.clone();
    let result = tokio::task::spawn_blocking(move || {
        let ops = ShellOps::shell(&commands);
        publish(&repos, &core_opts, &ops, Some(&tx))
    })
    .await??;
    render_handle.await??;

    if !result.published.is_empty() {
        let action = if args.dry_run { "validated" } else { "published" };
        println!(
            "\n{}",
            format!(
                "{} package(s) {} in {:.1}s.",
                result.published.len(),
                action,
                result.duration.as_secs_f64()
            )
            .green()
        );
        for published in &result.published {
            println!(
                "  {} {}@{} {}",
                "->".cyan(),
                published.name.bold(),
                published.version,
                published.commit.dimmed()
            );
        }
    }

    if !result.ok {
        for failure in &result.failed {
            eprintln!("  {} {}: {}", "FAILED".red().bold(), failure.name, failure.error);
        }
        anyhow::bail!(
            "{} package(s) failed ({} published before the failure)",
            result.failed.len(),
            result.published.len()
        );
    }

    Ok(())
}
