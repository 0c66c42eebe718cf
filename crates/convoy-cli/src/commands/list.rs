use anyhow::Result;
use clap::Args;
use colored::Colorize;

use convoy_core::ops::{ChangesetOps, FsChangesets};
use convoy_core::workspace::Workspace;

/// Arguments for the `list` command
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only show repositories with pending changesets
    #[arg(long)]
    pub pending: bool,
}

/// List repositories with version, publishable flag, and changeset status.
pub async fn run(workspace: &Workspace, args: ListArgs) -> Result<()> {
    let changesets = FsChangesets;
    let mut shown = 0usize;

    for repo in &workspace.repos {
        let read = changesets.read_changesets(repo)?;
        let pending = read.changesets.len();
        if args.pending && pending == 0 {
            continue;
        }
        shown += 1;

        let private = if repo.publishable {
            "".normal()
        } else {
            " (private)".dimmed()
        };
        let status = if pending > 0 {
            format!("{pending} pending changeset(s)").yellow()
        } else {
            "up to date".dimmed()
        };
        println!(
            "  {} {} {}{}: {}",
            "->".cyan(),
            repo.name.bold(),
            repo.version,
            private,
            status
        );

        for warning in &read.warnings {
            eprintln!("{} {}", "WARNING:".yellow().bold(), warning);
        }
    }

    if shown == 0 {
        println!("{}", "No repositories to show.".dimmed());
    }
    Ok(())
}
