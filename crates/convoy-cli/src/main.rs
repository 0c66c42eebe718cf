mod cli;
mod commands;
mod render;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, Verbosity};
use colored::Colorize;
use convoy_core::workspace::Workspace;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbosity = cli.verbosity();

    // `completion` doesn't require an existing workspace — handle it early
    if let Commands::Completion(args) = cli.command {
        clap_complete::generate(
            args.shell,
            &mut <Cli as clap::CommandFactory>::command(),
            "convoy",
            &mut std::io::stdout(),
        );
        return Ok(());
    }

    // Find and load the collection
    let workspace = match Workspace::find_and_load() {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("{} Failed to load workspace: {}", "ERROR".red().bold(), e);
            std::process::exit(1);
        }
    };

    // Print any warnings collected during workspace loading
    for warning in &workspace.warnings {
        eprintln!("{} {}", "WARNING:".yellow().bold(), warning);
    }

    if verbosity != Verbosity::Quiet {
        println!(
            "{} {} repositories ({})",
            "convoy".cyan().bold(),
            workspace.repos.len(),
            workspace.root_path.display()
        );
    }

    if verbosity == Verbosity::Verbose {
        println!(
            "{} required branch {}, patterns: {}",
            "DEBUG".dimmed(),
            workspace.config.required_branch,
            workspace.config.repos.join(", ")
        );
    }

    let result = match cli.command {
        Commands::Changeset(args) => commands::changeset::run(&workspace, args).await,
        Commands::Completion(_) => unreachable!("completion handled above"),
        Commands::Graph(args) => commands::graph::run(&workspace, args).await,
        Commands::List(args) => commands::list::run(&workspace, args).await,
        Commands::Plan(args) => commands::plan::run(&workspace, args).await,
        Commands::Publish(args) => commands::publish::run(&workspace, args).await,
    };

    match result {
        Ok(()) => {
            if verbosity != Verbosity::Quiet {
                println!("\n{}", "SUCCESS".green().bold());
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("\n{} {}", "FAILED".red().bold(), e);
            std::process::exit(1);
        }
    }
}
