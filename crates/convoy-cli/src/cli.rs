use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use crate::commands::{
    changeset::ChangesetArgs, graph::GraphArgs, list::ListArgs, plan::PlanArgs,
    publish::PublishArgs,
};

/// convoy: coordinated versioning and publishing across a collection of
/// repositories.
///
/// Reads pending changesets, computes a dependency-ordered publishing
/// plan, and executes it against the package registry.
#[derive(Parser, Debug)]
#[command(name = "convoy", version, about, long_about = None)]
pub struct Cli {
    /// Increase output verbosity (show debug info)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Verbosity level resolved from --verbose / --quiet flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// --quiet: only errors and essential output
    Quiet,
    /// default: normal output
    Normal,
    /// --verbose: extra debug info
    Verbose,
}

impl Cli {
    /// Resolve the verbosity level from CLI flags
    pub fn verbosity(&self) -> Verbosity {
        match (self.quiet, self.verbose) {
            (true, _) => Verbosity::Quiet,
            (_, true) => Verbosity::Verbose,
            _ => Verbosity::Normal,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Declare a pending version bump for a package
    Changeset(ChangesetArgs),

    /// Generate shell completion scripts
    Completion(CompletionArgs),

    /// Show the dependency graph: publishing order, cycles, and findings
    Graph(GraphArgs),

    /// List repositories with version and pending-changeset status
    List(ListArgs),

    /// Compute and display the publishing plan without touching anything
    Plan(PlanArgs),

    /// Publish pending changes across the collection in dependency order
    Publish(PublishArgs),
}

#[derive(Args, Debug)]
pub struct CompletionArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}
