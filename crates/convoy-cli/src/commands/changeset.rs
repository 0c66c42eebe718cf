use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use convoy_core::changeset::{ChangesetEntry, changeset_dir, compose_changeset};
use convoy_core::version::Bump;
use convoy_core::workspace::Workspace;

/// Arguments for the `changeset` command
#[derive(Args, Debug)]
pub struct ChangesetArgs {
    /// Package the bump applies to (repeat `name:bump` pairs via --also for
    /// multi-package changesets)
    pub package: String,

    /// Bump to declare: patch, minor, or major
    pub bump: Bump,

    /// Additional `name:bump` entries for the same changeset
    #[arg(long = "also", value_name = "NAME:BUMP")]
    pub also: Vec<String>,

    /// Free-text summary recorded after the frame
    #[arg(short, long, default_value = "")]
    pub message: String,

    /// File name inside the changeset directory (defaults to a generated one)
    #[arg(long)]
    pub filename: Option<String>,
}

/// Write a declared changeset into the named package's repository.
pub async fn run(workspace: &Workspace, args: ChangesetArgs) -> Result<()> {
    let repo = workspace.repo(&args.package).with_context(|| {
        format!("no repository named '{}' in this collection", args.package)
    })?;

    let mut entries = vec![ChangesetEntry {
        package: args.package.clone(),
        bump: args.bump,
    }];
    for extra in &args.also {
        let (name, bump) = extra.split_once(':').with_context(|| {
            format!("invalid --also entry '{extra}'; expected name:bump")
        })?;
        if workspace.repo(name).is_none() {
            eprintln!(
                "{} '{}' is not a repository in this collection; recording anyway",
                "WARNING:".yellow().bold(),
                name
            );
        }
        entries.push(ChangesetEntry {
            package: name.to_string(),
            bump: bump.parse()?,
        });
    }

    let filename = args.filename.unwrap_or_else(|| {
        let unix_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("{}-{}-{}.md", args.package, args.bump, unix_ms)
    });

    let dir = changeset_dir(&repo.path);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(&filename);
    if path.exists() {
        anyhow::bail!("changeset {} already exists", path.display());
    }

    let content = compose_changeset(&entries, &args.message);
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!(
        "{} {} ({} {})",
        "Created:".green().bold(),
        path.display(),
        args.package.bold(),
        args.bump
    );
    Ok(())
}
