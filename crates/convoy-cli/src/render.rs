use anyhow::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use convoy_core::events::Event;

/// Create a styled progress bar for repository processing.
///
/// `{spinner} [{bar}] {pos}/{len} {msg}`
pub fn create_progress_bar(total: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.set_message(message.to_string());
    pb
}

/// Spawn a renderer task with a progress bar.
///
/// Returns an event sender and a join handle. Drop the sender when done to
/// signal the render loop to finish, then await the handle.
pub fn spawn_renderer(
    total: usize,
    message: &str,
) -> (mpsc::UnboundedSender<Event>, JoinHandle<Result<()>>) {
    let pb = create_progress_bar(total as u64, message);
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move { render_loop(rx, Some(pb)).await });
    (tx, handle)
}

/// Internal render loop that processes events and produces terminal output.
async fn render_loop(mut rx: mpsc::UnboundedReceiver<Event>, pb: Option<ProgressBar>) -> Result<()> {
    while let Some(event) = rx.recv().await {
        match event {
            Event::PublishStarted { repo_count, dry_run } => {
                let mode = if dry_run { " (dry run)".yellow() } else { "".normal() };
                let line = format!(
                    "{} Publishing across {} repositories{}",
                    "$".cyan(),
                    repo_count,
                    mode
                );
                match &pb {
                    Some(pb) => pb.println(line),
                    None => println!("{line}"),
                }
            }
            Event::PackageStarted { ref name } => {
                if let Some(pb) = &pb {
                    pb.set_message(format!("publishing {name}"));
                }
            }
            Event::PackagePublished {
                ref name,
                ref version,
                duration,
            } => {
                let line = format!(
                    "  {} {}@{} {}",
                    "PUBLISHED".green().bold(),
                    name.bold(),
                    version,
                    format!("({:.1}s)", duration.as_secs_f64()).dimmed()
                );
                match &pb {
                    Some(pb) => {
                        pb.println(line);
                        pb.inc(1);
                    }
                    None => println!("{line}"),
                }
            }
            Event::PackageFailed { ref name, ref error } => {
                eprintln!("  {} {}: {}", "FAILED".red().bold(), name.bold(), error);
            }
            Event::RegistryWait {
                ref name,
                ref version,
                attempt,
            } => {
                if let Some(pb) = &pb {
                    pb.set_message(format!("waiting for {name}@{version} (attempt {attempt})"));
                }
            }
            Event::DependencyUpdated {
                ref repo,
                ref dependency,
                ref version,
            } => {
                let line = format!("  {} {} now uses {}@{}", "->".cyan(), repo, dependency, version);
                match &pb {
                    Some(pb) => pb.println(line),
                    None => println!("{line}"),
                }
            }
            Event::InstallStarted { ref name } => {
                if let Some(pb) = &pb {
                    pb.set_message(format!("installing dependencies in {name}"));
                }
            }
            Event::InstallFinished { ref name, success } => {
                if !success {
                    eprintln!("  {} install failed in {}", "WARN".yellow(), name);
                }
            }
            Event::DeployStarted { ref name } => {
                let line = format!("  {} deploying {}", "$".cyan(), name);
                match &pb {
                    Some(pb) => pb.println(line),
                    None => println!("{line}"),
                }
            }
            Event::Progress { ref message, .. } => {
                if let Some(pb) = &pb {
                    pb.set_message(message.clone());
                }
            }
            Event::Warning(ref msg) => {
                eprintln!("{} {}", "WARNING:".yellow().bold(), msg);
            }
            Event::Info(ref msg) => {
                println!("{msg}");
            }
        }
    }

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    Ok(())
}
