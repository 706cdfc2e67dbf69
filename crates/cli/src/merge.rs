//! `kyso merge` subcommands.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::presets::NOTHING;
use comfy_table::{Cell, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressStyle};

use kyso_core::merge::{self, ConflictEntry, MergeOutcome};
use kyso_core::{KysoConfig, MergeReference, RemoteStore};
use kyso_web::WebServer;

use crate::style;

#[derive(Subcommand, Debug)]
pub enum MergeCommands {
    /// Fetch a remote version into the merge staging area.
    Pull {
        /// `team/study` or `team/study#version`.
        reference: String,
    },
    /// List files that differ from the pulled version.
    #[command(alias = "list")]
    Ls,
    /// Merge the pulled version into the working tree.
    Apply,
    /// Merge, then review remaining conflicts in the browser.
    ApplyWeb,
    /// Show the changes between a local file and the pulled version.
    Diff {
        /// Path of the file relative to the study root.
        file: String,
    },
    /// Show a side-by-side diff of one file in the browser.
    DiffWeb {
        /// Path of the file relative to the study root.
        file: String,
    },
}

pub async fn run_merge(
    command: MergeCommands,
    config: &KysoConfig,
    store: impl FnOnce() -> Result<Arc<dyn RemoteStore>>,
) -> Result<()> {
    let started = Instant::now();
    let root = std::env::current_dir().context("failed to read the current directory")?;

    match command {
        MergeCommands::Pull { reference } => {
            let reference = MergeReference::parse(&reference)?;
            let store = store()?;

            let spinner = spinner(&format!("Pulling {}...", reference));
            let result = merge::pull_merge(store, &root, &reference).await;
            spinner.finish_and_clear();
            let pulled = result?;

            println!(
                "{}",
                style::summary(
                    &format!(
                        "Pulled {} version {} ({} files)",
                        pulled.study, pulled.version_sha, pulled.files
                    ),
                    started.elapsed()
                )
            );
        }
        MergeCommands::Ls => {
            let entries = merge::list_conflicts(&root)?;
            print_conflicts(&entries);
            println!(
                "{}",
                style::summary(&format!("{} conflicts", entries.len()), started.elapsed())
            );
        }
        MergeCommands::Apply => {
            apply(&root, started)?;
        }
        MergeCommands::ApplyWeb => {
            apply(&root, started)?;
            serve(config, &root, "/").await?;
        }
        MergeCommands::Diff { file } => {
            let diff = merge::file_diff(&root, &file)?;
            if diff.is_identical() {
                println!("{}", style::success(&format!("{} matches the pulled version", file)));
            } else {
                print!("{}", diff.render(console::colors_enabled()));
            }
            println!("{}", style::summary(&format!("diff {}", file), started.elapsed()));
        }
        MergeCommands::DiffWeb { file } => {
            merge::file_diff(&root, &file)?;
            serve(config, &root, &format!("/diff?file={}", urlencoding::encode(&file)))
                .await?;
        }
    }

    Ok(())
}

fn apply(root: &Path, started: Instant) -> Result<()> {
    let report = merge::apply_merge(root)?;

    for (name, outcome) in &report.merged {
        match outcome {
            MergeOutcome::Resolved => println!("{}", style::success(name)),
            MergeOutcome::Conflicted => println!("{}", style::warn(name)),
        }
    }
    print_conflicts(&report.remaining);

    let resolved = report.merged.len() - report.remaining.len();
    println!(
        "{}",
        style::summary(
            &format!(
                "Merged {} files, {} conflicts remaining",
                resolved,
                report.remaining.len()
            ),
            started.elapsed()
        )
    );
    Ok(())
}

/// Two columns: indicator and file name. Prints nothing for an empty set.
fn print_conflicts(entries: &[ConflictEntry]) {
    if entries.is_empty() {
        return;
    }
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    for entry in entries {
        table.add_row(vec![
            Cell::new(style::indicator(entry.kind)),
            Cell::new(&entry.name),
        ]);
    }
    println!("{}", table);
}

/// Serve the merge GUI until ctrl-c.
async fn serve(config: &KysoConfig, root: &Path, path: &str) -> Result<()> {
    let server = WebServer::new(root)
        .bind(&config.web.listen)
        .await
        .with_context(|| format!("failed to listen on {}", config.web.listen))?;
    let addr = server.local_addr()?;
    println!("Open http://{}{} (press ctrl-c to stop)", addr, path);
    server.serve().await
}

pub(crate) fn spinner(msg: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.blue} {msg}") {
        spinner.set_style(
            style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
    }
    spinner.set_message(msg.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}
