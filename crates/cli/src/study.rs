//! `kyso checkout` and `kyso run`.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

use kyso_core::merge;
use kyso_core::{MergeReference, RemoteStore};

use crate::merge::spinner;
use crate::style;

pub async fn run_checkout(reference: &str, store: Arc<dyn RemoteStore>) -> Result<()> {
    let started = Instant::now();
    let reference = MergeReference::parse(reference)?;
    let cwd = std::env::current_dir().context("failed to read the current directory")?;

    let spinner = spinner(&format!("Checking out {}...", reference));
    let result = merge::checkout(
        store,
        &cwd,
        &reference.team,
        &reference.study,
        reference.version_sha.as_deref(),
    )
    .await;
    spinner.finish_and_clear();
    let dir = result?;

    println!(
        "{}",
        style::summary(
            &format!("Checked out {} into {}", reference, dir.display()),
            started.elapsed()
        )
    );
    Ok(())
}

pub async fn run_script(script: &str, args: &[String]) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to read the current directory")?;
    kyso_core::project::run_script(&cwd, script, args).await?;
    Ok(())
}
