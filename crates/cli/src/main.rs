//! The kyso command-line tool.
//!
//! Checks out study versions, runs study scripts, and merges remote versions
//! into a local study (`kyso merge ...`).

mod merge;
mod study;
mod style;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kyso_core::errors::{ConfigError, MergeError, ProjectError, ReferenceError};
use kyso_core::{CoreError, KysoConfig, ParseClient, RemoteStore};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// kyso command-line tool.
#[derive(Parser, Debug)]
#[command(name = "kyso", version, about = "Work with kyso studies from the command line")]
struct Cli {
    /// Path to the TOML configuration file [default: ~/.kyso/config.toml].
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging and full error details.
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Merge a remote version into the study in the current directory.
    Merge {
        #[command(subcommand)]
        action: merge::MergeCommands,
    },

    /// Download a study version into a new directory.
    Checkout {
        /// `team/study` or `team/study#version`.
        reference: String,
    },

    /// Run a script from study.json.
    Run {
        /// Script name.
        script: String,

        /// Extra arguments appended to the script.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let debug = cli.debug;
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match user_error(&e) {
                Some(msg) if !debug => eprintln!("{}", style::error(&format!("Error: {}", msg))),
                _ if debug => eprintln!("{}", style::error(&format!("Error: {:?}", e))),
                _ => eprintln!("{}", style::error(&format!("Error: {:#}", e))),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Merge { action } => merge::run_merge(action, &config, || connect(&config)).await,
        Commands::Checkout { reference } => study::run_checkout(&reference, connect(&config)?).await,
        Commands::Run { script, args } => study::run_script(&script, &args).await,
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: Option<&std::path::Path>) -> Result<KysoConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match KysoConfig::default_path() {
            Some(path) => path,
            None => return Ok(KysoConfig::default()),
        },
    };
    tracing::debug!(path = %path.display(), "loading configuration");
    KysoConfig::load_and_resolve(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

fn connect(config: &KysoConfig) -> Result<Arc<dyn RemoteStore>> {
    let client = ParseClient::new(&config.api).context("failed to create API client")?;
    Ok(Arc::new(client))
}

/// The message of the first user-caused error in the chain, if any.
fn user_error(err: &anyhow::Error) -> Option<String> {
    err.chain().find_map(|cause| {
        let is_user = if let Some(e) = cause.downcast_ref::<CoreError>() {
            e.is_user_error()
        } else if let Some(e) = cause.downcast_ref::<MergeError>() {
            e.is_user_error()
        } else if let Some(e) = cause.downcast_ref::<ProjectError>() {
            !matches!(e, ProjectError::IoError(_))
        } else if let Some(e) = cause.downcast_ref::<ConfigError>() {
            !matches!(e, ConfigError::IoError(_))
        } else {
            cause.is::<ReferenceError>()
        };
        is_user.then(|| cause.to_string())
    })
}
