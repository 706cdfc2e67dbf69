//! Local study handling: reading `study.json` and running its scripts.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::ProjectError;
use crate::models::{StudyPkg, STUDY_JSON};

/// Read `<root>/study.json`, or `None` when the file does not exist.
pub fn read_study_json(root: &Path) -> Result<Option<StudyPkg>, ProjectError> {
    let path = root.join(STUDY_JSON);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| ProjectError::InvalidStudyJson(e.to_string()))
}

/// Wrap an argument in double quotes for `sh -c`.
pub fn quote_arg(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// The shell command line for script `name` with `extra_args` appended.
pub fn script_command(pkg: &StudyPkg, name: &str, extra_args: &[String]) -> Result<String, ProjectError> {
    let script = pkg
        .scripts
        .get(name)
        .ok_or_else(|| ProjectError::UnknownScript(name.to_string()))?;
    let mut line = script.clone();
    for arg in extra_args {
        line.push(' ');
        line.push_str(&quote_arg(arg));
    }
    Ok(line)
}

/// Run a `study.json` script in `root` with the terminal attached.
pub async fn run_script(root: &Path, name: &str, extra_args: &[String]) -> Result<(), ProjectError> {
    let pkg = read_study_json(root)?
        .ok_or_else(|| ProjectError::MissingStudyJson(root.display().to_string()))?;
    let line = script_command(&pkg, name, extra_args)?;

    info!(script = %name, "running script");
    debug!(cmd = %line, "sh -c");
    let status = Command::new("sh")
        .arg("-c")
        .arg(&line)
        .current_dir(root)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await?;

    if !status.success() {
        let code = status.code().unwrap_or(-1);
        warn!(script = %name, code, "script failed");
        return Err(ProjectError::ScriptFailed {
            name: name.to_string(),
            code,
        });
    }
    Ok(())
}
