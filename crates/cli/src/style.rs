//! Shared styling utilities for terminal output.

use std::time::Duration;

use console::Style;

use kyso_core::merge::ConflictKind;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// The closing line of a command: `> msg [elapsed]`.
pub fn summary(msg: &str, elapsed: Duration) -> String {
    let style = Style::new().bold();
    format!(
        "{} {} {}",
        style.apply_to(">"),
        msg,
        dim(&format!("[{:.2?}]", elapsed))
    )
}

/// Colored one-character indicator for a conflict kind.
pub fn indicator(kind: ConflictKind) -> String {
    let style = match kind {
        ConflictKind::Modified => Style::new().yellow().bold(),
        ConflictKind::Missing => Style::new().green().bold(),
        ConflictKind::Markers => Style::new().red().bold(),
    };
    style.apply_to(kind.indicator()).to_string()
}
