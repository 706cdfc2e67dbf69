//! Conflict detection between the staging area and the working tree.
//!
//! Detection is read-only: it compares bytes and never touches either tree.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use super::merger::contains_conflict_markers;
use super::notebook::{has_conflict_cells, parse_notebook};
use crate::errors::MergeError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Why a staged file is listed as a conflict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Working file differs from the remote version.
    Modified,
    /// Working file does not exist.
    Missing,
    /// Working file still contains conflict markers from a previous apply.
    Markers,
}

impl ConflictKind {
    /// One-character indicator shown in conflict listings.
    pub fn indicator(&self) -> &'static str {
        match self {
            Self::Modified => "~",
            Self::Missing => "+",
            Self::Markers => "!",
        }
    }
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Modified => write!(f, "modified"),
            Self::Missing => write!(f, "missing"),
            Self::Markers => write!(f, "markers"),
        }
    }
}

/// A staged file whose working copy differs from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictEntry {
    /// Path relative to the study root, `/`-separated.
    pub name: String,
    pub kind: ConflictKind,
}

// ---------------------------------------------------------------------------
// ConflictDetector
// ---------------------------------------------------------------------------

/// Compares a staging area against a working tree.
pub struct ConflictDetector;

impl ConflictDetector {
    /// Walk `staging` in file-name order and list every file whose
    /// counterpart under `working` is absent or different.
    pub fn detect(staging: &Path, working: &Path) -> Result<Vec<ConflictEntry>, MergeError> {
        let mut entries = Vec::new();

        for item in WalkDir::new(staging).sort_by_file_name() {
            let item = item?;
            if !item.file_type().is_file() {
                continue;
            }
            let rel = match item.path().strip_prefix(staging) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let name = relative_name(rel);

            let remote = std::fs::read(item.path()).map_err(|e| MergeError::io(item.path(), e))?;
            let local_path = working.join(rel);
            let kind = match std::fs::read(&local_path) {
                Ok(local) if local == remote => {
                    debug!(file = %name, "in sync");
                    continue;
                }
                Ok(local) if has_markers(&name, &local) => ConflictKind::Markers,
                Ok(_) => ConflictKind::Modified,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConflictKind::Missing,
                Err(e) => return Err(MergeError::io(&local_path, e)),
            };

            debug!(file = %name, kind = %kind, "conflict detected");
            entries.push(ConflictEntry { name, kind });
        }

        Ok(entries)
    }
}

/// Whether `bytes` still hold unresolved conflict markers. Notebooks are
/// checked for marker cells, everything else for marker lines.
pub fn has_markers(name: &str, bytes: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return false;
    };
    if is_notebook_name(name) {
        if let Some(notebook) = parse_notebook(text) {
            return has_conflict_cells(&notebook);
        }
    }
    contains_conflict_markers(text)
}

pub(crate) fn is_notebook_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("ipynb"))
}

/// Render a relative path with `/` separators.
pub(crate) fn relative_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
