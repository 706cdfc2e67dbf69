//! Comparing a staged file with its working copy.

use std::path::Path;

use diffy::PatchFormatter;
use serde::Serialize;

use super::notebook::{parse_notebook, render_cells};
use super::workspace::{read_optional, FileKind, StudyLayout};
use crate::errors::MergeError;

/// The three sides of one staged file, as text.
///
/// Notebooks are flattened to one block per cell; binary sides are replaced
/// by a one-line placeholder.
#[derive(Debug, Clone, Serialize)]
pub struct FileDiff {
    pub name: String,
    pub kind: FileKind,
    pub base: Option<String>,
    /// `None` when the working file does not exist.
    pub local: Option<String>,
    pub remote: String,
}

impl FileDiff {
    pub fn is_identical(&self) -> bool {
        self.local.as_deref() == Some(self.remote.as_str())
    }

    /// Unified diff from the local file to the remote one.
    pub fn render(&self, color: bool) -> String {
        let local = self.local.as_deref().unwrap_or("");
        let patch = diffy::create_patch(local, &self.remote);
        let formatter = if color {
            PatchFormatter::new().with_color()
        } else {
            PatchFormatter::new()
        };
        format!(
            "diff local/{name} remote/{name} ({kind})\n{patch}",
            name = self.name,
            kind = self.kind,
            patch = formatter.fmt_patch(&patch)
        )
    }
}

/// Load the base, local and remote sides of `name`.
pub fn file_diff(study_root: &Path, name: &str) -> Result<FileDiff, MergeError> {
    let layout = StudyLayout::new(study_root);
    let remote = layout.read_staged(name)?;
    let local = read_optional(&layout.working_path(name))?;
    let base = read_optional(&layout.base_path(name))?;

    let mut sides: Vec<&[u8]> = vec![remote.as_slice()];
    sides.extend(local.as_deref());
    sides.extend(base.as_deref());
    let kind = FileKind::detect(name, &sides);

    let show = |bytes: &[u8]| as_text(kind, bytes);
    Ok(FileDiff {
        name: name.to_string(),
        kind,
        base: base.as_deref().map(show),
        local: local.as_deref().map(show),
        remote: show(&remote),
    })
}

fn as_text(kind: FileKind, bytes: &[u8]) -> String {
    match kind {
        FileKind::Binary => format!("Binary file ({} bytes)\n", bytes.len()),
        FileKind::Text => String::from_utf8_lossy(bytes).into_owned(),
        FileKind::Notebook => {
            let text = String::from_utf8_lossy(bytes);
            match parse_notebook(&text) {
                Some(notebook) => render_cells(&notebook),
                None => text.into_owned(),
            }
        }
    }
}
