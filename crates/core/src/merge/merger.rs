//! Line-based three-way merge for text files.
//!
//! Uses the `diffy` crate to merge a base, a local (working tree) and a
//! remote (staged) version of a file. Regions changed differently on both
//! sides are framed with `<<<<<<< local` / `=======` / `>>>>>>> remote`.

use diffy::{ConflictStyle, MergeOptions};
use tracing::debug;

pub const MARKER_START: &str = "<<<<<<< local";
pub const MARKER_SEPARATOR: &str = "=======";
pub const MARKER_END: &str = ">>>>>>> remote";

/// The result of a three-way merge attempt.
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// The merged content (may contain conflict markers if `has_conflicts` is true).
    pub merged_content: String,
    /// Whether the merge left conflict markers behind.
    pub has_conflicts: bool,
}

impl MergeResult {
    fn clean(content: &str) -> Self {
        Self {
            merged_content: content.to_string(),
            has_conflicts: false,
        }
    }
}

/// Stateless three-way merge engine.
pub struct Merger;

impl Merger {
    /// Merge `local` and `remote` against `base`.
    ///
    /// Always returns merged content. When either side equals the base the
    /// other side is taken verbatim.
    pub fn three_way_merge(base: &str, local: &str, remote: &str) -> MergeResult {
        if local == base {
            debug!("local == base, remote wins cleanly");
            return MergeResult::clean(remote);
        }
        if remote == base {
            debug!("remote == base, local wins cleanly");
            return MergeResult::clean(local);
        }
        if local == remote {
            debug!("local == remote, identical changes");
            return MergeResult::clean(local);
        }

        let mut options = MergeOptions::new();
        options.set_conflict_style(ConflictStyle::Merge);

        match options.merge(base, local, remote) {
            Ok(merged) => {
                debug!("clean three-way merge");
                MergeResult::clean(&merged)
            }
            Err(conflicted) => {
                debug!("automatic merge failed, conflict markers written");
                MergeResult {
                    merged_content: relabel_markers(&conflicted),
                    has_conflicts: true,
                }
            }
        }
    }
}

/// Rename diffy's `ours`/`theirs` markers to `local`/`remote`.
fn relabel_markers(conflicted: &str) -> String {
    let mut out = String::with_capacity(conflicted.len());

    for line in conflicted.split_inclusive('\n') {
        let body = line.trim_end_matches(['\n', '\r']);
        let ending = &line[body.len()..];

        if body == "<<<<<<< ours" {
            out.push_str(MARKER_START);
            out.push_str(ending);
        } else if body == ">>>>>>> theirs" {
            out.push_str(MARKER_END);
            out.push_str(ending);
        } else {
            out.push_str(line);
        }
    }

    out
}

/// Whether `text` contains a complete conflict block: a start marker
/// followed by a separator and an end marker.
pub fn contains_conflict_markers(text: &str) -> bool {
    let mut state = 0u8;
    for line in text.lines() {
        match state {
            0 if line.starts_with("<<<<<<< ") => state = 1,
            1 if line == MARKER_SEPARATOR => state = 2,
            2 if line.starts_with(">>>>>>> ") => return true,
            _ => {}
        }
    }
    false
}
