//! Cell-level three-way merge for Jupyter notebooks.
//!
//! Cells are compared as whole JSON values and aligned with
//! [`merge3`](super::sequence::merge3). A region changed differently on both
//! sides becomes a conflict block made of three markdown marker cells
//! (`<<<<<<< local`, `=======`, `>>>>>>> remote`) with the local cells after
//! the first marker and the remote cells after the separator. Marker cells
//! carry `metadata.kyso_merge.marker`, which is how conflicts are detected
//! afterwards, so the notebook stays valid JSON that Jupyter can open.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::merger::{MARKER_END, MARKER_SEPARATOR, MARKER_START};
use super::sequence::{merge3, Chunk};

/// Metadata key identifying conflict marker cells.
pub const CONFLICT_METADATA_KEY: &str = "kyso_merge";

/// Outcome of a notebook merge.
#[derive(Debug, Clone)]
pub struct NotebookMerge {
    pub notebook: Value,
    /// Number of conflict blocks inserted.
    pub conflicts: usize,
    /// Top-level keys changed differently on both sides; local was kept.
    pub metadata_conflicts: Vec<String>,
}

/// Parse `text` as a notebook: a JSON object with a `cells` array.
pub fn parse_notebook(text: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("cells")?.is_array() {
        Some(value)
    } else {
        None
    }
}

/// Serialize a notebook the way Jupyter writes it: one-space indent and a
/// trailing newline.
pub fn to_notebook_json(notebook: &Value) -> Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    notebook.serialize(&mut ser)?;
    buf.push(b'\n');
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn cells(notebook: &Value) -> &[Value] {
    notebook
        .get("cells")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Merge `local` and `remote` against `base`. A missing base is treated as
/// an empty notebook, so every differing cell conflicts.
pub fn merge_notebooks(base: Option<&Value>, local: &Value, remote: &Value) -> NotebookMerge {
    let empty = Value::Object(Map::new());
    let base = base.unwrap_or(&empty);

    let (mut merged, metadata_conflicts) = merge_top_level(base, local, remote);

    // Cells are keyed by their canonical JSON text; serde_json's default map
    // is sorted, so equal cells always produce equal keys.
    let mut by_key: HashMap<String, &Value> = HashMap::new();
    let keys_of = |nb: &Value| -> Vec<String> { cells(nb).iter().map(Value::to_string).collect() };
    let base_keys = keys_of(base);
    let local_keys = keys_of(local);
    let remote_keys = keys_of(remote);
    for cell in cells(base).iter().chain(cells(local)).chain(cells(remote)) {
        by_key.entry(cell.to_string()).or_insert(cell);
    }

    let with_ids = supports_cell_ids(&merged);
    let mut out: Vec<Value> = Vec::new();
    let mut conflicts = 0;

    for chunk in merge3(&base_keys, &local_keys, &remote_keys) {
        match chunk {
            Chunk::Resolved(keys) => {
                out.extend(keys.iter().filter_map(|k| by_key.get(k).map(|c| (*c).clone())));
            }
            Chunk::Conflict { ours, theirs, .. } => {
                let ours: Vec<Value> = ours.iter().filter_map(|k| by_key.get(k).map(|c| (*c).clone())).collect();
                let theirs: Vec<Value> = theirs.iter().filter_map(|k| by_key.get(k).map(|c| (*c).clone())).collect();

                if outputs_only_differ(&ours, &theirs) {
                    debug!(cells = ours.len(), "cells differ only in outputs, keeping local");
                    out.extend(ours);
                    continue;
                }

                conflicts += 1;
                out.push(marker_cell("start", MARKER_START, conflicts, with_ids));
                out.extend(ours);
                out.push(marker_cell("separator", MARKER_SEPARATOR, conflicts, with_ids));
                out.extend(theirs.into_iter().map(|cell| suffix_id(cell, "-remote")));
                out.push(marker_cell("end", MARKER_END, conflicts, with_ids));
            }
        }
    }

    if let Value::Object(ref mut map) = merged {
        map.insert("cells".into(), Value::Array(out));
    }

    NotebookMerge {
        notebook: merged,
        conflicts,
        metadata_conflicts,
    }
}

/// Merge every top-level key except `cells`.
fn merge_top_level(base: &Value, local: &Value, remote: &Value) -> (Value, Vec<String>) {
    let keys: BTreeSet<&String> = [base, local, remote]
        .iter()
        .filter_map(|nb| nb.as_object())
        .flat_map(|map| map.keys())
        .filter(|k| k.as_str() != "cells")
        .collect();

    let mut merged = Map::new();
    let mut conflicts = Vec::new();

    for key in keys {
        let b = base.get(key.as_str());
        let l = local.get(key.as_str());
        let r = remote.get(key.as_str());

        let chosen = if l == r || r == b {
            l
        } else if l == b {
            r
        } else {
            warn!(key = %key, "notebook field changed on both sides, keeping local");
            conflicts.push(key.clone());
            l
        };
        if let Some(value) = chosen {
            merged.insert(key.clone(), value.clone());
        }
    }

    (Value::Object(merged), conflicts)
}

/// nbformat 4.5 introduced mandatory cell ids.
fn supports_cell_ids(notebook: &Value) -> bool {
    let major = notebook.get("nbformat").and_then(Value::as_u64).unwrap_or(0);
    let minor = notebook.get("nbformat_minor").and_then(Value::as_u64).unwrap_or(0);
    major > 4 || (major == 4 && minor >= 5)
}

fn outputs_only_differ(ours: &[Value], theirs: &[Value]) -> bool {
    !ours.is_empty()
        && ours.len() == theirs.len()
        && ours.iter().zip(theirs).all(|(a, b)| {
            a.get("cell_type") == b.get("cell_type")
                && source_text(a) == source_text(b)
        })
}

fn marker_cell(marker: &str, text: &str, block: usize, with_id: bool) -> Value {
    let mut metadata = Map::new();
    metadata.insert(
        CONFLICT_METADATA_KEY.to_string(),
        json!({ "marker": marker, "block": block }),
    );
    let mut cell = json!({
        "cell_type": "markdown",
        "metadata": metadata,
        "source": [text],
    });
    if with_id {
        cell["id"] = json!(format!("kyso-merge-{}-{}", block, marker));
    }
    cell
}

fn suffix_id(mut cell: Value, suffix: &str) -> Value {
    if let Some(id) = cell.get("id").and_then(Value::as_str) {
        let mut id = id.to_string();
        // nbformat caps ids at 64 characters; cut on a char boundary.
        let limit = 64 - suffix.len();
        let cut = id
            .char_indices()
            .map(|(i, c)| i + c.len_utf8())
            .take_while(|&end| end <= limit)
            .last()
            .unwrap_or(0);
        id.truncate(cut);
        id.push_str(suffix);
        cell["id"] = Value::String(id);
    }
    cell
}

/// A cell's source as one string; nbformat allows a string or a list of lines.
pub fn source_text(cell: &Value) -> String {
    match cell.get("source") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(lines)) => lines.iter().filter_map(Value::as_str).collect(),
        _ => String::new(),
    }
}

/// Whether a notebook still contains conflict marker cells.
pub fn has_conflict_cells(notebook: &Value) -> bool {
    cells(notebook).iter().any(|cell| {
        cell.get("metadata")
            .and_then(|m| m.get(CONFLICT_METADATA_KEY))
            .is_some()
    })
}

/// Flatten a notebook into text, one block per cell, for line diffs.
pub fn render_cells(notebook: &Value) -> String {
    let mut out = String::new();
    for (idx, cell) in cells(notebook).iter().enumerate() {
        let kind = cell.get("cell_type").and_then(Value::as_str).unwrap_or("unknown");
        out.push_str(&format!("# [{}] {}\n", idx + 1, kind));
        let source = source_text(cell);
        out.push_str(&source);
        if !source.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}
