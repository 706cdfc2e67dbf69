//! The merge workflow over a study directory.
//!
//! A study root holds the user's working tree plus a `.kyso` directory:
//!
//! ```text
//! <root>/.kyso/merge/            staging area: the last pulled version
//! <root>/.kyso/base/             base snapshot: the common ancestor per file
//! <root>/.kyso/MERGE_HEAD.json   what was pulled and when
//! ```
//!
//! `pull_merge` refreshes the staging area, `list_conflicts` compares it with
//! the working tree, and `apply_merge` folds remote changes into the working
//! tree with a three-way merge against the base snapshot.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::detector::{has_markers, is_notebook_name, ConflictDetector, ConflictEntry};
use super::merger::{contains_conflict_markers, Merger};
use super::notebook::{has_conflict_cells, merge_notebooks, parse_notebook, to_notebook_json};
use crate::errors::MergeError;
use crate::materialize::{materialize, MaterializeOptions, MaterializeOutcome};
use crate::reference::MergeReference;
use crate::remote::RemoteStore;

pub const KYSO_DIR: &str = ".kyso";
pub const STAGING_DIR: &str = "merge";
pub const BASE_DIR: &str = "base";
pub const MERGE_HEAD_FILE: &str = "MERGE_HEAD.json";

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Paths inside a study directory.
#[derive(Debug, Clone)]
pub struct StudyLayout {
    root: PathBuf,
}

impl StudyLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn kyso_dir(&self) -> PathBuf {
        self.root.join(KYSO_DIR)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.kyso_dir().join(STAGING_DIR)
    }

    pub fn base_dir(&self) -> PathBuf {
        self.kyso_dir().join(BASE_DIR)
    }

    pub fn merge_head_path(&self) -> PathBuf {
        self.kyso_dir().join(MERGE_HEAD_FILE)
    }

    pub fn working_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn staged_path(&self, name: &str) -> PathBuf {
        self.staging_dir().join(name)
    }

    pub fn base_path(&self, name: &str) -> PathBuf {
        self.base_dir().join(name)
    }

    fn require_staging(&self) -> Result<PathBuf, MergeError> {
        let staging = self.staging_dir();
        if staging.is_dir() {
            Ok(staging)
        } else {
            Err(MergeError::NothingPulled)
        }
    }

    /// Staged bytes of `name`; a name outside the pulled version is
    /// `NotStaged`.
    pub(crate) fn read_staged(&self, name: &str) -> Result<Vec<u8>, MergeError> {
        self.require_staging()?;
        if !crate::models::is_safe_relative(name) {
            return Err(MergeError::NotStaged(name.to_string()));
        }
        read_optional(&self.staged_path(name))?.ok_or_else(|| MergeError::NotStaged(name.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Merge head
// ---------------------------------------------------------------------------

/// Record of the last pull, stored as `.kyso/MERGE_HEAD.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeHead {
    /// The reference as typed by the user.
    pub reference: String,
    /// Full sha of the version that was pulled.
    pub version_sha: String,
    pub pulled_at: DateTime<Utc>,
}

impl MergeHead {
    pub fn read(layout: &StudyLayout) -> Result<Option<Self>, MergeError> {
        let path = layout.merge_head_path();
        let Some(bytes) = read_optional(&path)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| MergeError::InvalidHead {
                path,
                detail: e.to_string(),
            })
    }

    pub fn write(&self, layout: &StudyLayout) -> Result<(), MergeError> {
        let path = layout.merge_head_path();
        let json = serde_json::to_vec_pretty(self).map_err(|e| MergeError::InvalidHead {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        write_file(&path, &json)
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How a file's three sides are compared.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Text,
    Notebook,
    Binary,
}

impl FileKind {
    /// Classify a file from its name and the bytes of every present side.
    pub fn detect(name: &str, sides: &[&[u8]]) -> Self {
        let texts: Option<Vec<&str>> = sides.iter().map(|s| std::str::from_utf8(s).ok()).collect();
        match texts {
            None => Self::Binary,
            Some(texts)
                if is_notebook_name(name) && texts.iter().all(|t| parse_notebook(t).is_some()) =>
            {
                Self::Notebook
            }
            Some(_) => Self::Text,
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Notebook => write!(f, "notebook"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// Result of merging one file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// The working file now holds a merge with no markers.
    Resolved,
    /// The file needs manual attention.
    Conflicted,
}

impl std::fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolved => write!(f, "resolved"),
            Self::Conflicted => write!(f, "conflicted"),
        }
    }
}

/// Which side wins when resolving a file by hand.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize)]
pub struct PullSummary {
    pub study: String,
    pub version_sha: String,
    pub files: usize,
    pub staging_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    /// Every processed file with its outcome, in detection order.
    pub merged: Vec<(String, MergeOutcome)>,
    /// Files still needing attention, in detection order.
    pub remaining: Vec<ConflictEntry>,
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Fetch a version into the staging area, replacing any previous pull.
pub async fn pull_merge(
    store: Arc<dyn RemoteStore>,
    study_root: &Path,
    reference: &MergeReference,
) -> Result<PullSummary, MergeError> {
    let layout = StudyLayout::new(study_root);
    let (study, version) = store
        .resolve_version(&reference.team, &reference.study, reference.version_sha.as_deref())
        .await?;
    let files = store.list_files(&version).await?;

    let staging = layout.staging_dir();
    match tokio::fs::remove_dir_all(&staging).await {
        Ok(()) => debug!(dir = %staging.display(), "removed previous staging area"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(MergeError::io(&staging, e)),
    }
    let kyso = layout.kyso_dir();
    tokio::fs::create_dir_all(&kyso)
        .await
        .map_err(|e| MergeError::io(&kyso, e))?;

    let options = MaterializeOptions {
        target: Some(STAGING_DIR.to_string()),
        throw_if_exists: false,
    };
    let outcome = materialize(store, &study, &version, &files, &kyso, &options).await?;
    let count = match outcome {
        MaterializeOutcome::Written { files, .. } => files,
        MaterializeOutcome::Skipped { .. } => 0,
    };

    MergeHead {
        reference: reference.to_string(),
        version_sha: version.sha.clone(),
        pulled_at: Utc::now(),
    }
    .write(&layout)?;

    info!(
        study = %study.name,
        version = %version.sha,
        files = count,
        "pulled version into staging area"
    );

    Ok(PullSummary {
        study: study.name,
        version_sha: version.sha,
        files: count,
        staging_dir: staging,
    })
}

/// List staged files whose working copy is missing or different.
pub fn list_conflicts(study_root: &Path) -> Result<Vec<ConflictEntry>, MergeError> {
    let layout = StudyLayout::new(study_root);
    let staging = layout.require_staging()?;
    ConflictDetector::detect(&staging, layout.root())
}

/// Merge every conflicting staged file into the working tree.
pub fn apply_merge(study_root: &Path) -> Result<ApplyReport, MergeError> {
    let layout = StudyLayout::new(study_root);
    let entries = list_conflicts(study_root)?;
    let mut report = ApplyReport::default();

    for entry in entries {
        let remote = layout.read_staged(&entry.name)?;
        let local = read_optional(&layout.working_path(&entry.name))?;
        let base = read_optional(&layout.base_path(&entry.name))?;

        let merged = merge_file(&entry.name, base.as_deref(), local.as_deref(), &remote)?;
        if let Some(ref bytes) = merged.write {
            write_file(&layout.working_path(&entry.name), bytes)?;
        }
        if merged.update_base {
            write_file(&layout.base_path(&entry.name), &remote)?;
        }

        debug!(file = %entry.name, outcome = %merged.outcome, "merged");
        if merged.outcome == MergeOutcome::Conflicted {
            report.remaining.push(entry.clone());
        }
        report.merged.push((entry.name, merged.outcome));
    }

    info!(
        merged = report.merged.len(),
        remaining = report.remaining.len(),
        "apply finished"
    );
    Ok(report)
}

/// Settle one file by taking a whole side.
pub fn resolve_file(study_root: &Path, name: &str, side: Side) -> Result<(), MergeError> {
    let layout = StudyLayout::new(study_root);
    let remote = layout.read_staged(name)?;
    if side == Side::Remote {
        write_file(&layout.working_path(name), &remote)?;
    }
    write_file(&layout.base_path(name), &remote)?;
    info!(file = %name, side = ?side, "resolved by hand");
    Ok(())
}

/// Download a version into `cwd/<study>` and record it as the base snapshot.
pub async fn checkout(
    store: Arc<dyn RemoteStore>,
    cwd: &Path,
    team: &str,
    study: &str,
    version_sha: Option<&str>,
) -> Result<PathBuf, MergeError> {
    let (study, version) = store.resolve_version(team, study, version_sha).await?;
    let files = store.list_files(&version).await?;

    let outcome = materialize(
        store,
        &study,
        &version,
        &files,
        cwd,
        &MaterializeOptions::default(),
    )
    .await?;
    let dir = outcome.dir().to_path_buf();

    let layout = StudyLayout::new(&dir);
    for file in &files {
        let Some(rel) = version.path_for(file) else {
            continue;
        };
        let src = layout.working_path(rel);
        let dest = layout.base_path(rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MergeError::io(parent, e))?;
        }
        std::fs::copy(&src, &dest).map_err(|e| MergeError::io(&src, e))?;
    }

    info!(dir = %dir.display(), version = %version.sha, "checked out");
    Ok(dir)
}

// ---------------------------------------------------------------------------
// Per-file merge
// ---------------------------------------------------------------------------

struct FileMerge {
    outcome: MergeOutcome,
    /// New working-file content, if it changes.
    write: Option<Vec<u8>>,
    /// Whether the base snapshot moves to the remote content.
    update_base: bool,
}

impl FileMerge {
    fn resolved(write: Option<Vec<u8>>) -> Self {
        Self {
            outcome: MergeOutcome::Resolved,
            write,
            update_base: true,
        }
    }
}

fn merge_file(
    name: &str,
    base: Option<&[u8]>,
    local: Option<&[u8]>,
    remote: &[u8],
) -> Result<FileMerge, MergeError> {
    let Some(local) = local else {
        return Ok(match base {
            Some(base) if base == remote => {
                debug!(file = %name, "kept local deletion");
                FileMerge::resolved(None)
            }
            Some(_) => {
                warn!(file = %name, "deleted locally but changed remotely, restoring remote");
                FileMerge {
                    outcome: MergeOutcome::Conflicted,
                    write: Some(remote.to_vec()),
                    update_base: true,
                }
            }
            None => FileMerge::resolved(Some(remote.to_vec())),
        });
    };

    if local == remote {
        return Ok(FileMerge::resolved(None));
    }
    if base == Some(local) {
        return Ok(FileMerge::resolved(Some(remote.to_vec())));
    }
    if base == Some(remote) {
        let outcome = if has_markers(name, local) {
            MergeOutcome::Conflicted
        } else {
            MergeOutcome::Resolved
        };
        return Ok(FileMerge {
            outcome,
            write: None,
            update_base: true,
        });
    }

    let mut sides: Vec<&[u8]> = vec![local, remote];
    sides.extend(base);
    match FileKind::detect(name, &sides) {
        FileKind::Binary => {
            warn!(file = %name, "binary file changed on both sides");
            Ok(FileMerge {
                outcome: MergeOutcome::Conflicted,
                write: None,
                update_base: false,
            })
        }
        FileKind::Text => {
            let text = |bytes: &[u8]| String::from_utf8_lossy(bytes).into_owned();
            let base_text = base.map(text).unwrap_or_default();
            let result = Merger::three_way_merge(&base_text, &text(local), &text(remote));
            let conflicted = result.has_conflicts || contains_conflict_markers(&result.merged_content);
            Ok(FileMerge {
                outcome: outcome_for(conflicted),
                write: Some(result.merged_content.into_bytes()),
                update_base: true,
            })
        }
        FileKind::Notebook => {
            let parse = |bytes: &[u8]| {
                std::str::from_utf8(bytes)
                    .ok()
                    .and_then(parse_notebook)
                    .ok_or_else(|| MergeError::Notebook {
                        name: name.to_string(),
                        detail: "not a notebook".into(),
                    })
            };
            let base_nb = base.map(parse).transpose()?;
            let merged = merge_notebooks(base_nb.as_ref(), &parse(local)?, &parse(remote)?);
            if !merged.metadata_conflicts.is_empty() {
                warn!(
                    file = %name,
                    fields = ?merged.metadata_conflicts,
                    "notebook fields changed on both sides, kept local"
                );
            }
            let json = to_notebook_json(&merged.notebook).map_err(|e| MergeError::Notebook {
                name: name.to_string(),
                detail: e.to_string(),
            })?;
            Ok(FileMerge {
                outcome: outcome_for(has_conflict_cells(&merged.notebook)),
                write: Some(json.into_bytes()),
                update_base: true,
            })
        }
    }
}

fn outcome_for(conflicted: bool) -> MergeOutcome {
    if conflicted {
        MergeOutcome::Conflicted
    } else {
        MergeOutcome::Resolved
    }
}

// ---------------------------------------------------------------------------
// Filesystem helpers
// ---------------------------------------------------------------------------

pub(crate) fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, MergeError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MergeError::io(path, e)),
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), MergeError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| MergeError::io(parent, e))?;
    }
    std::fs::write(path, bytes).map_err(|e| MergeError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_kind_detection() {
        let nb: &[u8] = br#"{"cells": [], "nbformat": 4}"#;
        let plain: &[u8] = b"not json";
        let binary: &[u8] = &[0xff, 0x00];
        assert_eq!(FileKind::detect("a.ipynb", &[nb, nb]), FileKind::Notebook);
        assert_eq!(FileKind::detect("a.ipynb", &[nb, plain]), FileKind::Text);
        assert_eq!(FileKind::detect("a.json", &[nb, nb]), FileKind::Text);
        assert_eq!(FileKind::detect("a.bin", &[plain, binary]), FileKind::Binary);
    }

    #[test]
    fn test_deletion_rules() {
        let kept = merge_file("a.txt", Some(b"same"), None, b"same").unwrap();
        assert_eq!(kept.outcome, MergeOutcome::Resolved);
        assert!(kept.write.is_none());

        let restored = merge_file("a.txt", Some(b"old"), None, b"new").unwrap();
        assert_eq!(restored.outcome, MergeOutcome::Conflicted);
        assert_eq!(restored.write.as_deref(), Some(b"new".as_slice()));

        let added = merge_file("a.txt", None, None, b"new").unwrap();
        assert_eq!(added.outcome, MergeOutcome::Resolved);
        assert_eq!(added.write.as_deref(), Some(b"new".as_slice()));
    }

    #[test]
    fn test_binary_rules() {
        let base = [0u8, 0xff, 1];
        let local = [0u8, 0xff, 2];
        let remote = [0u8, 0xff, 3];

        let clean = merge_file("img.png", Some(&base), Some(&base), &remote).unwrap();
        assert_eq!(clean.outcome, MergeOutcome::Resolved);
        assert_eq!(clean.write.as_deref(), Some(remote.as_slice()));

        let both = merge_file("img.png", Some(&base), Some(&local), &remote).unwrap();
        assert_eq!(both.outcome, MergeOutcome::Conflicted);
        assert!(both.write.is_none());
        assert!(!both.update_base);
    }

    #[test]
    fn test_text_without_base_conflicts() {
        let merged = merge_file("a.txt", None, Some(b"local\n"), b"remote\n").unwrap();
        assert_eq!(merged.outcome, MergeOutcome::Conflicted);
        let text = String::from_utf8(merged.write.unwrap()).unwrap();
        assert!(contains_conflict_markers(&text));
    }

    #[test]
    fn test_merge_head_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StudyLayout::new(dir.path());
        assert!(MergeHead::read(&layout).unwrap().is_none());

        let head = MergeHead {
            reference: "team/study#abcdef".into(),
            version_sha: "abcdef0123".into(),
            pulled_at: Utc::now(),
        };
        head.write(&layout).unwrap();
        assert_eq!(MergeHead::read(&layout).unwrap(), Some(head));

        std::fs::write(layout.merge_head_path(), "{").unwrap();
        assert!(matches!(
            MergeHead::read(&layout),
            Err(MergeError::InvalidHead { .. })
        ));
    }

    #[test]
    fn test_resolve_requires_pull() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            resolve_file(dir.path(), "a.txt", Side::Remote),
            Err(MergeError::NothingPulled)
        ));
    }
}
