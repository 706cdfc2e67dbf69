//! End-to-end tests for the pull / ls / apply workflow.
//!
//! These tests run the real merge workflow against:
//! - An in-memory remote store holding several versions of one study
//! - A study checked out into a temporary directory
//!
//! No network I/O.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;
use walkdir::WalkDir;

use kyso_core::errors::{MergeError, ReferenceError, StoreError};
use kyso_core::merge::merger::{MARKER_END, MARKER_SEPARATOR, MARKER_START};
use kyso_core::merge::notebook::CONFLICT_METADATA_KEY;
use kyso_core::merge::{
    apply_merge, checkout, file_diff, list_conflicts, pull_merge, resolve_file, ConflictEntry,
    ConflictKind, MergeHead, MergeOutcome, Side, StudyLayout,
};
use kyso_core::models::StudyPkg;
use kyso_core::{MemoryStore, MergeReference, RemoteStore};

// ===========================================================================
// Helpers
// ===========================================================================

const TEAM: &str = "acme";
const STUDY: &str = "iris";

fn pkg() -> StudyPkg {
    StudyPkg {
        name: STUDY.into(),
        ..Default::default()
    }
}

fn lines(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("line {}", i)).collect()
}

fn text(lines: &[String]) -> String {
    let mut s = lines.join("\n");
    s.push('\n');
    s
}

fn with_line(n: usize, replacement: &str) -> String {
    let mut l = lines(10);
    l[n - 1] = replacement.to_string();
    text(&l)
}

struct Fixture {
    _tmp: TempDir,
    root: PathBuf,
    store: MemoryStore,
}

impl Fixture {
    /// Publish version `aaaaaa1` and check it out.
    async fn new(files: &[(&str, &str)]) -> Self {
        let tmp = TempDir::new().unwrap();
        let mut store = MemoryStore::new();
        store.add_text_version(TEAM, STUDY, "aaaaaa1", pkg(), files);
        let root = checkout(shared(&store), tmp.path(), TEAM, STUDY, None)
            .await
            .unwrap();
        Self {
            _tmp: tmp,
            root,
            store,
        }
    }

    fn publish(&mut self, sha: &str, files: &[(&str, &str)]) {
        self.store.add_text_version(TEAM, STUDY, sha, pkg(), files);
    }

    async fn pull(&self, reference: &str) {
        let reference = MergeReference::parse(reference).unwrap();
        pull_merge(shared(&self.store), &self.root, &reference)
            .await
            .unwrap();
    }

    fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.root.join(name)).unwrap()
    }

    fn write(&self, name: &str, content: &str) {
        std::fs::write(self.root.join(name), content).unwrap();
    }
}

/// A store handle frozen at the versions published so far.
fn shared(store: &MemoryStore) -> Arc<dyn RemoteStore> {
    Arc::new(store.clone())
}

fn entry(name: &str, kind: ConflictKind) -> ConflictEntry {
    ConflictEntry {
        name: name.to_string(),
        kind,
    }
}

fn tree_files(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap();
            rel.to_string_lossy().replace('\\', "/")
        })
        .filter(|p| !p.starts_with(".kyso"))
        .collect();
    names.sort();
    names
}

fn notebook(sources: &[&str]) -> String {
    let cells: Vec<Value> = sources
        .iter()
        .map(|src| {
            json!({
                "cell_type": "code",
                "execution_count": null,
                "metadata": {},
                "outputs": [],
                "source": [src],
            })
        })
        .collect();
    let nb = json!({
        "cells": cells,
        "metadata": { "kernelspec": { "name": "python3" } },
        "nbformat": 4,
        "nbformat_minor": 2,
    });
    serde_json::to_string_pretty(&nb).unwrap()
}

// ===========================================================================
// Scenarios
// ===========================================================================

#[tokio::test]
async fn test_clean_pull_then_apply() {
    let fx = Fixture::new(&[("notes.txt", "hello\n"), ("data/raw.csv", "a,b\n1,2\n")]).await;
    fx.pull("acme/iris").await;

    assert!(list_conflicts(&fx.root).unwrap().is_empty());

    let before = tree_files(&fx.root);
    let report = apply_merge(&fx.root).unwrap();
    assert!(report.merged.is_empty());
    assert!(report.remaining.is_empty());
    assert_eq!(tree_files(&fx.root), before);
    assert_eq!(fx.read("notes.txt"), "hello\n");
}

#[tokio::test]
async fn test_divergent_lines_merge_cleanly() {
    let base = text(&lines(10));
    let mut fx = Fixture::new(&[("notes.txt", &base)]).await;

    fx.write("notes.txt", &with_line(5, "local line 5"));
    fx.publish("bbbbbb2", &[("notes.txt", &with_line(9, "remote line 9"))]);
    fx.pull("acme/iris#bbbbbb").await;

    assert_eq!(
        list_conflicts(&fx.root).unwrap(),
        vec![entry("notes.txt", ConflictKind::Modified)]
    );

    let report = apply_merge(&fx.root).unwrap();
    assert_eq!(
        report.merged,
        vec![("notes.txt".to_string(), MergeOutcome::Resolved)]
    );
    assert!(report.remaining.is_empty());

    let merged = fx.read("notes.txt");
    assert!(merged.contains("local line 5\n"));
    assert!(merged.contains("remote line 9\n"));
    assert!(!merged.contains("<<<<<<<"));
}

#[tokio::test]
async fn test_same_line_divergence_then_fix_and_reapply() {
    let base = text(&lines(10));
    let mut fx = Fixture::new(&[("notes.txt", &base)]).await;

    fx.write("notes.txt", &with_line(5, "local line 5"));
    fx.publish("bbbbbb2", &[("notes.txt", &with_line(5, "remote line 5"))]);
    fx.pull("acme/iris").await;

    let report = apply_merge(&fx.root).unwrap();
    assert_eq!(
        report.remaining,
        vec![entry("notes.txt", ConflictKind::Modified)]
    );
    let merged = fx.read("notes.txt");
    assert!(merged.contains("<<<<<<< local\nlocal line 5\n=======\nremote line 5\n>>>>>>> remote\n"));

    // The working file keeps its markers until the user edits them away.
    assert_eq!(
        list_conflicts(&fx.root).unwrap(),
        vec![entry("notes.txt", ConflictKind::Markers)]
    );
    let again = apply_merge(&fx.root).unwrap();
    assert_eq!(again.remaining, vec![entry("notes.txt", ConflictKind::Markers)]);
    assert_eq!(fx.read("notes.txt"), merged);

    fx.write("notes.txt", &with_line(5, "settled line 5"));
    let fixed = apply_merge(&fx.root).unwrap();
    assert!(fixed.remaining.is_empty());
    assert_eq!(
        fixed.merged,
        vec![("notes.txt".to_string(), MergeOutcome::Resolved)]
    );
    assert_eq!(fx.read("notes.txt"), with_line(5, "settled line 5"));
}

#[tokio::test]
async fn test_one_sided_remote_change_converges() {
    let mut fx = Fixture::new(&[("a.txt", "one\n"), ("b.txt", "two\n")]).await;
    fx.publish("bbbbbb2", &[("a.txt", "one\n"), ("b.txt", "TWO\n")]);
    fx.pull("acme/iris").await;

    let report = apply_merge(&fx.root).unwrap();
    assert!(report.remaining.is_empty());
    assert_eq!(fx.read("b.txt"), "TWO\n");
    assert!(list_conflicts(&fx.root).unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_file_is_listed_and_restored() {
    let mut fx = Fixture::new(&[("a.txt", "one\n")]).await;
    fx.publish("bbbbbb2", &[("a.txt", "one\n"), ("new/added.txt", "fresh\n")]);
    fx.pull("acme/iris").await;

    assert_eq!(
        list_conflicts(&fx.root).unwrap(),
        vec![entry("new/added.txt", ConflictKind::Missing)]
    );
    let report = apply_merge(&fx.root).unwrap();
    assert!(report.remaining.is_empty());
    assert_eq!(fx.read("new/added.txt"), "fresh\n");
}

#[tokio::test]
async fn test_local_deletion_of_unchanged_file_is_kept() {
    let mut fx = Fixture::new(&[("a.txt", "one\n"), ("old.txt", "bye\n")]).await;
    std::fs::remove_file(fx.root.join("old.txt")).unwrap();
    fx.publish("bbbbbb2", &[("a.txt", "one\n"), ("old.txt", "bye\n")]);
    fx.pull("acme/iris").await;

    let report = apply_merge(&fx.root).unwrap();
    assert_eq!(
        report.merged,
        vec![("old.txt".to_string(), MergeOutcome::Resolved)]
    );
    assert!(!fx.root.join("old.txt").exists());
}

#[tokio::test]
async fn test_binary_conflict_leaves_file_untouched() {
    let tmp = TempDir::new().unwrap();
    let mut store = MemoryStore::new();
    let v1: &[u8] = &[0, 1, 0xff];
    let v2: &[u8] = &[0, 3, 0xff];
    store.add_version(TEAM, STUDY, "aaaaaa1", pkg(), &[("img.bin", v1)]);
    let root = checkout(shared(&store), tmp.path(), TEAM, STUDY, None)
        .await
        .unwrap();

    std::fs::write(root.join("img.bin"), [0, 2, 0xff]).unwrap();
    store.add_version(TEAM, STUDY, "bbbbbb2", pkg(), &[("img.bin", v2)]);
    let reference = MergeReference::parse("acme/iris").unwrap();
    pull_merge(shared(&store), &root, &reference).await.unwrap();

    let report = apply_merge(&root).unwrap();
    assert_eq!(report.remaining, vec![entry("img.bin", ConflictKind::Modified)]);
    assert_eq!(std::fs::read(root.join("img.bin")).unwrap(), vec![0, 2, 0xff]);

    resolve_file(&root, "img.bin", Side::Remote).unwrap();
    assert_eq!(std::fs::read(root.join("img.bin")).unwrap(), vec![0, 3, 0xff]);
    assert!(list_conflicts(&root).unwrap().is_empty());
}

#[tokio::test]
async fn test_resolve_local_keeps_working_copy() {
    let mut fx = Fixture::new(&[("a.txt", "base\n")]).await;
    fx.write("a.txt", "mine\n");
    fx.publish("bbbbbb2", &[("a.txt", "theirs\n")]);
    fx.pull("acme/iris").await;

    resolve_file(&fx.root, "a.txt", Side::Local).unwrap();
    let report = apply_merge(&fx.root).unwrap();
    assert!(report.remaining.is_empty());
    assert_eq!(fx.read("a.txt"), "mine\n");
}

#[tokio::test]
async fn test_ls_is_deterministic() {
    let files: Vec<(String, String)> = (0..12)
        .map(|i| (format!("dir{}/file{}.txt", i % 3, i), format!("v1 {}\n", i)))
        .collect();
    let refs: Vec<(&str, &str)> = files.iter().map(|(n, c)| (n.as_str(), c.as_str())).collect();
    let mut fx = Fixture::new(&refs).await;

    let changed: Vec<(String, String)> = files
        .iter()
        .map(|(n, _)| (n.clone(), "v2\n".to_string()))
        .collect();
    let refs: Vec<(&str, &str)> = changed.iter().map(|(n, c)| (n.as_str(), c.as_str())).collect();
    fx.publish("bbbbbb2", &refs);
    fx.pull("acme/iris").await;

    let first = list_conflicts(&fx.root).unwrap();
    let second = list_conflicts(&fx.root).unwrap();
    assert_eq!(first.len(), 12);
    assert_eq!(first, second);
    let mut sorted = first.clone();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(first, sorted);
}

#[tokio::test]
async fn test_notebook_cell_conflict_is_marked_in_place() {
    let base = notebook(&["import pandas", "df = load()", "df.plot()", "df.describe()"]);
    let mut fx = Fixture::new(&[("analysis.ipynb", &base)]).await;

    fx.write(
        "analysis.ipynb",
        &notebook(&["import pandas", "df = load()", "df.plot(kind='bar')", "df.describe()"]),
    );
    fx.publish(
        "bbbbbb2",
        &[(
            "analysis.ipynb",
            &notebook(&["import pandas", "df = load()", "df.plot(kind='line')", "df.describe()"]),
        )],
    );
    fx.pull("acme/iris").await;

    let report = apply_merge(&fx.root).unwrap();
    assert_eq!(
        report.merged,
        vec![("analysis.ipynb".to_string(), MergeOutcome::Conflicted)]
    );
    assert_eq!(
        report.remaining,
        vec![entry("analysis.ipynb", ConflictKind::Modified)]
    );

    let listed = list_conflicts(&fx.root).unwrap();
    assert_eq!(listed, vec![entry("analysis.ipynb", ConflictKind::Markers)]);
    assert_eq!(listed[0].kind.indicator(), "!");

    let on_disk: Value = serde_json::from_str(&fx.read("analysis.ipynb")).unwrap();
    let cells = on_disk["cells"].as_array().unwrap();
    let sources: Vec<String> = cells
        .iter()
        .map(|c| {
            c["source"]
                .as_array()
                .unwrap()
                .iter()
                .filter_map(Value::as_str)
                .collect()
        })
        .collect();
    assert_eq!(
        sources,
        vec![
            "import pandas",
            "df = load()",
            MARKER_START,
            "df.plot(kind='bar')",
            MARKER_SEPARATOR,
            "df.plot(kind='line')",
            MARKER_END,
            "df.describe()",
        ]
    );
    let markers: Vec<&str> = cells
        .iter()
        .filter_map(|c| c["metadata"][CONFLICT_METADATA_KEY]["marker"].as_str())
        .collect();
    assert_eq!(markers, vec!["start", "separator", "end"]);
    assert_eq!(on_disk["nbformat"], 4);
}

#[tokio::test]
async fn test_pull_refreshes_staging_and_records_head() {
    let mut fx = Fixture::new(&[("a.txt", "one\n"), ("gone.txt", "x\n")]).await;
    fx.publish("bbbbbb2", &[("a.txt", "two\n"), ("gone.txt", "x\n")]);
    fx.pull("acme/iris#bbbbbb").await;
    fx.publish("cccccc3", &[("a.txt", "three\n")]);
    fx.pull("acme/iris").await;

    let layout = StudyLayout::new(&fx.root);
    assert!(!layout.staged_path("gone.txt").exists());
    assert_eq!(
        std::fs::read_to_string(layout.staged_path("a.txt")).unwrap(),
        "three\n"
    );

    let head = MergeHead::read(&layout).unwrap().unwrap();
    assert_eq!(head.version_sha, "cccccc3");
    assert_eq!(head.reference, "acme/iris");
}

#[tokio::test]
async fn test_diff_of_staged_file() {
    let mut fx = Fixture::new(&[("a.txt", "one\n")]).await;
    fx.write("a.txt", "ONE\n");
    fx.publish("bbbbbb2", &[("a.txt", "one\n")]);
    fx.pull("acme/iris").await;

    let diff = file_diff(&fx.root, "a.txt").unwrap();
    assert_eq!(diff.base.as_deref(), Some("one\n"));
    assert_eq!(diff.local.as_deref(), Some("ONE\n"));
    let rendered = diff.render(false);
    assert!(rendered.contains("-ONE\n"));
    assert!(rendered.contains("+one\n"));
}

// ===========================================================================
// Errors
// ===========================================================================

#[tokio::test]
async fn test_ls_and_apply_before_pull() {
    let fx = Fixture::new(&[("a.txt", "one\n")]).await;
    assert!(matches!(list_conflicts(&fx.root), Err(MergeError::NothingPulled)));
    assert!(matches!(apply_merge(&fx.root), Err(MergeError::NothingPulled)));
}

#[test]
fn test_short_sha_is_rejected_before_any_lookup() {
    assert_eq!(
        MergeReference::parse("teamA/studyB#ab1"),
        Err(ReferenceError::ShortSha {
            sha: "ab1".into(),
            min: 6
        })
    );
}

#[tokio::test]
async fn test_pull_unknown_study_is_user_error() {
    let fx = Fixture::new(&[("a.txt", "one\n")]).await;
    let reference = MergeReference::parse("acme/unknown").unwrap();
    let err = pull_merge(shared(&fx.store), &fx.root, &reference)
        .await
        .unwrap_err();
    assert!(matches!(err, MergeError::Store(StoreError::NotFound { .. })));
    assert!(err.is_user_error());
}

#[tokio::test]
async fn test_checkout_into_existing_directory_fails() {
    let fx = Fixture::new(&[("a.txt", "one\n")]).await;
    let parent = fx.root.parent().unwrap();
    let err = checkout(shared(&fx.store), parent, TEAM, STUDY, None)
        .await
        .unwrap_err();
    assert!(err.is_user_error());
    assert_eq!(err.to_string(), "Directory iris already exists.");
}
