//! Pull, conflict detection, and three-way merge of a study against a remote
//! version.

pub mod detector;
pub mod diff;
pub mod merger;
pub mod notebook;
pub mod sequence;
pub mod workspace;

pub use detector::{ConflictDetector, ConflictEntry, ConflictKind};
pub use diff::{file_diff, FileDiff};
pub use merger::{MergeResult, Merger};
pub use workspace::{
    apply_merge, checkout, list_conflicts, pull_merge, resolve_file, ApplyReport, FileKind,
    MergeHead, MergeOutcome, PullSummary, Side, StudyLayout,
};
