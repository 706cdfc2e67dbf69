//! Error types for the kyso core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them for callers that want a single
//! error type. [`CoreError::is_user_error`] separates mistakes the user can
//! fix (bad reference, unknown study, missing pull) from internal faults.

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Project(#[from] ProjectError),
}

impl CoreError {
    /// Whether this error is caused by user input or local state the user
    /// controls, as opposed to an I/O, network or internal failure.
    pub fn is_user_error(&self) -> bool {
        match self {
            Self::Store(e) => e.is_user_error(),
            Self::Materialize(e) => e.is_user_error(),
            Self::Merge(e) => e.is_user_error(),
            Self::Reference(_) => true,
            Self::Config(e) => !matches!(e, ConfigError::IoError(_)),
            Self::Project(e) => !matches!(e, ProjectError::IoError(_)),
        }
    }
}

// ---------------------------------------------------------------------------
// Remote store errors
// ---------------------------------------------------------------------------

/// Errors from the remote data service.
#[derive(Debug, Error)]
pub enum StoreError {
    /// HTTP-level transport error (network, TLS, timeout).
    #[error("network error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    /// The session token was rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A team, study, version or file does not exist.
    #[error("{entity} not found: {name}")]
    NotFound { entity: String, name: String },

    /// A version sha prefix matched more than one version.
    #[error("version '{sha}' is ambiguous ({count} matches); use more digits")]
    Ambiguous { sha: String, count: usize },

    /// A version manifest violates the file map invariants.
    #[error("invalid manifest for version {version}: {detail}")]
    InvalidManifest { version: String, detail: String },

    /// Response body could not be decoded.
    #[error("response parse error: {0}")]
    ParseError(String),
}

impl StoreError {
    pub fn not_found(entity: &str, name: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            name: name.into(),
        }
    }

    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Ambiguous { .. })
    }
}

// ---------------------------------------------------------------------------
// Materialize errors
// ---------------------------------------------------------------------------

/// Errors from writing a version's files to disk.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// The study directory exists and overwriting was not requested.
    #[error("Directory {0} already exists.")]
    AlreadyExists(String),

    /// A file record has no entry in the version's file map.
    #[error("file '{0}' has no entry in the version file map")]
    MissingMapping(String),

    /// A file map entry points outside the study directory.
    #[error("file map path '{0}' escapes the study directory")]
    UnsafePath(String),

    /// Fetching file content failed.
    #[error("download of '{name}' failed: {source}")]
    Download {
        name: String,
        #[source]
        source: StoreError,
    },

    /// A write task panicked or was cancelled.
    #[error("write task failed: {0}")]
    TaskFailed(String),

    /// Disk I/O error.
    #[error("I/O error at '{path}': {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MaterializeError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            source,
        }
    }

    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

// ---------------------------------------------------------------------------
// Merge errors
// ---------------------------------------------------------------------------

/// Errors from the pull / detect / merge workflow.
#[derive(Debug, Error)]
pub enum MergeError {
    /// `ls` or `apply` was run before any `pull`.
    #[error("nothing to merge: run `kyso merge pull <team/study>` first")]
    NothingPulled,

    /// The named file is not part of the pulled version.
    #[error("'{0}' is not part of the pulled version")]
    NotStaged(String),

    /// A notebook document could not be parsed or serialized.
    #[error("notebook error in '{name}': {detail}")]
    Notebook { name: String, detail: String },

    /// `MERGE_HEAD.json` exists but cannot be decoded.
    #[error("merge head at '{path}' is corrupt: {detail}")]
    InvalidHead { path: PathBuf, detail: String },

    /// Walking the staging area failed.
    #[error("failed to walk staging area: {0}")]
    Walk(#[from] walkdir::Error),

    /// Pulling the remote version failed.
    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    /// Resolving the remote version failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Disk I/O error.
    #[error("I/O error at '{path}': {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MergeError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            source,
        }
    }

    pub fn is_user_error(&self) -> bool {
        match self {
            Self::NothingPulled | Self::NotStaged(_) => true,
            Self::Materialize(e) => e.is_user_error(),
            Self::Store(e) => e.is_user_error(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Reference errors
// ---------------------------------------------------------------------------

/// Errors from parsing a `team/study#sha` reference.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    /// The reference is not of the form `team/study[#sha]`.
    #[error("invalid reference '{0}': expected team/study or team/study#version-sha")]
    InvalidFormat(String),

    /// The version sha is shorter than the minimum.
    #[error("Version id must have at least {min}-digits.")]
    ShortSha { sha: String, min: usize },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Project errors
// ---------------------------------------------------------------------------

/// Errors from local project handling (`study.json`, `kyso run`).
#[derive(Debug, Error)]
pub enum ProjectError {
    /// No `study.json` in the working directory.
    #[error("No study.json found in {0}.")]
    MissingStudyJson(String),

    /// `study.json` is not valid JSON.
    #[error("study.json is invalid: {0}")]
    InvalidStudyJson(String),

    /// The requested script is not defined.
    #[error("No script named '{0}' in study.json")]
    UnknownScript(String),

    /// The script exited unsuccessfully.
    #[error("script '{name}' failed with exit code {code}")]
    ScriptFailed { name: String, code: i32 },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
