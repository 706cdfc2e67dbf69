//! Domain model types shared by the remote store, materializer and merge
//! workflow.
//!
//! Remote entities are immutable value objects: they are built once at the
//! service boundary and only read afterwards.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::{address_key, AddressKey};
use crate::errors::StoreError;

/// Canonical metadata file name at the root of every study.
pub const STUDY_JSON: &str = "study.json";

// ---------------------------------------------------------------------------
// Study metadata
// ---------------------------------------------------------------------------

/// Contents of `study.json`.
///
/// Unknown fields are preserved so that a round trip through the client does
/// not drop metadata written by other tools.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudyPkg {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scripts: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl StudyPkg {
    /// Serialize the way the service writes `study.json`: pretty JSON with a
    /// three-space indent.
    pub fn to_pretty_json(&self) -> Result<String, serde_json::Error> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"   ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        // The serializer only ever emits UTF-8.
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

// ---------------------------------------------------------------------------
// Remote entities
// ---------------------------------------------------------------------------

/// A study as known to the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Study {
    pub id: String,
    pub name: String,
    pub team: String,
}

/// Handle to the bytes of a remote file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRef {
    pub name: String,
    pub url: String,
}

/// One file of a version's manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Relative path, unique within a version.
    pub name: String,
    /// Content hash.
    pub sha: String,
    /// Remote bytes; absent for empty files.
    pub content: Option<ContentRef>,
}

impl FileRecord {
    pub fn new(name: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sha: sha.into(),
            content: None,
        }
    }

    pub fn with_content(mut self, content: ContentRef) -> Self {
        self.content = Some(content);
        self
    }

    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    pub fn address_key(&self) -> AddressKey {
        address_key(&self.sha, &self.name)
    }
}

/// Per-version mapping from address key to relative path on disk.
pub type FileMap = BTreeMap<AddressKey, String>;

/// An immutable snapshot of a study's files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: String,
    pub sha: String,
    pub file_map: FileMap,
    pub pkg: StudyPkg,
    pub created_at: Option<DateTime<Utc>>,
}

impl Version {
    /// Relative destination path for a file record.
    pub fn path_for(&self, file: &FileRecord) -> Option<&str> {
        self.file_map.get(&file.address_key()).map(String::as_str)
    }

    /// Check the file map invariants against a manifest: every record has
    /// exactly one entry, every entry is listed, and no two records resolve
    /// to the same path.
    pub fn validate(&self, files: &[FileRecord]) -> Result<(), StoreError> {
        let mut seen: HashMap<&str, &str> = HashMap::new();
        for file in files {
            let path = self.path_for(file).ok_or_else(|| StoreError::InvalidManifest {
                version: self.sha.clone(),
                detail: format!("no file map entry for '{}'", file.name),
            })?;
            if let Some(previous) = seen.insert(path, file.name.as_str()) {
                return Err(StoreError::InvalidManifest {
                    version: self.sha.clone(),
                    detail: format!(
                        "'{}' and '{}' both map to '{}'",
                        previous, file.name, path
                    ),
                });
            }
        }
        if seen.len() < self.file_map.len() {
            return Err(StoreError::InvalidManifest {
                version: self.sha.clone(),
                detail: format!(
                    "only {} of {} mapped files were listed",
                    seen.len(),
                    self.file_map.len()
                ),
            });
        }
        Ok(())
    }
}

/// Whether a relative path stays inside the directory it is joined onto.
pub fn is_safe_relative(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
