//! In-memory [`RemoteStore`] for tests and offline fixtures.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::errors::StoreError;
use crate::models::{ContentRef, FileRecord, Study, StudyPkg, Version, STUDY_JSON};
use crate::remote::RemoteStore;

#[derive(Clone)]
struct StoredVersion {
    version: Version,
    files: Vec<FileRecord>,
}

#[derive(Clone)]
struct StoredStudy {
    study: Study,
    /// Oldest first.
    versions: Vec<StoredVersion>,
}

/// A remote store backed by plain maps.
///
/// Versions are added with [`MemoryStore::add_version`]; the last one added
/// for a study is its latest version. File shas are the SHA-256 of the
/// content, and each file maps to its own name on disk.
#[derive(Clone, Default)]
pub struct MemoryStore {
    studies: Vec<StoredStudy>,
    blobs: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new version of `team/study` and return it.
    ///
    /// A `study.json` record is always part of the manifest; its bytes come
    /// from `pkg`, not from the blob store.
    pub fn add_version(
        &mut self,
        team: &str,
        study: &str,
        version_sha: &str,
        pkg: StudyPkg,
        files: &[(&str, &[u8])],
    ) -> Version {
        let idx = match self
            .studies
            .iter()
            .position(|s| s.study.team == team && s.study.name == study)
        {
            Some(idx) => idx,
            None => {
                self.studies.push(StoredStudy {
                    study: Study {
                        id: format!("study-{}", self.studies.len() + 1),
                        name: study.to_string(),
                        team: team.to_string(),
                    },
                    versions: Vec::new(),
                });
                self.studies.len() - 1
            }
        };

        let mut records = Vec::new();
        if !files.iter().any(|(name, _)| *name == STUDY_JSON) {
            let pkg_bytes = pkg.to_pretty_json().unwrap_or_default();
            records.push(
                FileRecord::new(STUDY_JSON, content_sha(pkg_bytes.as_bytes())).with_content(
                    ContentRef {
                        name: STUDY_JSON.to_string(),
                        url: format!("memory://{}/{}/{}", study, version_sha, STUDY_JSON),
                    },
                ),
            );
        }
        for (name, bytes) in files {
            let mut record = FileRecord::new(*name, content_sha(bytes));
            if !bytes.is_empty() && *name != STUDY_JSON {
                let url = format!("memory://{}/{}/{}", study, version_sha, name);
                self.blobs.insert(url.clone(), bytes.to_vec());
                record = record.with_content(ContentRef {
                    name: name.to_string(),
                    url,
                });
            } else if *name == STUDY_JSON {
                record = record.with_content(ContentRef {
                    name: name.to_string(),
                    url: format!("memory://{}/{}/{}", study, version_sha, name),
                });
            }
            records.push(record);
        }

        let version = Version {
            id: format!("{}-{}", study, version_sha),
            sha: version_sha.to_string(),
            file_map: records
                .iter()
                .map(|r| (r.address_key(), r.name.clone()))
                .collect(),
            pkg,
            created_at: None,
        };
        self.studies[idx].versions.push(StoredVersion {
            version: version.clone(),
            files: records,
        });
        version
    }

    /// [`add_version`](Self::add_version) for text-only fixtures.
    pub fn add_text_version(
        &mut self,
        team: &str,
        study: &str,
        version_sha: &str,
        pkg: StudyPkg,
        files: &[(&str, &str)],
    ) -> Version {
        let files: Vec<(&str, &[u8])> = files.iter().map(|(n, c)| (*n, c.as_bytes())).collect();
        self.add_version(team, study, version_sha, pkg, &files)
    }

    /// Make every download of `name` fail with an HTTP 500.
    pub fn fail_fetch(&mut self, name: &str) {
        self.failing.insert(name.to_string());
    }
}

fn content_sha(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn resolve_version(
        &self,
        team: &str,
        study: &str,
        version_sha: Option<&str>,
    ) -> Result<(Study, Version), StoreError> {
        let stored = self
            .studies
            .iter()
            .find(|s| s.study.team == team && s.study.name == study)
            .ok_or_else(|| StoreError::not_found("study", format!("{}/{}", team, study)))?;

        let version = match version_sha {
            None => stored.versions.last(),
            Some(sha) => {
                let matches: Vec<_> = stored
                    .versions
                    .iter()
                    .filter(|v| v.version.sha.starts_with(sha))
                    .collect();
                if matches.len() > 1 {
                    return Err(StoreError::Ambiguous {
                        sha: sha.to_string(),
                        count: matches.len(),
                    });
                }
                matches.into_iter().next()
            }
        }
        .ok_or_else(|| StoreError::not_found("version", format!("{}/{}", team, study)))?;

        Ok((stored.study.clone(), version.version.clone()))
    }

    async fn list_files(&self, version: &Version) -> Result<Vec<FileRecord>, StoreError> {
        self.studies
            .iter()
            .flat_map(|s| s.versions.iter())
            .find(|v| v.version.id == version.id)
            .map(|v| v.files.clone())
            .ok_or_else(|| StoreError::not_found("version", version.sha.clone()))
    }

    async fn fetch_content(&self, content: &ContentRef) -> Result<Vec<u8>, StoreError> {
        if self.failing.contains(&content.name) {
            return Err(StoreError::ApiError {
                status: 500,
                body: format!("failed to download {}", content.name),
            });
        }
        self.blobs
            .get(&content.url)
            .cloned()
            .ok_or_else(|| StoreError::not_found("file", content.url.clone()))
    }
}
