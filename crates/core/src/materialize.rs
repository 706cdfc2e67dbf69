//! Writing a version's files to disk.
//!
//! Every file of a version is written by its own task in a
//! [`tokio::task::JoinSet`]; the first failing task aborts the rest and its
//! error is returned unchanged.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::errors::MaterializeError;
use crate::models::{is_safe_relative, ContentRef, FileRecord, Study, Version, STUDY_JSON};
use crate::remote::RemoteStore;

/// Options for [`materialize`].
#[derive(Debug, Clone)]
pub struct MaterializeOptions {
    /// Directory name to use instead of the study name.
    pub target: Option<String>,
    /// Fail when the study directory already exists. When `false` an
    /// existing directory turns the call into a no-op.
    pub throw_if_exists: bool,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self {
            target: None,
            throw_if_exists: true,
        }
    }
}

/// What [`materialize`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaterializeOutcome {
    /// The study directory was created and `files` files were written.
    Written { dir: PathBuf, files: usize },
    /// The directory already existed and `throw_if_exists` was off.
    Skipped { dir: PathBuf },
}

impl MaterializeOutcome {
    pub fn dir(&self) -> &Path {
        match self {
            Self::Written { dir, .. } | Self::Skipped { dir } => dir,
        }
    }
}

enum Source {
    Empty,
    Inline(String),
    Remote(ContentRef),
}

struct WriteJob {
    name: String,
    dest: PathBuf,
    source: Source,
}

/// Write `files` of `version` into `target_dir/<study name>`.
pub async fn materialize(
    store: Arc<dyn RemoteStore>,
    study: &Study,
    version: &Version,
    files: &[FileRecord],
    target_dir: &Path,
    options: &MaterializeOptions,
) -> Result<MaterializeOutcome, MaterializeError> {
    let dir_name = options.target.as_deref().unwrap_or(&study.name);
    let study_dir = target_dir.join(dir_name);

    match tokio::fs::metadata(&study_dir).await {
        Ok(_) if options.throw_if_exists => {
            return Err(MaterializeError::AlreadyExists(dir_name.to_string()));
        }
        Ok(_) => {
            debug!(dir = %study_dir.display(), "study directory exists, skipping");
            return Ok(MaterializeOutcome::Skipped { dir: study_dir });
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(MaterializeError::io(&study_dir, e)),
    }

    // Resolve every destination before touching the disk so that a bad
    // manifest writes nothing.
    let jobs = plan(version, files, &study_dir)?;

    tokio::fs::create_dir_all(&study_dir)
        .await
        .map_err(|e| MaterializeError::io(&study_dir, e))?;

    info!(
        dir = %study_dir.display(),
        version = %version.sha,
        files = jobs.len(),
        "materializing version"
    );

    let count = jobs.len();
    let mut tasks = JoinSet::new();
    for job in jobs {
        let store = Arc::clone(&store);
        tasks.spawn(write_file(store, job));
    }

    while let Some(joined) = tasks.join_next().await {
        let result = joined.map_err(|e| MaterializeError::TaskFailed(e.to_string()));
        if let Err(e) = result.and_then(|r| r) {
            tasks.abort_all();
            return Err(e);
        }
    }

    Ok(MaterializeOutcome::Written {
        dir: study_dir,
        files: count,
    })
}

fn plan(
    version: &Version,
    files: &[FileRecord],
    study_dir: &Path,
) -> Result<Vec<WriteJob>, MaterializeError> {
    files
        .iter()
        .map(|file| {
            let rel = version
                .path_for(file)
                .ok_or_else(|| MaterializeError::MissingMapping(file.name.clone()))?;
            if !is_safe_relative(rel) {
                return Err(MaterializeError::UnsafePath(rel.to_string()));
            }

            let source = match file.content {
                None => Source::Empty,
                Some(_) if file.name == STUDY_JSON => Source::Inline(
                    version
                        .pkg
                        .to_pretty_json()
                        .map_err(|e| MaterializeError::io(rel, std::io::Error::other(e)))?,
                ),
                Some(ref content) => Source::Remote(content.clone()),
            };

            Ok(WriteJob {
                name: file.name.clone(),
                dest: study_dir.join(rel),
                source,
            })
        })
        .collect()
}

async fn write_file(store: Arc<dyn RemoteStore>, job: WriteJob) -> Result<(), MaterializeError> {
    if let Some(parent) = job.dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| MaterializeError::io(parent, e))?;
    }

    let bytes = match job.source {
        Source::Empty => Vec::new(),
        Source::Inline(text) => text.into_bytes(),
        Source::Remote(content) => {
            debug!(name = %job.name, dest = %job.dest.display(), "downloading");
            store
                .fetch_content(&content)
                .await
                .map_err(|source| MaterializeError::Download {
                    name: job.name.clone(),
                    source,
                })?
        }
    };

    tokio::fs::write(&job.dest, bytes)
        .await
        .map_err(|e| MaterializeError::io(&job.dest, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StudyPkg;
    use crate::remote::MemoryStore;

    fn pkg() -> StudyPkg {
        StudyPkg {
            name: "iris".into(),
            author: Some("ada".into()),
            ..Default::default()
        }
    }

    async fn fixture(store: MemoryStore) -> (Arc<dyn RemoteStore>, Study, Version, Vec<FileRecord>) {
        let store: Arc<dyn RemoteStore> = Arc::new(store);
        let (study, version) = store.resolve_version("acme", "iris", None).await.unwrap();
        let files = store.list_files(&version).await.unwrap();
        (store, study, version, files)
    }

    fn seeded() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.add_text_version(
            "acme",
            "iris",
            "abcdef123456",
            pkg(),
            &[
                ("README.md", "# Iris\n"),
                ("data/empty.csv", ""),
                ("notebooks/analysis.ipynb", "{\"cells\": []}"),
            ],
        );
        store
    }

    #[tokio::test]
    async fn test_writes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let (store, study, version, files) = fixture(seeded()).await;

        let outcome = materialize(store, &study, &version, &files, dir.path(), &Default::default())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            MaterializeOutcome::Written {
                dir: dir.path().join("iris"),
                files: 4
            }
        );

        let root = dir.path().join("iris");
        assert_eq!(std::fs::read_to_string(root.join("README.md")).unwrap(), "# Iris\n");
        assert_eq!(std::fs::read(root.join("data/empty.csv")).unwrap(), b"");
        assert!(root.join("notebooks/analysis.ipynb").is_file());
        let study_json = std::fs::read_to_string(root.join("study.json")).unwrap();
        assert_eq!(study_json, pkg().to_pretty_json().unwrap());
    }

    #[tokio::test]
    async fn test_strict_mode_fails_on_existing_dir_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("iris")).unwrap();
        let (store, study, version, files) = fixture(seeded()).await;

        let err = materialize(store, &study, &version, &files, dir.path(), &Default::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MaterializeError::AlreadyExists(ref n) if n == "iris"));
        assert!(err.is_user_error());
        assert_eq!(std::fs::read_dir(dir.path().join("iris")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_skip_mode_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (store, study, version, files) = fixture(seeded()).await;
        let options = MaterializeOptions {
            target: None,
            throw_if_exists: false,
        };

        materialize(Arc::clone(&store), &study, &version, &files, dir.path(), &options)
            .await
            .unwrap();
        let readme = dir.path().join("iris/README.md");
        std::fs::write(&readme, "local edit\n").unwrap();

        let second = materialize(store, &study, &version, &files, dir.path(), &options)
            .await
            .unwrap();
        assert_eq!(
            second,
            MaterializeOutcome::Skipped {
                dir: dir.path().join("iris")
            }
        );
        assert_eq!(std::fs::read_to_string(readme).unwrap(), "local edit\n");
    }

    #[tokio::test]
    async fn test_target_overrides_directory_name() {
        let dir = tempfile::tempdir().unwrap();
        let (store, study, version, files) = fixture(seeded()).await;
        let options = MaterializeOptions {
            target: Some("merge".into()),
            throw_if_exists: true,
        };

        let outcome = materialize(store, &study, &version, &files, dir.path(), &options)
            .await
            .unwrap();
        assert_eq!(outcome.dir(), dir.path().join("merge"));
        assert!(dir.path().join("merge/README.md").is_file());
    }

    #[tokio::test]
    async fn test_download_failure_fails_whole_operation() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = seeded();
        store.fail_fetch("README.md");
        let (store, study, version, files) = fixture(store).await;

        let err = materialize(store, &study, &version, &files, dir.path(), &Default::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MaterializeError::Download { ref name, .. } if name == "README.md"));
    }

    #[tokio::test]
    async fn test_unsafe_path_is_rejected_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let (store, study, mut version, files) = fixture(seeded()).await;
        let readme = files.iter().find(|f| f.name == "README.md").unwrap();
        version
            .file_map
            .insert(readme.address_key(), "../escaped.md".into());

        let err = materialize(store, &study, &version, &files, dir.path(), &Default::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MaterializeError::UnsafePath(_)));
        assert!(!dir.path().join("iris").exists());
        assert!(!dir.path().join("escaped.md").exists());
    }
}
