//! Access to the remote data service.
//!
//! The merge workflow only needs three capabilities from the backend:
//! resolve a version, list its files, and fetch file bytes. Anything that
//! implements [`RemoteStore`] can back the client; [`ParseClient`] talks to
//! the hosted Parse Server and [`MemoryStore`] serves fixtures in tests.

pub mod memory;
pub mod parse;

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::models::{ContentRef, FileRecord, Study, Version};

pub use memory::MemoryStore;
pub use parse::ParseClient;

/// Read-only capability interface over the remote object store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Resolve `team/study` and a version. `version_sha` may be a prefix;
    /// `None` selects the most recent version.
    async fn resolve_version(
        &self,
        team: &str,
        study: &str,
        version_sha: Option<&str>,
    ) -> Result<(Study, Version), StoreError>;

    /// The ordered file manifest of a version.
    async fn list_files(&self, version: &Version) -> Result<Vec<FileRecord>, StoreError>;

    /// Download the bytes behind a content reference.
    async fn fetch_content(&self, content: &ContentRef) -> Result<Vec<u8>, StoreError>;
}
