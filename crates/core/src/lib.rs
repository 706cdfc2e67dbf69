//! kyso core library.
//!
//! This crate provides the building blocks of the kyso command line client:
//! configuration, the remote data service client, content addressing,
//! materialization of study versions on disk, and the pull / detect / merge
//! workflow that reconciles a local study with a remote version.

pub mod address;
pub mod config;
pub mod errors;
pub mod materialize;
pub mod merge;
pub mod models;
pub mod project;
pub mod reference;
pub mod remote;

// Re-exports for convenience.
pub use config::KysoConfig;
pub use errors::CoreError;
pub use reference::MergeReference;
pub use remote::{MemoryStore, ParseClient, RemoteStore};
