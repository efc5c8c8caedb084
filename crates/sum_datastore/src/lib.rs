//! # DataStore Module
//!
//! Persistence for finished summarization runs. A run is stored as a
//! [`CachedRun`] record keyed by a hash of its input documents and run
//! configuration, so an identical request can be answered without another
//! round of LLM calls.
//!
//! Two backends are provided: [`MemoryStore`] for a single process and
//! [`FsStore`], which keeps one JSON file per record in a directory.

mod datastore;
mod domain;

pub use datastore::fs::FsStore;
pub use datastore::memory::MemoryStore;
pub use datastore::{ResultStore, StaleRemoval};
pub use domain::CachedRun;
