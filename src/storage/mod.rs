//! Graph storage for entity resolution.
//!
//! The [`GraphStore`] trait is the contract the engine consumes; the
//! in-memory backend is the reference implementation used embedded and in
//! tests.

mod cache;
mod memory;
mod traits;

pub use cache::ProjectCache;
pub use memory::InMemoryGraphStore;
pub use traits::{Changeset, GraphSnapshot, GraphStore, MergeGuard, StorageError};
