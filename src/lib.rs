//! # KyroQL Resolve - entity resolution for knowledge graphs
//!
//! Detects and merges duplicate entities in a graph assembled from many
//! independently extracted sources.
//!
//! ## Core Concepts
//!
//! - **Normalization**: labels and aliases are reduced to a canonical form
//!   (NFKC, case folding, diacritics and punctuation removed)
//! - **Blocking**: padded character n-grams group nodes into buckets, so only
//!   nodes sharing a gram are ever compared
//! - **Scoring**: Jaro-Winkler, best cross-name edit similarity and name-set
//!   Jaccard overlap, combined by configured weights with a type rule
//! - **Merging**: an atomic, audited fold of one node into another that
//!   redirects edges and leaves a redirect marker behind
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use kyroql_resolve::{EntityType, Node, ResolutionConfig, ResolutionEngine};
//! use kyroql_resolve::audit::InMemoryAuditLog;
//! use kyroql_resolve::storage::InMemoryGraphStore;
//!
//! let store = Arc::new(InMemoryGraphStore::new());
//! store.insert_node(
//!     Node::new("1", "Sidney Gottlieb", EntityType::Person)
//!         .with_alias("Dr. Gottlieb")
//!         .with_source("src-a"),
//! )?;
//! store.insert_node(
//!     Node::new("2", "Sidney  Gottlieb.", EntityType::Person)
//!         .with_alias("S. Gottlieb")
//!         .with_source("src-b"),
//! )?;
//!
//! let engine = ResolutionEngine::new(
//!     store.clone(),
//!     Arc::new(InMemoryAuditLog::new()),
//!     ResolutionConfig::default(),
//! )?;
//!
//! let candidates = engine.find_candidates(0.7)?;
//! let top = &candidates[0];
//! engine.execute_merge(top.right.clone(), top.left.clone(), "reviewer")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod resolution;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use audit::{ActorKind, AuditLog, InMemoryAuditLog, MergeHistory, MergeId};
pub use config::{ResolutionConfig, ScanConfig, SimilarityWeights};
pub use engine::ResolutionEngine;
pub use error::{ErrorKind, MergeError, ResolveError, ResolveResult, ValidationError};
pub use graph::{Edge, EdgeId, EntityType, Node, NodeId};
pub use resolution::{
    CancellationToken, MergeOutcome, ResolutionCandidate, ScanReport, ScoreBreakdown,
};
pub use storage::{GraphStore, InMemoryGraphStore, StorageError};

#[cfg(feature = "persistent")]
pub use audit::FileAuditLog;
