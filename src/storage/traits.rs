//! Abstract graph store contract.
//!
//! The resolution engine never owns graph storage. It reads a consistent
//! snapshot for scanning, and for merging it takes the store's per-project
//! writer lock, reads the affected nodes and edges, and submits one
//! [`Changeset`] that the store must apply atomically together with the
//! audit append.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::graph::{Edge, EdgeId, Node, NodeId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Node not found.
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Edge not found.
    #[error("Edge not found: {0}")]
    EdgeNotFound(EdgeId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// A mutation would leave an edge pointing at a missing node.
    #[error("Edge {edge} would reference missing node {node}")]
    DanglingEdge {
        /// The offending edge.
        edge: EdgeId,
        /// The endpoint that would be missing.
        node: NodeId,
    },

    /// The project writer lock could not be acquired in time.
    #[error("Timed out after {waited_ms}ms waiting for the project writer lock")]
    LockTimeout {
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O failure in a file-backed component.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Maps the error onto the crate-wide taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NodeNotFound(_) | Self::EdgeNotFound(_) => ErrorKind::NotFound,
            Self::DuplicateKey(_) | Self::DanglingEdge { .. } => ErrorKind::Conflict,
            Self::LockTimeout { .. } => ErrorKind::Concurrency,
            Self::BackendError(_) | Self::SerializationError(_) | Self::Io(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// A consistent, read-only copy of the live graph.
///
/// Nodes are ordered by id so that everything computed from a snapshot is
/// reproducible across runs.
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    nodes: BTreeMap<NodeId, Node>,
    edges: Vec<Edge>,
    taken_at: DateTime<Utc>,
}

impl GraphSnapshot {
    /// Builds a snapshot from owned parts.
    #[must_use]
    pub fn new(nodes: impl IntoIterator<Item = Node>, edges: Vec<Edge>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
            edges,
            taken_at: Utc::now(),
        }
    }

    /// Iterates live nodes in ascending id order.
    pub fn iterate_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Looks up one node.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// All edges in the snapshot.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Number of live nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// When the snapshot was taken.
    #[must_use]
    pub const fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }
}

/// A set of graph changes applied all-or-nothing.
///
/// The store validates the whole changeset against the post-change state
/// before touching anything, so the order of entries within each list does
/// not matter. A node id may not be both upserted and removed, and neither
/// may an edge id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    /// Nodes to insert or replace.
    pub upsert_nodes: Vec<Node>,
    /// Nodes to remove from the live set.
    pub remove_nodes: Vec<NodeId>,
    /// Edges to insert or replace (matched by edge id).
    pub upsert_edges: Vec<Edge>,
    /// Edges to delete.
    pub remove_edges: Vec<EdgeId>,
    /// Redirect markers `absorbed -> survivor` to record.
    pub add_redirects: Vec<(NodeId, NodeId)>,
}

impl Changeset {
    /// Returns true if applying the changeset would change nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upsert_nodes.is_empty()
            && self.remove_nodes.is_empty()
            && self.upsert_edges.is_empty()
            && self.remove_edges.is_empty()
            && self.add_redirects.is_empty()
    }
}

trait HeldLock {}

impl<T> HeldLock for T {}

/// Proof that the caller holds the project's single-writer lock.
///
/// Wraps whatever guard the backend's lock hands out; released on drop.
#[must_use = "the writer lock is released as soon as the guard is dropped"]
pub struct MergeGuard<'a> {
    _held: Box<dyn HeldLock + 'a>,
}

impl<'a> MergeGuard<'a> {
    /// Wraps a held lock guard of any kind.
    pub fn new<G: 'a>(guard: G) -> Self {
        Self {
            _held: Box::new(guard),
        }
    }
}

impl std::fmt::Debug for MergeGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MergeGuard")
    }
}

/// Storage trait for one project's graph.
///
/// # Safety Considerations
/// - `apply_mutation` and `apply_mutation_with` must be atomic: readers see
///   the graph either entirely before or entirely after a changeset
/// - Every mutating entry point serializes on the same writer lock that
///   [`GraphStore::lock_for_merge`] hands out
/// - Implementations must handle concurrent access safely
pub trait GraphStore: Send + Sync {
    /// Takes a consistent snapshot of all live nodes and edges.
    fn snapshot(&self) -> Result<GraphSnapshot, StorageError>;

    /// Get a live node by ID.
    fn get_node(&self, id: &NodeId) -> Result<Option<Node>, StorageError>;

    /// Every live edge with `id` as either endpoint, ordered by edge id.
    fn edges_touching(&self, id: &NodeId) -> Result<Vec<Edge>, StorageError>;

    /// The survivor an absorbed id was redirected to, if any (one hop).
    fn redirect_of(&self, id: &NodeId) -> Result<Option<NodeId>, StorageError>;

    /// Applies a changeset atomically, taking the writer lock itself.
    fn apply_mutation(&self, changeset: Changeset) -> Result<(), StorageError>;

    /// Applies a changeset on behalf of a caller that already holds the
    /// writer lock.
    ///
    /// The store validates the changeset, then runs `before_apply` while no
    /// reader can observe the graph, and applies the changeset only if the
    /// hook succeeds. A hook error is returned unchanged and the graph is
    /// left as it was.
    fn apply_mutation_with(
        &self,
        guard: &MergeGuard<'_>,
        changeset: Changeset,
        before_apply: &mut dyn FnMut() -> Result<(), StorageError>,
    ) -> Result<(), StorageError>;

    /// Acquires the project's single-writer lock, waiting at most `timeout`
    /// (forever when `None`).
    fn lock_for_merge(&self, timeout: Option<Duration>) -> Result<MergeGuard<'_>, StorageError>;

    /// Follows redirect markers from `id` to the live node it now denotes.
    ///
    /// Returns `Ok(None)` if `id` is neither live nor redirected.
    fn resolve_id(&self, id: &NodeId) -> Result<Option<NodeId>, StorageError> {
        const MAX_HOPS: usize = 128;

        let mut current = id.clone();
        for _ in 0..MAX_HOPS {
            if self.get_node(&current)?.is_some() {
                return Ok(Some(current));
            }
            match self.redirect_of(&current)? {
                Some(next) if next == current => {
                    return Err(StorageError::BackendError(
                        "redirect map contains a self-cycle".to_string(),
                    ));
                }
                Some(next) => current = next,
                None => return Ok(None),
            }
        }

        Err(StorageError::BackendError(
            "redirect resolution exceeded hop limit".to_string(),
        ))
    }
}
