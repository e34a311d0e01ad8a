//! In-memory graph store.
//!
//! Nodes and edges live in id-keyed arenas; adjacency is kept as sets of edge
//! ids per node, so there are no references between stored values. All reads
//! and the atomic changeset path go through one `RwLock`. Every writer
//! (inserts, changesets, merges) also serializes on a separate writer mutex;
//! a merge holds it for its whole read-modify-write.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use crate::graph::{Edge, EdgeId, Node, NodeId};
use crate::storage::traits::{Changeset, GraphSnapshot, GraphStore, MergeGuard, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct GraphState {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<EdgeId, Edge>,
    adjacency: HashMap<NodeId, BTreeSet<EdgeId>>,
    redirects: HashMap<NodeId, NodeId>,
}

impl GraphState {
    fn link(&mut self, edge: &Edge) {
        self.adjacency.entry(edge.from.clone()).or_default().insert(edge.id.clone());
        self.adjacency.entry(edge.to.clone()).or_default().insert(edge.id.clone());
    }

    fn unlink(&mut self, edge: &Edge) {
        for endpoint in [&edge.from, &edge.to] {
            if let Some(set) = self.adjacency.get_mut(endpoint) {
                set.remove(&edge.id);
                if set.is_empty() {
                    self.adjacency.remove(endpoint);
                }
            }
        }
    }

    fn validate(&self, cs: &Changeset) -> Result<(), StorageError> {
        let removed_nodes: HashSet<&NodeId> = cs.remove_nodes.iter().collect();
        let upserted_nodes: HashSet<&NodeId> = cs.upsert_nodes.iter().map(|n| &n.id).collect();
        let removed_edges: HashSet<&EdgeId> = cs.remove_edges.iter().collect();
        let upserted_edges: HashSet<&EdgeId> = cs.upsert_edges.iter().map(|e| &e.id).collect();

        let live_after = |id: &NodeId| {
            upserted_nodes.contains(id) || (self.nodes.contains_key(id) && !removed_nodes.contains(id))
        };

        for id in &cs.remove_edges {
            if !self.edges.contains_key(id) {
                return Err(StorageError::EdgeNotFound(id.clone()));
            }
        }

        for id in &cs.remove_nodes {
            if !self.nodes.contains_key(id) {
                return Err(StorageError::NodeNotFound(id.clone()));
            }
        }

        for node in &cs.upsert_nodes {
            if node.id.is_blank() {
                return Err(StorageError::BackendError("node id cannot be blank".to_string()));
            }
            if removed_nodes.contains(&node.id) {
                return Err(StorageError::BackendError(format!(
                    "node {} is both upserted and removed",
                    node.id
                )));
            }
            if self.redirects.contains_key(&node.id) {
                return Err(StorageError::DuplicateKey(format!(
                    "{} was merged away and cannot be reused",
                    node.id
                )));
            }
        }

        for edge in &cs.upsert_edges {
            if removed_edges.contains(&edge.id) {
                return Err(StorageError::BackendError(format!(
                    "edge {} is both upserted and removed",
                    edge.id
                )));
            }
            for endpoint in [&edge.from, &edge.to] {
                if !live_after(endpoint) {
                    return Err(StorageError::DanglingEdge {
                        edge: edge.id.clone(),
                        node: endpoint.clone(),
                    });
                }
            }
        }

        // Existing edges left untouched must not lose an endpoint.
        for id in &cs.remove_nodes {
            let Some(edge_ids) = self.adjacency.get(id) else {
                continue;
            };
            if let Some(edge_id) = edge_ids
                .iter()
                .find(|e| !removed_edges.contains(e) && !upserted_edges.contains(e))
            {
                return Err(StorageError::DanglingEdge {
                    edge: edge_id.clone(),
                    node: id.clone(),
                });
            }
        }

        for (absorbed, survivor) in &cs.add_redirects {
            if absorbed == survivor {
                return Err(StorageError::BackendError(format!(
                    "redirect {absorbed} -> {survivor} is a self-cycle"
                )));
            }
            if live_after(absorbed) {
                return Err(StorageError::BackendError(format!(
                    "cannot redirect live node {absorbed}"
                )));
            }
            if !live_after(survivor) {
                return Err(StorageError::NodeNotFound(survivor.clone()));
            }
        }

        Ok(())
    }

    fn apply(&mut self, cs: Changeset) {
        for id in &cs.remove_edges {
            if let Some(edge) = self.edges.remove(id) {
                self.unlink(&edge);
            }
        }

        for node in cs.upsert_nodes {
            self.nodes.insert(node.id.clone(), node);
        }

        for edge in cs.upsert_edges {
            if let Some(previous) = self.edges.remove(&edge.id) {
                self.unlink(&previous);
            }
            self.link(&edge);
            self.edges.insert(edge.id.clone(), edge);
        }

        for id in &cs.remove_nodes {
            self.nodes.remove(id);
            self.adjacency.remove(id);
        }

        for (absorbed, survivor) in cs.add_redirects {
            self.redirects.insert(absorbed, survivor);
        }
    }
}

/// Thread-safe in-memory graph store for one project.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
    writer: Mutex<()>,
}

impl InMemoryGraphStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new node. Fails if the id is live or was merged away.
    ///
    /// Waits for any merge in progress.
    pub fn insert_node(&self, node: Node) -> Result<(), StorageError> {
        let id = node.id.clone();
        let _writer = self.writer();
        self.commit(
            Changeset {
                upsert_nodes: vec![node],
                ..Changeset::default()
            },
            "graph.insert_node",
            |state| {
                if state.nodes.contains_key(&id) {
                    return Err(StorageError::DuplicateKey(id.to_string()));
                }
                Ok(())
            },
            &mut || Ok(()),
        )
    }

    /// Inserts a new edge between live nodes.
    ///
    /// Waits for any merge in progress.
    pub fn insert_edge(&self, edge: Edge) -> Result<(), StorageError> {
        let id = edge.id.clone();
        let _writer = self.writer();
        self.commit(
            Changeset {
                upsert_edges: vec![edge],
                ..Changeset::default()
            },
            "graph.insert_edge",
            |state| {
                if state.edges.contains_key(&id) {
                    return Err(StorageError::DuplicateKey(id.to_string()));
                }
                Ok(())
            },
            &mut || Ok(()),
        )
    }

    // The writer mutex guards no data, so a poisoned lock is safe to reuse.
    fn writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn commit(
        &self,
        changeset: Changeset,
        context: &'static str,
        precheck: impl FnOnce(&GraphState) -> Result<(), StorageError>,
        before_apply: &mut dyn FnMut() -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err(context))?;
        precheck(&state)?;
        state.validate(&changeset)?;
        before_apply()?;
        state.apply(changeset);
        Ok(())
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.node_count"))?;
        Ok(state.nodes.len())
    }

    /// Number of live edges.
    pub fn edge_count(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.edge_count"))?;
        Ok(state.edges.len())
    }

    /// Get an edge by ID.
    pub fn get_edge(&self, id: &EdgeId) -> Result<Option<Edge>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.get_edge"))?;
        Ok(state.edges.get(id).cloned())
    }
}

impl GraphStore for InMemoryGraphStore {
    fn snapshot(&self) -> Result<GraphSnapshot, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.snapshot"))?;
        Ok(GraphSnapshot::new(
            state.nodes.values().cloned(),
            state.edges.values().cloned().collect(),
        ))
    }

    fn get_node(&self, id: &NodeId) -> Result<Option<Node>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.get_node"))?;
        Ok(state.nodes.get(id).cloned())
    }

    fn edges_touching(&self, id: &NodeId) -> Result<Vec<Edge>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.edges_touching"))?;
        let Some(edge_ids) = state.adjacency.get(id) else {
            return Ok(Vec::new());
        };
        Ok(edge_ids
            .iter()
            .filter_map(|edge_id| state.edges.get(edge_id).cloned())
            .collect())
    }

    fn redirect_of(&self, id: &NodeId) -> Result<Option<NodeId>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.redirect_of"))?;
        Ok(state.redirects.get(id).cloned())
    }

    fn apply_mutation(&self, changeset: Changeset) -> Result<(), StorageError> {
        if changeset.is_empty() {
            return Ok(());
        }
        let _writer = self.writer();
        self.commit(changeset, "graph.apply_mutation", |_| Ok(()), &mut || Ok(()))
    }

    fn apply_mutation_with(
        &self,
        _guard: &MergeGuard<'_>,
        changeset: Changeset,
        before_apply: &mut dyn FnMut() -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        self.commit(changeset, "graph.apply_mutation_with", |_| Ok(()), before_apply)
    }

    fn lock_for_merge(&self, timeout: Option<Duration>) -> Result<MergeGuard<'_>, StorageError> {
        let Some(timeout) = timeout else {
            return Ok(MergeGuard::new(self.writer()));
        };

        let started = Instant::now();
        loop {
            match self.writer.try_lock() {
                Ok(guard) => return Ok(MergeGuard::new(guard)),
                Err(TryLockError::Poisoned(poisoned)) => {
                    return Ok(MergeGuard::new(poisoned.into_inner()));
                }
                Err(TryLockError::WouldBlock) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(StorageError::LockTimeout {
                            waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                        });
                    }
                    thread::sleep((timeout - waited).min(Duration::from_millis(1)));
                }
            }
        }
    }
}
