//! Atomic merge of one node into another.
//!
//! A merge runs entirely under the store's project writer lock:
//! 1. check both ids, self-merge, type policy and earlier merges
//! 2. fold the source's names, provenance and properties into the target
//! 3. move the source's edges onto the target; a moved edge that duplicates
//!    an existing relationship folds its properties into the survivor, and
//!    self-loops are deleted
//! 4. hand the store one changeset that also removes the source and records
//!    the `source -> target` redirect
//! 5. the store appends the audit record inside its write critical section
//!    and applies the changeset only if the append succeeded

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::audit::{AbsorbedSnapshot, ActorKind, AuditLog, MergeHistory, MergeId, NewMergeRecord};
use crate::config::ResolutionConfig;
use crate::error::{MergeError, ValidationError};
use crate::graph::{Edge, Node, NodeId};
use crate::resolution::normalize::normalize;
use crate::storage::{Changeset, GraphStore, StorageError};

/// Successful merge result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    /// The surviving node id.
    pub resulting_id: NodeId,
    /// Id of the audit record written for this merge.
    pub merge_id: MergeId,
    /// Edges moved from the source onto the target.
    pub edges_redirected: usize,
    /// Edges deleted because they became self-loops or duplicates.
    pub edges_dropped: usize,
}

/// Applies merges against one store and audit log.
pub struct MergeExecutor<'a> {
    store: &'a dyn GraphStore,
    audit: &'a dyn AuditLog,
    config: &'a ResolutionConfig,
}

impl std::fmt::Debug for MergeExecutor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeExecutor")
            .field("config", self.config)
            .finish_non_exhaustive()
    }
}

/// Edge changes computed for one merge.
#[derive(Debug, Default)]
struct EdgePlan {
    /// Moved source edges plus target edges that gained properties.
    upserts: Vec<Edge>,
    /// Source edges deleted, as they were stored.
    dropped: Vec<Edge>,
    redirected: usize,
}

type Signature = (NodeId, NodeId, String);

fn signature_of(edge: &Edge) -> Signature {
    let (from, to, relation) = edge.signature();
    (from.clone(), to.clone(), relation.to_string())
}

/// Copies keys the survivor lacks. Returns true if anything was added.
fn fold_properties(
    into: &mut BTreeMap<String, serde_json::Value>,
    from: &BTreeMap<String, serde_json::Value>,
) -> bool {
    let mut changed = false;
    for (key, value) in from {
        if !into.contains_key(key) {
            into.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

/// Folds `source` into a copy of `target`.
///
/// Target fields win; the source's label and aliases become target aliases
/// unless they canonicalize to a name the target already has.
fn fold_into(target: &Node, source: &Node) -> Node {
    let mut merged = target.clone();

    let mut known: BTreeSet<String> = merged.names().map(normalize).collect();
    for name in source.names() {
        let canonical = normalize(name);
        if canonical.is_empty() || known.contains(&canonical) {
            continue;
        }
        merged.aliases.insert(name.to_string());
        known.insert(canonical);
    }

    merged.source_ids.extend(source.source_ids.iter().cloned());
    fold_properties(&mut merged.properties, &source.properties);

    merged.touch();
    merged
}

/// Rewrites every edge of `source` to point at `target`.
///
/// An edge whose rewritten `(from, to, relation)` already exists is deleted
/// after its properties are folded into the surviving edge (survivor keys
/// win). Edges are visited in id order so the survivor of a duplicate group
/// is deterministic.
fn redirect_edges(
    source: &NodeId,
    target: &NodeId,
    mut source_edges: Vec<Edge>,
    target_edges: &[Edge],
) -> EdgePlan {
    source_edges.sort_by(|a, b| a.id.cmp(&b.id));

    // (edge, needs upsert)
    let mut survivors: Vec<(Edge, bool)> = Vec::new();
    let mut by_signature: HashMap<Signature, usize> = HashMap::new();
    for edge in target_edges.iter().filter(|e| !e.touches(source)) {
        by_signature.entry(signature_of(edge)).or_insert_with(|| {
            survivors.push((edge.clone(), false));
            survivors.len() - 1
        });
    }

    let mut plan = EdgePlan::default();
    for edge in source_edges {
        let mut moved = edge.clone();
        if moved.from == *source {
            moved.from = target.clone();
        }
        if moved.to == *source {
            moved.to = target.clone();
        }

        if moved.is_self_loop() {
            plan.dropped.push(edge);
            continue;
        }

        let signature = signature_of(&moved);
        if let Some(&idx) = by_signature.get(&signature) {
            let (survivor, dirty) = &mut survivors[idx];
            if fold_properties(&mut survivor.properties, &edge.properties) {
                *dirty = true;
            }
            plan.dropped.push(edge);
        } else {
            by_signature.insert(signature, survivors.len());
            survivors.push((moved, true));
            plan.redirected += 1;
        }
    }

    plan.upserts = survivors
        .into_iter()
        .filter_map(|(edge, dirty)| dirty.then_some(edge))
        .collect();
    plan
}

/// Store rejections at apply time mean the graph moved under the merge.
fn stale_or_internal(err: StorageError) -> MergeError {
    if matches!(
        err,
        StorageError::NodeNotFound(_)
            | StorageError::EdgeNotFound(_)
            | StorageError::DuplicateKey(_)
            | StorageError::DanglingEdge { .. }
    ) {
        return MergeError::Concurrency {
            message: format!("graph changed during merge: {err}"),
        };
    }
    err.into()
}

impl<'a> MergeExecutor<'a> {
    /// Creates an executor. The config is assumed to be validated.
    #[must_use]
    pub fn new(store: &'a dyn GraphStore, audit: &'a dyn AuditLog, config: &'a ResolutionConfig) -> Self {
        Self { store, audit, config }
    }

    /// Merges `source` into `target` on behalf of `actor`.
    ///
    /// Either every effect is visible afterwards (target updated, source gone
    /// and redirected, edges moved, one audit record) or none is, and no
    /// reader ever observes the graph in between.
    pub fn merge(
        &self,
        source: &NodeId,
        target: &NodeId,
        actor: &str,
        actor_kind: ActorKind,
    ) -> Result<MergeOutcome, MergeError> {
        match self.merge_locked(source, target, actor, actor_kind) {
            Ok(outcome) => {
                info!(
                    merge_id = %outcome.merge_id,
                    source = %source,
                    target = %target,
                    actor = actor,
                    actor_kind = %actor_kind,
                    edges_redirected = outcome.edges_redirected,
                    edges_dropped = outcome.edges_dropped,
                    "merge committed"
                );
                Ok(outcome)
            }
            Err(err) => {
                warn!(
                    source = %source,
                    target = %target,
                    kind = ?err.kind(),
                    error = %err,
                    "merge rejected"
                );
                Err(err)
            }
        }
    }

    fn merge_locked(
        &self,
        source: &NodeId,
        target: &NodeId,
        actor: &str,
        actor_kind: ActorKind,
    ) -> Result<MergeOutcome, MergeError> {
        if actor.trim().is_empty() {
            return Err(ValidationError::EmptyActor.into());
        }
        if source.is_blank() || target.is_blank() {
            return Err(ValidationError::EmptyNodeId.into());
        }

        let guard = self.store.lock_for_merge(self.config.lock_timeout())?;

        let source_node = self.live_node(source)?;
        let target_node = self.live_node(target)?;

        if source == target {
            return Err(MergeError::SelfMergeNotAllowed { id: source.clone() });
        }
        if self.config.strict_type_match && source_node.entity_type != target_node.entity_type {
            return Err(MergeError::TypeMismatch {
                source_type: source_node.entity_type,
                target_type: target_node.entity_type,
            });
        }

        let source_edges = self.store.edges_touching(source)?;
        let target_edges = self.store.edges_touching(target)?;
        let edges = redirect_edges(source, target, source_edges, &target_edges);
        let (edges_redirected, edges_dropped) = (edges.redirected, edges.dropped.len());

        let changeset = Changeset {
            upsert_nodes: vec![fold_into(&target_node, &source_node)],
            remove_nodes: vec![source.clone()],
            upsert_edges: edges.upserts,
            remove_edges: edges.dropped.iter().map(|e| e.id.clone()).collect(),
            add_redirects: vec![(source.clone(), target.clone())],
        };

        let mut pending = Some(NewMergeRecord {
            actor: actor.to_string(),
            actor_kind,
            source_id: source.clone(),
            target_id: target.clone(),
            absorbed_snapshot: AbsorbedSnapshot::from(&source_node).with_dropped_edges(edges.dropped),
            edges_redirected,
            edges_dropped,
        });
        let mut recorded: Option<MergeHistory> = None;
        let mut audit_failure: Option<StorageError> = None;

        let applied = self.store.apply_mutation_with(&guard, changeset, &mut || {
            let Some(record) = pending.take() else {
                return Err(StorageError::BackendError(
                    "audit append requested twice for one merge".to_string(),
                ));
            };
            match self.audit.append(record) {
                Ok(history) => {
                    recorded = Some(history);
                    Ok(())
                }
                Err(err) => {
                    let message = format!("audit append failed: {err}");
                    audit_failure = Some(err);
                    Err(StorageError::BackendError(message))
                }
            }
        });

        if let Some(err) = audit_failure {
            error!(
                source = %source,
                target = %target,
                error = %err,
                "audit append failed, merge not applied"
            );
            return Err(MergeError::internal(format!("audit append failed: {err}")));
        }
        applied.map_err(stale_or_internal)?;

        let history = recorded
            .ok_or_else(|| MergeError::internal("store applied a merge without recording it"))?;

        Ok(MergeOutcome {
            resulting_id: target.clone(),
            merge_id: history.merge_id,
            edges_redirected,
            edges_dropped,
        })
    }

    /// Loads a live node, distinguishing absorbed ids from unknown ones.
    fn live_node(&self, id: &NodeId) -> Result<Node, MergeError> {
        if let Some(node) = self.store.get_node(id)? {
            return Ok(node);
        }
        match self.store.resolve_id(id)? {
            Some(into) => Err(MergeError::AlreadyMerged { id: id.clone(), into }),
            None => Err(MergeError::NotFound { id: id.clone() }),
        }
    }
}
