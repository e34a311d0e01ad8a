//! Append-only merge audit log.
//!
//! Every committed merge produces exactly one [`MergeHistory`] record. Records
//! are never updated or deleted. Each record carries a blake3 hash over its
//! predecessor's hash and its own content, so a log can be checked for
//! tampering or truncation in the middle with [`AuditLog::verify_chain`].

#[cfg(feature = "persistent")]
mod codec;
#[cfg(feature = "persistent")]
mod file_lock;
#[cfg(feature = "persistent")]
mod persistent;

#[cfg(feature = "persistent")]
pub use persistent::FileAuditLog;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph::{Edge, EntityType, Node, NodeId};
use crate::storage::StorageError;

/// `prev_hash` of the first record in a log.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Unique identifier of one merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergeId(Uuid);

impl MergeId {
    /// Creates a new random merge id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MergeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MergeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MergeId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Who requested a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    /// A person approved the merge.
    #[default]
    Human,
    /// A pipeline or policy merged automatically.
    Automated,
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Human => f.write_str("human"),
            Self::Automated => f.write_str("automated"),
        }
    }
}

/// Content of the absorbed node at the moment it was merged away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbsorbedSnapshot {
    /// Label of the absorbed node.
    pub label: String,
    /// Type of the absorbed node.
    pub entity_type: EntityType,
    /// Aliases of the absorbed node.
    pub aliases: BTreeSet<String>,
    /// Provenance of the absorbed node.
    pub source_ids: BTreeSet<String>,
    /// Properties of the absorbed node.
    pub properties: BTreeMap<String, serde_json::Value>,
    /// Edges the merge deleted, exactly as they were stored.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped_edges: Vec<Edge>,
}

impl AbsorbedSnapshot {
    /// Attaches the edges deleted by the merge.
    #[must_use]
    pub fn with_dropped_edges(mut self, edges: Vec<Edge>) -> Self {
        self.dropped_edges = edges;
        self
    }
}

impl From<&Node> for AbsorbedSnapshot {
    fn from(node: &Node) -> Self {
        Self {
            label: node.label.clone(),
            entity_type: node.entity_type.clone(),
            aliases: node.aliases.clone(),
            source_ids: node.source_ids.clone(),
            properties: node.properties.clone(),
            dropped_edges: Vec::new(),
        }
    }
}

/// A merge about to be recorded; the log assigns id, sequence and hashes.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMergeRecord {
    /// Who requested the merge.
    pub actor: String,
    /// Human or automated.
    pub actor_kind: ActorKind,
    /// The absorbed node.
    pub source_id: NodeId,
    /// The surviving node.
    pub target_id: NodeId,
    /// What the absorbed node looked like.
    pub absorbed_snapshot: AbsorbedSnapshot,
    /// Edges moved from source to target.
    pub edges_redirected: usize,
    /// Edges deleted as self-loops or duplicates.
    pub edges_dropped: usize,
}

/// One committed merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeHistory {
    /// Unique merge id.
    pub merge_id: MergeId,
    /// Position in the log, starting at 1.
    pub sequence: u64,
    /// When the merge was recorded.
    pub timestamp: DateTime<Utc>,
    /// Who requested the merge.
    pub actor: String,
    /// Human or automated.
    pub actor_kind: ActorKind,
    /// The absorbed node.
    pub source_id: NodeId,
    /// The surviving node.
    pub target_id: NodeId,
    /// What the absorbed node looked like.
    pub absorbed_snapshot: AbsorbedSnapshot,
    /// Edges moved from source to target.
    pub edges_redirected: usize,
    /// Edges deleted as self-loops or duplicates.
    pub edges_dropped: usize,
    /// Hash of the previous record, or [`GENESIS_HASH`].
    pub prev_hash: String,
    /// Hash of this record chained onto `prev_hash`.
    pub record_hash: String,
}

impl MergeHistory {
    /// Turns a pending record into a sealed, hashed one.
    pub fn seal(
        record: NewMergeRecord,
        sequence: u64,
        prev_hash: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let mut sealed = Self {
            merge_id: MergeId::new(),
            sequence,
            timestamp: Utc::now(),
            actor: record.actor,
            actor_kind: record.actor_kind,
            source_id: record.source_id,
            target_id: record.target_id,
            absorbed_snapshot: record.absorbed_snapshot,
            edges_redirected: record.edges_redirected,
            edges_dropped: record.edges_dropped,
            prev_hash: prev_hash.into(),
            record_hash: String::new(),
        };
        sealed.record_hash = sealed.compute_hash()?;
        Ok(sealed)
    }

    /// Recomputes the hash from the record's content.
    pub fn compute_hash(&self) -> Result<String, StorageError> {
        let mut unsealed = self.clone();
        unsealed.record_hash.clear();
        let body = serde_json::to_vec(&unsealed)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(&body);
        Ok(hasher.finalize().to_hex().to_string())
    }

    /// True if `id` was the source or the target of this merge.
    #[must_use]
    pub fn touches(&self, id: &NodeId) -> bool {
        self.source_id == *id || self.target_id == *id
    }
}

/// Checks sequence numbers and the hash chain of records in log order.
pub fn verify_records(records: &[MergeHistory]) -> Result<(), StorageError> {
    let mut prev = GENESIS_HASH.to_string();
    for (idx, record) in records.iter().enumerate() {
        let expected_sequence = idx as u64 + 1;
        if record.sequence != expected_sequence {
            return Err(StorageError::BackendError(format!(
                "audit log sequence gap: expected {expected_sequence}, found {}",
                record.sequence
            )));
        }
        if record.prev_hash != prev {
            return Err(StorageError::BackendError(format!(
                "audit chain broken at sequence {}",
                record.sequence
            )));
        }
        if record.compute_hash()? != record.record_hash {
            return Err(StorageError::BackendError(format!(
                "audit record {} was modified",
                record.sequence
            )));
        }
        prev.clone_from(&record.record_hash);
    }
    Ok(())
}

/// Records in the merge lineage of `id`, most recent first.
///
/// The lineage has two halves:
/// - forward: the merge that absorbed `id`, the merge that absorbed that
///   survivor, and so on
/// - backward: every merge whose survivor was `id`, and recursively the
///   merges whose survivors were the nodes `id` absorbed
///
/// Siblings absorbed by a later survivor are not part of `id`'s lineage.
#[must_use]
pub fn lineage(records: &[MergeHistory], id: &NodeId) -> Vec<MergeHistory> {
    let mut picked: BTreeSet<usize> = BTreeSet::new();

    let mut current = id;
    let mut visited: BTreeSet<&NodeId> = BTreeSet::new();
    while visited.insert(current) {
        let Some((idx, record)) = records
            .iter()
            .enumerate()
            .find(|(_, r)| r.source_id == *current)
        else {
            break;
        };
        picked.insert(idx);
        current = &record.target_id;
    }

    let mut absorbed: BTreeSet<&NodeId> = BTreeSet::new();
    absorbed.insert(id);
    loop {
        let before = absorbed.len();
        for (idx, record) in records.iter().enumerate() {
            if absorbed.contains(&record.target_id) && !absorbed.contains(&record.source_id) {
                picked.insert(idx);
                absorbed.insert(&record.source_id);
            }
        }
        if absorbed.len() == before {
            break;
        }
    }

    let mut out: Vec<MergeHistory> = picked.into_iter().map(|idx| records[idx].clone()).collect();
    out.sort_by(|a, b| b.sequence.cmp(&a.sequence));
    out
}

/// Append-only store of merge records.
///
/// `append` must be durable before it returns `Ok`. The merge executor calls
/// it while the store holds its write lock and applies the graph change only
/// after it succeeds.
pub trait AuditLog: Send + Sync {
    /// Seals and appends one record, returning it as stored.
    fn append(&self, record: NewMergeRecord) -> Result<MergeHistory, StorageError>;

    /// Every record in log order (oldest first).
    fn all(&self) -> Result<Vec<MergeHistory>, StorageError>;

    /// Number of records.
    fn len(&self) -> Result<usize, StorageError>;

    /// True if no merge was ever recorded.
    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    /// Records naming `id` as source or target, most recent first.
    fn records_touching(&self, id: &NodeId) -> Result<Vec<MergeHistory>, StorageError> {
        let mut out: Vec<_> = self.all()?.into_iter().filter(|r| r.touches(id)).collect();
        out.reverse();
        Ok(out)
    }

    /// Records of `id` and its merge lineage, most recent first.
    fn history_for(&self, id: &NodeId) -> Result<Vec<MergeHistory>, StorageError> {
        Ok(lineage(&self.all()?, id))
    }

    /// Verifies the hash chain of the whole log.
    fn verify_chain(&self) -> Result<(), StorageError> {
        verify_records(&self.all()?)
    }
}

/// In-memory audit log.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    records: RwLock<Vec<MergeHistory>>,
}

impl InMemoryAuditLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

impl AuditLog for InMemoryAuditLog {
    fn append(&self, record: NewMergeRecord) -> Result<MergeHistory, StorageError> {
        let mut records = self.records.write().map_err(|_| lock_err("audit.append"))?;
        let prev_hash = records
            .last()
            .map_or_else(|| GENESIS_HASH.to_string(), |r| r.record_hash.clone());
        let sealed = MergeHistory::seal(record, records.len() as u64 + 1, prev_hash)?;
        records.push(sealed.clone());
        Ok(sealed)
    }

    fn all(&self) -> Result<Vec<MergeHistory>, StorageError> {
        let records = self.records.read().map_err(|_| lock_err("audit.all"))?;
        Ok(records.clone())
    }

    fn len(&self) -> Result<usize, StorageError> {
        let records = self.records.read().map_err(|_| lock_err("audit.len"))?;
        Ok(records.len())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn record(source: &str, target: &str) -> NewMergeRecord {
        NewMergeRecord {
            actor: "analyst@example.org".to_string(),
            actor_kind: ActorKind::Human,
            source_id: NodeId::from(source),
            target_id: NodeId::from(target),
            absorbed_snapshot: AbsorbedSnapshot::from(&Node::new(
                source,
                format!("label {source}"),
                EntityType::Person,
            )),
            edges_redirected: 0,
            edges_dropped: 0,
        }
    }

    #[test]
    fn append_chains_records() {
        let log = InMemoryAuditLog::new();
        assert!(log.is_empty().unwrap());

        let first = log.append(record("2", "1")).unwrap();
        let second = log.append(record("3", "1")).unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(first.prev_hash, GENESIS_HASH);
        assert_eq!(second.prev_hash, first.record_hash);
        assert_ne!(first.merge_id, second.merge_id);
        assert_eq!(log.len().unwrap(), 2);
        log.verify_chain().unwrap();
    }

    #[test]
    fn tampering_is_detected() {
        let log = InMemoryAuditLog::new();
        log.append(record("2", "1")).unwrap();
        log.append(record("3", "1")).unwrap();

        let mut records = log.all().unwrap();
        records[0].actor = "mallory".to_string();
        let err = verify_records(&records).unwrap_err();
        assert!(err.to_string().contains("modified"));

        let mut records = log.all().unwrap();
        records.remove(0);
        assert!(verify_records(&records).is_err());
    }

    #[test]
    fn records_touching_is_most_recent_first() {
        let log = InMemoryAuditLog::new();
        log.append(record("2", "1")).unwrap();
        log.append(record("9", "8")).unwrap();
        log.append(record("3", "1")).unwrap();

        let touching = log.records_touching(&NodeId::from("1")).unwrap();
        let sources: Vec<_> = touching.iter().map(|r| r.source_id.as_str()).collect();
        assert_eq!(sources, vec!["3", "2"]);
    }

    #[test]
    fn lineage_follows_chains_both_ways() {
        let log = InMemoryAuditLog::new();
        // 3 -> 2, then 2 -> 1: asking about 3 must surface both merges.
        log.append(record("3", "2")).unwrap();
        log.append(record("9", "8")).unwrap();
        log.append(record("2", "1")).unwrap();

        let history = log.history_for(&NodeId::from("3")).unwrap();
        let seqs: Vec<_> = history.iter().map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![3, 1]);

        let history = log.history_for(&NodeId::from("1")).unwrap();
        assert_eq!(history.len(), 2);

        assert!(log.history_for(&NodeId::from("42")).unwrap().is_empty());
    }

    #[test]
    fn lineage_skips_siblings_of_a_later_survivor() {
        let log = InMemoryAuditLog::new();
        // b -> a, d -> c, then a -> c.
        log.append(record("b", "a")).unwrap();
        log.append(record("d", "c")).unwrap();
        log.append(record("a", "c")).unwrap();

        let seqs = |id: &str| -> Vec<u64> {
            log.history_for(&NodeId::from(id))
                .unwrap()
                .iter()
                .map(|r| r.sequence)
                .collect()
        };
        assert_eq!(seqs("b"), vec![3, 1]);
        assert_eq!(seqs("a"), vec![3, 1]);
        assert_eq!(seqs("d"), vec![2]);
        assert_eq!(seqs("c"), vec![3, 2, 1]);
    }

    #[test]
    fn dropped_edges_are_part_of_the_hashed_record() {
        let log = InMemoryAuditLog::new();
        let mut pending = record("2", "1");
        pending.absorbed_snapshot = pending.absorbed_snapshot.with_dropped_edges(vec![
            Edge::new("2", "3", "directed")
                .with_id("e2")
                .with_property("since", serde_json::json!(1953)),
        ]);
        let stored = log.append(pending).unwrap();

        let json = serde_json::to_string(&stored).unwrap();
        assert!(json.contains("\"since\":1953"));

        let mut records = log.all().unwrap();
        records[0].absorbed_snapshot.dropped_edges[0]
            .properties
            .insert("since".to_string(), serde_json::json!(1954));
        assert!(verify_records(&records).is_err());
    }

    #[test]
    fn snapshot_and_actor_kind_serialize() {
        let log = InMemoryAuditLog::new();
        let mut pending = record("2", "1");
        pending.actor_kind = ActorKind::Automated;
        let stored = log.append(pending).unwrap();

        let json = serde_json::to_string(&stored).unwrap();
        assert!(json.contains("\"automated\""));
        let back: MergeHistory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stored);
        assert_eq!(back.compute_hash().unwrap(), stored.record_hash);
    }
}
