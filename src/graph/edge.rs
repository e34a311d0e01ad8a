//! Directed, typed relationships between nodes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::node::NodeId;

/// Stable identifier for an edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(String);

impl EdgeId {
    /// Creates a new random edge ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EdgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EdgeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EdgeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A directed relationship `from -[relation]-> to`.
///
/// Both endpoints must name live nodes; the store rejects any mutation that
/// would leave an edge pointing at a removed or merged-away node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Edge identifier.
    pub id: EdgeId,

    /// Origin node.
    pub from: NodeId,

    /// Destination node.
    pub to: NodeId,

    /// Relation type, e.g. `"worked_for"`.
    pub relation: String,

    /// Free-form properties.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl Edge {
    /// Creates an edge with a fresh id and no properties.
    #[must_use]
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>, relation: impl Into<String>) -> Self {
        Self {
            id: EdgeId::new(),
            from: from.into(),
            to: to.into(),
            relation: relation.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style id assignment.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<EdgeId>) -> Self {
        self.id = id.into();
        self
    }

    /// Builder-style property assignment.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Returns true if either endpoint is `id`.
    #[must_use]
    pub fn touches(&self, id: &NodeId) -> bool {
        &self.from == id || &self.to == id
    }

    /// Returns true if the edge starts and ends at the same node.
    #[must_use]
    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }

    /// Identity used to detect duplicate relationships: endpoints plus relation.
    #[must_use]
    pub fn signature(&self) -> (&NodeId, &NodeId, &str) {
        (&self.from, &self.to, self.relation.as_str())
    }
}
