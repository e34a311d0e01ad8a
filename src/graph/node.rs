//! Node types and identity.
//!
//! A node is one extracted entity: a primary label, a type, alternative
//! names and the set of sources that mentioned it. Resolution decides which
//! nodes denote the same real-world entity; it never invents provenance.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable node identifier, unique within one project graph.
///
/// Ids are opaque strings so that ids minted by an extraction pipeline
/// (`"1"`, `"person:ada"`, a UUID) can be used as-is. Ordering is plain
/// lexicographic byte order, which is what candidate tie-breaking relies on.
///
/// # Examples
///
/// ```
/// use kyroql_resolve::NodeId;
///
/// let id = NodeId::from("42");
/// assert_eq!(id.as_str(), "42");
/// assert!(NodeId::from("10") < NodeId::from("9"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a new random node ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the id is empty or whitespace only.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<Uuid> for NodeId {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Classification of entity types.
///
/// Extraction pipelines emit free-form type names, so unknown names are kept
/// as [`EntityType::Custom`] rather than rejected. Built-in names match
/// case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityType {
    /// A human person
    Person,
    /// A company, institution, or group
    Organization,
    /// An abstract concept or idea
    Concept,
    /// A temporal event
    Event,
    /// A geographic location
    Location,
    /// A physical or digital artifact (documents, programs, objects)
    Artifact,
    /// Any other type, stored lowercased and trimmed
    Custom(String),
}

impl EntityType {
    /// Parses a type name, falling back to [`EntityType::Custom`].
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        let value = value
            .get(..7)
            .filter(|prefix| prefix.eq_ignore_ascii_case("custom:"))
            .map_or(value, |_| value[7..].trim());

        if value.eq_ignore_ascii_case("person") {
            Self::Person
        } else if value.eq_ignore_ascii_case("organization") || value.eq_ignore_ascii_case("org") {
            Self::Organization
        } else if value.eq_ignore_ascii_case("concept") {
            Self::Concept
        } else if value.eq_ignore_ascii_case("event") {
            Self::Event
        } else if value.eq_ignore_ascii_case("location") || value.eq_ignore_ascii_case("place") {
            Self::Location
        } else if value.eq_ignore_ascii_case("artifact") {
            Self::Artifact
        } else {
            Self::Custom(value.to_lowercase())
        }
    }
}

impl From<String> for EntityType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<&str> for EntityType {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<EntityType> for String {
    fn from(value: EntityType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Person => write!(f, "person"),
            Self::Organization => write!(f, "organization"),
            Self::Concept => write!(f, "concept"),
            Self::Event => write!(f, "event"),
            Self::Location => write!(f, "location"),
            Self::Artifact => write!(f, "artifact"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// One entity in the knowledge graph.
///
/// # Examples
///
/// ```
/// use kyroql_resolve::{EntityType, Node};
///
/// let node = Node::new("1", "Sidney Gottlieb", EntityType::Person)
///     .with_alias("Dr. Gottlieb")
///     .with_source("src-a");
/// assert_eq!(node.alias_count(), 1);
/// assert!(node.source_ids.contains("src-a"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Immutable identifier.
    pub id: NodeId,

    /// Primary label.
    pub label: String,

    /// The type classification of the entity.
    pub entity_type: EntityType,

    /// Other names this entity is known by.
    #[serde(default)]
    pub aliases: BTreeSet<String>,

    /// Free-form properties.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,

    /// Sources that mentioned this entity. Only grows.
    #[serde(default)]
    pub source_ids: BTreeSet<String>,

    /// When the node was first created.
    pub created_at: DateTime<Utc>,

    /// When the node was last modified.
    pub updated_at: DateTime<Utc>,

    /// Version number (incremented on every change).
    pub version: u64,
}

impl Node {
    /// Creates a node with no aliases, properties or sources.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, label: impl Into<String>, entity_type: EntityType) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            label: label.into(),
            entity_type,
            aliases: BTreeSet::new(),
            properties: BTreeMap::new(),
            source_ids: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Builder-style alias addition.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(alias.into());
        self
    }

    /// Builder-style provenance addition.
    #[must_use]
    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_ids.insert(source_id.into());
        self
    }

    /// Builder-style property assignment.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Adds an alias to this node.
    pub fn add_alias(&mut self, alias: impl Into<String>) {
        if self.aliases.insert(alias.into()) {
            self.touch();
        }
    }

    /// Records another source for this node.
    pub fn add_source(&mut self, source_id: impl Into<String>) {
        if self.source_ids.insert(source_id.into()) {
            self.touch();
        }
    }

    /// Iterates the primary label followed by every alias.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.label.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    /// Returns the number of aliases.
    #[must_use]
    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }

    /// Updates the `updated_at` timestamp and increments the version.
    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.version = self.version.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_creation() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
        assert!(!id1.is_blank());
        assert!(NodeId::from("   ").is_blank());
    }

    #[test]
    fn test_node_id_ordering_is_lexicographic() {
        let mut ids = vec![NodeId::from(10u64), NodeId::from(2u64), NodeId::from(1u64)];
        ids.sort();
        let raw: Vec<_> = ids.iter().map(NodeId::as_str).collect();
        assert_eq!(raw, vec!["1", "10", "2"]);
    }

    #[test]
    fn test_node_builder() {
        let node = Node::new(1u64, "Sidney Gottlieb", EntityType::Person)
            .with_alias("Dr. Gottlieb")
            .with_source("src-a")
            .with_property("born", serde_json::json!(1918));

        assert_eq!(node.id, NodeId::from("1"));
        assert_eq!(node.version, 1);
        assert_eq!(node.names().collect::<Vec<_>>(), vec!["Sidney Gottlieb", "Dr. Gottlieb"]);
        assert_eq!(node.properties["born"], serde_json::json!(1918));
    }

    #[test]
    fn test_node_add_duplicate_alias_keeps_version() {
        let mut node = Node::new("a", "Einstein", EntityType::Person);
        node.add_alias("Albert");
        let version_after_first = node.version;
        node.add_alias("Albert");

        assert_eq!(node.alias_count(), 1);
        assert_eq!(node.version, version_after_first);
    }

    #[test]
    fn test_entity_type_parse() {
        assert_eq!(EntityType::parse("Person"), EntityType::Person);
        assert_eq!(EntityType::parse("  ORG "), EntityType::Organization);
        assert_eq!(EntityType::parse("custom:person"), EntityType::Person);
        assert_eq!(
            EntityType::parse("Weapon System"),
            EntityType::Custom("weapon system".to_string())
        );
    }

    #[test]
    fn test_entity_type_serde_is_string() {
        let person = serde_json::to_value(EntityType::Person).unwrap();
        assert_eq!(person, serde_json::Value::String("person".to_string()));

        let custom = serde_json::to_value(EntityType::Custom("drug".to_string())).unwrap();
        assert_eq!(custom, serde_json::Value::String("custom:drug".to_string()));

        let parsed: EntityType = serde_json::from_str("\"custom:drug\"").unwrap();
        assert_eq!(parsed, EntityType::Custom("drug".to_string()));
    }

    #[test]
    fn test_node_serialization() {
        let node = Node::new("7", "MKUltra", EntityType::Event).with_source("doc-1");
        let json = serde_json::to_string(&node).unwrap();
        let decoded: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, node);
    }
}
