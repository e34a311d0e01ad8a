//! N-gram blocking index.
//!
//! Every canonical label and alias is cut into padded n-grams; each gram maps
//! to the set of nodes that produced it. Two nodes are only ever compared if
//! they share a bucket, which keeps candidate generation far below all-pairs
//! cost while guaranteeing that nodes sharing any n-gram meet at least once.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::graph::{Node, NodeId};
use crate::resolution::normalize::{grams, normalize, DEFAULT_GRAM_SIZE};

/// Canonical forms of a node's label and aliases, skipping empty forms and
/// names longer than `max_name_chars`.
pub(crate) fn canonical_names(node: &Node, max_name_chars: usize) -> BTreeSet<String> {
    node.names()
        .filter(|name| name.chars().count() <= max_name_chars)
        .map(normalize)
        .filter(|canonical| !canonical.is_empty())
        .collect()
}

/// Blocking key -> node id set.
#[derive(Debug, Clone)]
pub struct BlockingIndex {
    gram_size: usize,
    max_name_chars: usize,
    buckets: BTreeMap<String, BTreeSet<NodeId>>,
    keys: HashMap<NodeId, BTreeSet<String>>,
    unblockable: BTreeSet<NodeId>,
}

impl Default for BlockingIndex {
    fn default() -> Self {
        Self::new(DEFAULT_GRAM_SIZE)
    }
}

impl BlockingIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new(gram_size: usize) -> Self {
        Self::with_limits(gram_size, usize::MAX)
    }

    /// Creates an empty index that ignores names longer than `max_name_chars`.
    #[must_use]
    pub fn with_limits(gram_size: usize, max_name_chars: usize) -> Self {
        Self {
            gram_size: gram_size.max(1),
            max_name_chars,
            buckets: BTreeMap::new(),
            keys: HashMap::new(),
            unblockable: BTreeSet::new(),
        }
    }

    /// Builds an index over `nodes`.
    ///
    /// Runs in time proportional to the total number of name characters.
    ///
    /// # Examples
    ///
    /// ```
    /// use kyroql_resolve::{EntityType, Node, NodeId};
    /// use kyroql_resolve::resolution::BlockingIndex;
    ///
    /// let a = Node::new("1", "Sidney Gottlieb", EntityType::Person);
    /// let b = Node::new("2", "S. Gottlieb", EntityType::Person);
    /// let index = BlockingIndex::build([&a, &b], 3);
    /// assert!(index.candidates_for(&a).contains(&NodeId::from("2")));
    /// ```
    #[must_use]
    pub fn build<'a>(nodes: impl IntoIterator<Item = &'a Node>, gram_size: usize) -> Self {
        let mut index = Self::new(gram_size);
        for node in nodes {
            index.insert(node);
        }
        index
    }

    /// Blocking keys a node would be filed under.
    #[must_use]
    pub fn keys_for(&self, node: &Node) -> BTreeSet<String> {
        canonical_names(node, self.max_name_chars)
            .iter()
            .flat_map(|name| grams(name, self.gram_size))
            .collect()
    }

    /// Files a node under its keys, replacing any previous entry for its id.
    ///
    /// Returns false if the node produced no keys and was flagged unblockable.
    pub fn insert(&mut self, node: &Node) -> bool {
        self.remove(&node.id);

        let keys = self.keys_for(node);
        if keys.is_empty() {
            self.unblockable.insert(node.id.clone());
            return false;
        }

        for key in &keys {
            self.buckets.entry(key.clone()).or_default().insert(node.id.clone());
        }
        self.keys.insert(node.id.clone(), keys);
        true
    }

    /// Removes a node, e.g. after it was merged away.
    ///
    /// Returns true if the node was present.
    pub fn remove(&mut self, id: &NodeId) -> bool {
        if self.unblockable.remove(id) {
            return true;
        }
        let Some(keys) = self.keys.remove(id) else {
            return false;
        };
        for key in keys {
            if let Some(bucket) = self.buckets.get_mut(&key) {
                bucket.remove(id);
                if bucket.is_empty() {
                    self.buckets.remove(&key);
                }
            }
        }
        true
    }

    /// Every indexed node sharing at least one key with `node`, excluding
    /// `node` itself.
    #[must_use]
    pub fn candidates_for(&self, node: &Node) -> BTreeSet<NodeId> {
        let mut out = BTreeSet::new();
        for key in self.keys_for(node) {
            if let Some(bucket) = self.buckets.get(&key) {
                out.extend(bucket.iter().filter(|id| **id != node.id).cloned());
            }
        }
        out
    }

    /// The smallest key shared by two indexed nodes.
    ///
    /// Scanning scores a pair only inside this bucket, so each pair is
    /// compared exactly once no matter how many keys it shares.
    #[must_use]
    pub fn first_shared_key(&self, a: &NodeId, b: &NodeId) -> Option<&str> {
        let (a_keys, b_keys) = (self.keys.get(a)?, self.keys.get(b)?);
        a_keys.intersection(b_keys).next().map(String::as_str)
    }

    /// Keys a node is filed under.
    #[must_use]
    pub fn keys_of(&self, id: &NodeId) -> Option<&BTreeSet<String>> {
        self.keys.get(id)
    }

    /// Iterates `(key, ids)` buckets in key order.
    pub fn buckets(&self) -> impl Iterator<Item = (&str, &BTreeSet<NodeId>)> {
        self.buckets.iter().map(|(key, ids)| (key.as_str(), ids))
    }

    /// Looks up one bucket.
    #[must_use]
    pub fn bucket(&self, key: &str) -> Option<&BTreeSet<NodeId>> {
        self.buckets.get(key)
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of blockable nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.keys.len()
    }

    /// Nodes whose names produced no keys.
    #[must_use]
    pub fn unblockable(&self) -> &BTreeSet<NodeId> {
        &self.unblockable
    }

    /// Configured gram size.
    #[must_use]
    pub const fn gram_size(&self) -> usize {
        self.gram_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EntityType;

    fn node(id: &str, label: &str) -> Node {
        Node::new(id, label, EntityType::Person)
    }

    #[test]
    fn candidates_exclude_self_and_are_deduplicated() {
        let a = node("a", "Sidney Gottlieb");
        let b = node("b", "Sidney  Gottlieb.");
        let c = node("c", "Gottlieb");
        let index = BlockingIndex::build([&a, &b, &c], 3);

        let candidates = index.candidates_for(&a);
        assert_eq!(
            candidates.into_iter().collect::<Vec<_>>(),
            vec![NodeId::from("b"), NodeId::from("c")]
        );
    }

    #[test]
    fn no_false_negatives_for_shared_trigram() {
        let labels = [
            ("1", "Frank Olson"),
            ("2", "Harold Abramson"),
            ("3", "George Hunter White"),
            ("4", "Whitey Bulger"),
            ("5", "Olsen Twins"),
            ("6", "Allen Dulles"),
        ];
        let nodes: Vec<Node> = labels.iter().map(|(id, label)| node(id, label)).collect();
        let index = BlockingIndex::build(nodes.iter(), 3);

        for a in &nodes {
            let label_a = normalize(&a.label);
            for b in &nodes {
                if a.id == b.id {
                    continue;
                }
                let label_b = normalize(&b.label);
                let chars: Vec<char> = label_a.chars().collect();
                let shares = chars.windows(3).any(|w| label_b.contains(&w.iter().collect::<String>()));
                if shares {
                    assert!(
                        index.candidates_for(a).contains(&b.id),
                        "{} should block with {}",
                        a.label,
                        b.label
                    );
                }
            }
        }
    }

    #[test]
    fn aliases_contribute_keys() {
        let a = node("a", "Gottlieb").with_alias("Joseph Scheider");
        let b = node("b", "Scheider");
        let index = BlockingIndex::build([&a, &b], 3);
        assert!(index.candidates_for(&b).contains(&NodeId::from("a")));
    }

    #[test]
    fn empty_labels_are_unblockable() {
        let a = node("a", "   ");
        let b = node("b", "...");
        let c = node("c", "Olson");
        let index = BlockingIndex::build([&a, &b, &c], 3);

        assert_eq!(index.unblockable().len(), 2);
        assert!(index.candidates_for(&a).is_empty());
        assert_eq!(index.node_count(), 1);
    }

    #[test]
    fn remove_and_reinsert_update_buckets() {
        let a = node("a", "Olson");
        let b = node("b", "Olsen");
        let mut index = BlockingIndex::build([&a, &b], 3);
        assert!(index.candidates_for(&a).contains(&NodeId::from("b")));

        assert!(index.remove(&b.id));
        assert!(!index.remove(&b.id));
        assert!(index.candidates_for(&a).is_empty());
        assert!(index.bucket("ols").map_or(true, |ids| !ids.contains(&b.id)));

        let renamed = node("a", "Dulles");
        index.insert(&renamed);
        assert!(index.bucket("^ol").is_none());
        assert!(index.bucket("dul").is_some());
    }

    #[test]
    fn first_shared_key_is_minimal() {
        let a = node("a", "abcd");
        let b = node("b", "xbcd");
        let index = BlockingIndex::build([&a, &b], 3);
        assert_eq!(index.first_shared_key(&a.id, &b.id), Some("bcd"));
        assert_eq!(index.first_shared_key(&a.id, &NodeId::from("zz")), None);
    }

    #[test]
    fn overlong_names_are_ignored() {
        let long = "x".repeat(40);
        let a = node("a", &long).with_alias("Olson");
        let index = {
            let mut index = BlockingIndex::with_limits(3, 16);
            index.insert(&a);
            index
        };
        let keys = index.keys_of(&a.id).unwrap();
        assert!(keys.contains("ols"));
        assert!(!keys.contains("xxx"));
    }
}
