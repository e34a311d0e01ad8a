//! Multi-signal similarity between two nodes.
//!
//! Signals, each in `[0, 1]`:
//! - label: Jaro-Winkler over canonical labels
//! - alias: best normalized Levenshtein similarity across every pair of
//!   names (label included)
//! - jaccard: overlap of the two canonical name sets (label included)
//!
//! The weighted mean of the three is then adjusted by entity type: a bonus
//! when types agree, a penalty when they differ, or a hard zero in strict
//! mode. Every pairwise helper orders its arguments before comparing, so
//! `score(a, b) == score(b, a)` holds bit for bit.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strsim::{jaro_winkler, normalized_levenshtein};

use crate::config::{ResolutionConfig, SimilarityWeights};
use crate::graph::{EntityType, Node, NodeId};
use crate::resolution::blocking::canonical_names;
use crate::resolution::normalize::{fallback_form, normalize};

/// Per-signal scores and the combined result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Jaro-Winkler similarity of the canonical labels.
    pub label: f64,
    /// Best edit similarity across all name pairs.
    pub alias: f64,
    /// Jaccard overlap of the canonical name sets.
    pub jaccard: f64,
    /// Whether both nodes have the same entity type.
    pub same_type: bool,
    /// Signed amount the type rule added to the weighted mean.
    pub type_adjustment: f64,
    /// Final score in `[0, 1]`.
    pub combined: f64,
}

/// A node with its names canonicalized once, for repeated scoring.
#[derive(Debug, Clone)]
pub struct PreparedNode<'a> {
    node: &'a Node,
    label: String,
    names: BTreeSet<String>,
}

impl<'a> PreparedNode<'a> {
    /// Canonicalizes label and aliases, ignoring names over `max_name_chars`.
    #[must_use]
    pub fn new(node: &'a Node, max_name_chars: usize) -> Self {
        let label = if node.label.chars().count() <= max_name_chars {
            normalize(&node.label)
        } else {
            String::new()
        };
        Self {
            node,
            label,
            names: canonical_names(node, max_name_chars),
        }
    }

    /// Uses raw, punctuation-preserving forms instead of canonical ones.
    ///
    /// Only meant for nodes whose names canonicalize to nothing.
    #[must_use]
    pub fn raw(node: &'a Node) -> Self {
        Self {
            node,
            label: fallback_form(&node.label),
            names: node
                .names()
                .map(fallback_form)
                .filter(|name| !name.is_empty())
                .collect(),
        }
    }

    /// The underlying node.
    #[must_use]
    pub const fn node(&self) -> &'a Node {
        self.node
    }

    /// The node id.
    #[must_use]
    pub fn id(&self) -> &'a NodeId {
        &self.node.id
    }

    /// The node type.
    #[must_use]
    pub fn entity_type(&self) -> &'a EntityType {
        &self.node.entity_type
    }

    /// Canonical label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Canonical label and aliases.
    #[must_use]
    pub fn names(&self) -> &BTreeSet<String> {
        &self.names
    }

    /// True if no usable name survived canonicalization.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn ordered<'s>(a: &'s str, b: &'s str) -> (&'s str, &'s str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Jaro-Winkler similarity of two canonical labels; 0 if either is empty.
#[must_use]
pub fn label_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (x, y) = ordered(a, b);
    jaro_winkler(x, y)
}

/// Best normalized Levenshtein similarity over every cross pair of names.
#[must_use]
pub fn alias_similarity(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let mut best = 0.0_f64;
    for x in a {
        for y in b {
            let (p, q) = ordered(x, y);
            best = best.max(normalized_levenshtein(p, q));
            if best >= 1.0 {
                return 1.0;
            }
        }
    }
    best
}

/// Jaccard similarity of two sets; 0 if both are empty.
#[must_use]
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    #[allow(clippy::cast_precision_loss)]
    let ratio = intersection as f64 / union as f64;
    ratio
}

/// Pure scoring function configured from a [`ResolutionConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SimilarityScorer {
    weights: SimilarityWeights,
    type_mismatch_penalty: f64,
    strict_type_match: bool,
    max_name_chars: usize,
}

impl SimilarityScorer {
    /// Creates a scorer. The config is assumed to be validated.
    #[must_use]
    pub fn new(config: &ResolutionConfig) -> Self {
        Self {
            weights: config.weights,
            type_mismatch_penalty: config.type_mismatch_penalty,
            strict_type_match: config.strict_type_match,
            max_name_chars: config.max_name_chars,
        }
    }

    /// Scores two nodes from scratch.
    ///
    /// # Examples
    ///
    /// ```
    /// use kyroql_resolve::{EntityType, Node, ResolutionConfig};
    /// use kyroql_resolve::resolution::SimilarityScorer;
    ///
    /// let scorer = SimilarityScorer::new(&ResolutionConfig::default());
    /// let a = Node::new("1", "Sidney Gottlieb", EntityType::Person);
    /// let b = Node::new("2", "Sidney  Gottlieb.", EntityType::Person);
    /// let score = scorer.score(&a, &b);
    /// assert_eq!(score.label, 1.0);
    /// assert!(score.combined > 0.7);
    /// ```
    #[must_use]
    pub fn score(&self, a: &Node, b: &Node) -> ScoreBreakdown {
        self.score_prepared(
            &PreparedNode::new(a, self.max_name_chars),
            &PreparedNode::new(b, self.max_name_chars),
        )
    }

    /// Scores two prepared nodes.
    #[must_use]
    pub fn score_prepared(&self, a: &PreparedNode<'_>, b: &PreparedNode<'_>) -> ScoreBreakdown {
        let label = label_similarity(a.label(), b.label());
        let alias = alias_similarity(a.names(), b.names());
        let overlap = jaccard(a.names(), b.names());
        let same_type = a.entity_type() == b.entity_type();

        let w = &self.weights;
        let base = (w.label_weight * label + w.alias_weight * alias + w.jaccard_weight * overlap)
            / w.signal_total();

        let (type_adjustment, combined) = if same_type {
            (w.type_bonus, (base + w.type_bonus).clamp(0.0, 1.0))
        } else if self.strict_type_match {
            (-base, 0.0)
        } else {
            (
                -self.type_mismatch_penalty,
                (base - self.type_mismatch_penalty).clamp(0.0, 1.0),
            )
        };

        ScoreBreakdown {
            label,
            alias,
            jaccard: overlap,
            same_type,
            type_adjustment,
            combined,
        }
    }
}
