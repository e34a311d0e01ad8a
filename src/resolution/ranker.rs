//! Candidate filtering and ordering.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::NodeId;
use crate::resolution::similarity::ScoreBreakdown;

/// A proposed duplicate pair.
///
/// Candidates are ephemeral: they describe a scan result and are never
/// persisted. `left` is always the lexicographically smaller id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionCandidate {
    /// Smaller node id of the pair.
    pub left: NodeId,
    /// Larger node id of the pair.
    pub right: NodeId,
    /// Combined similarity in `[0, 1]`.
    pub score: f64,
    /// Per-signal scores behind `score`.
    pub breakdown: ScoreBreakdown,
    /// Whether both nodes share an entity type.
    pub same_type: bool,
    /// When the candidate was produced.
    pub generated_at: DateTime<Utc>,
}

impl ResolutionCandidate {
    /// Builds a candidate, putting the ids in canonical order.
    #[must_use]
    pub fn new(a: NodeId, b: NodeId, breakdown: ScoreBreakdown) -> Self {
        let (left, right) = if a <= b { (a, b) } else { (b, a) };
        Self {
            left,
            right,
            score: breakdown.combined,
            same_type: breakdown.same_type,
            breakdown,
            generated_at: Utc::now(),
        }
    }

    /// The canonical `(left, right)` pair.
    #[must_use]
    pub fn pair(&self) -> (&NodeId, &NodeId) {
        (&self.left, &self.right)
    }

    /// True if `id` is one side of the pair.
    #[must_use]
    pub fn involves(&self, id: &NodeId) -> bool {
        self.left == *id || self.right == *id
    }

    /// The other side of the pair, if `id` is one side.
    #[must_use]
    pub fn other(&self, id: &NodeId) -> Option<&NodeId> {
        if self.left == *id {
            Some(&self.right)
        } else if self.right == *id {
            Some(&self.left)
        } else {
            None
        }
    }
}

fn concatenated(c: &ResolutionCandidate) -> impl Iterator<Item = u8> + '_ {
    c.left.as_str().bytes().chain(c.right.as_str().bytes())
}

/// Order used for ranked output: score descending, then the concatenated
/// id pair `left ++ right` ascending.
///
/// Different pairs can concatenate to the same string (`"ab" + "c"` and
/// `"a" + "bc"`); those fall back to `(left, right)` so the order stays
/// total.
#[must_use]
pub fn compare(a: &ResolutionCandidate, b: &ResolutionCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| concatenated(a).cmp(concatenated(b)))
        .then_with(|| a.left.cmp(&b.left))
        .then_with(|| a.right.cmp(&b.right))
}

/// Filters scored pairs by `threshold`, collapses duplicates and sorts.
///
/// Self-pairs and non-finite scores are dropped. When the same unordered
/// pair appears more than once the highest score is kept.
#[must_use]
pub fn rank(
    candidates: impl IntoIterator<Item = ResolutionCandidate>,
    threshold: f64,
) -> Vec<ResolutionCandidate> {
    let mut best: HashMap<(NodeId, NodeId), ResolutionCandidate> = HashMap::new();

    for candidate in candidates {
        if candidate.left == candidate.right
            || !candidate.score.is_finite()
            || candidate.score < threshold
        {
            continue;
        }
        let key = (candidate.left.clone(), candidate.right.clone());
        match best.get(&key) {
            Some(existing) if existing.score >= candidate.score => {}
            _ => {
                best.insert(key, candidate);
            }
        }
    }

    let mut ranked: Vec<_> = best.into_values().collect();
    ranked.sort_by(compare);
    ranked
}
