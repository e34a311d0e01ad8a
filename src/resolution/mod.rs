//! Entity resolution pipeline.
//!
//! Scanning is read-only: [`normalize`] → [`BlockingIndex`] →
//! [`SimilarityScorer`] → [`rank`], driven in parallel by [`Scanner`].
//! Merging is the only mutation and goes through [`MergeExecutor`].

pub mod blocking;
pub mod merge;
pub mod normalize;
pub mod ranker;
pub mod scan;
pub mod similarity;

pub use blocking::BlockingIndex;
pub use merge::{MergeExecutor, MergeOutcome};
pub use normalize::{fallback_form, grams, normalize, DEFAULT_GRAM_SIZE};
pub use ranker::{rank, ResolutionCandidate};
pub use scan::{CancellationToken, ProgressFn, ScanReport, Scanner};
pub use similarity::{PreparedNode, ScoreBreakdown, SimilarityScorer};
