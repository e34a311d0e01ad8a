//! Parallel candidate scan over a graph snapshot.
//!
//! Buckets of the blocking index are fed through a bounded channel to a
//! small pool of scoped worker threads. A pair is scored only inside the
//! first bucket (in key order) that both nodes share, so pairs sharing many
//! grams are still compared once. Cancellation is checked between buckets.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver};
use tracing::{debug, warn};

use crate::config::ResolutionConfig;
use crate::error::{ResolveError, ResolveResult};
use crate::graph::NodeId;
use crate::resolution::blocking::BlockingIndex;
use crate::resolution::ranker::{rank, ResolutionCandidate};
use crate::resolution::similarity::{PreparedNode, SimilarityScorer};
use crate::storage::GraphSnapshot;

/// Cooperative cancellation flag shared between a caller and a scan.
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns true once `cancel` was called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Result of a full scan.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Ranked candidates at or above the threshold.
    pub candidates: Vec<ResolutionCandidate>,
    /// Nodes with no blocking keys.
    pub unblockable: Vec<NodeId>,
    /// Nodes whose label exceeded `max_name_chars` and was ignored.
    pub skipped: Vec<NodeId>,
    /// Buckets processed.
    pub buckets_scanned: usize,
    /// Pair comparisons performed.
    pub pairs_scored: usize,
}

type Bucket<'a> = (&'a str, &'a BTreeSet<NodeId>);

#[derive(Default)]
struct WorkerOutput {
    candidates: Vec<ResolutionCandidate>,
    buckets: usize,
    pairs: usize,
}

/// Called by a worker after each finished bucket with the scan-wide count.
pub type ProgressFn<'a> = &'a (dyn Fn(usize) + Sync);

struct BucketWorker<'a> {
    index: &'a BlockingIndex,
    prepared: &'a HashMap<NodeId, PreparedNode<'a>>,
    scorer: SimilarityScorer,
    threshold: f64,
    cancel: &'a CancellationToken,
    finished: &'a AtomicUsize,
    progress: Option<ProgressFn<'a>>,
}

impl BucketWorker<'_> {
    fn drain(&self, rx: &Receiver<Bucket<'_>>) -> WorkerOutput {
        let mut out = WorkerOutput::default();
        for (key, ids) in rx {
            if self.cancel.is_cancelled() {
                break;
            }
            out.buckets += 1;

            let ids: Vec<&NodeId> = ids.iter().collect();
            for (i, a) in ids.iter().enumerate() {
                for b in &ids[i + 1..] {
                    if self.index.first_shared_key(a, b) != Some(key) {
                        continue;
                    }
                    let (Some(pa), Some(pb)) = (self.prepared.get(*a), self.prepared.get(*b)) else {
                        continue;
                    };
                    out.pairs += 1;
                    let breakdown = self.scorer.score_prepared(pa, pb);
                    if breakdown.combined >= self.threshold {
                        out.candidates
                            .push(ResolutionCandidate::new((*a).clone(), (*b).clone(), breakdown));
                    }
                }
            }

            let done = self.finished.fetch_add(1, Ordering::AcqRel) + 1;
            if let Some(progress) = self.progress {
                progress(done);
            }
        }
        out
    }
}

/// Runs candidate scans for one configuration.
#[derive(Clone)]
pub struct Scanner<'c> {
    config: &'c ResolutionConfig,
    scorer: SimilarityScorer,
    progress: Option<ProgressFn<'c>>,
}

impl std::fmt::Debug for Scanner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("config", self.config)
            .field("scorer", &self.scorer)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl<'c> Scanner<'c> {
    /// Creates a scanner. The config is assumed to be validated.
    #[must_use]
    pub fn new(config: &'c ResolutionConfig) -> Self {
        Self {
            config,
            scorer: SimilarityScorer::new(config),
            progress: None,
        }
    }

    /// Reports each finished blocking bucket to `progress`.
    ///
    /// The callback runs on worker threads and must not block for long.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressFn<'c>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Scans every live node in `snapshot`.
    ///
    /// Returns [`ResolveError::Cancelled`] and no candidates if `cancel`
    /// fires before the scan completes.
    pub fn scan(&self, snapshot: &GraphSnapshot, cancel: &CancellationToken) -> ResolveResult<ScanReport> {
        let config = self.config;
        let max_chars = config.max_name_chars;

        let mut report = ScanReport::default();
        let mut index = BlockingIndex::with_limits(config.gram_size, max_chars);
        let mut prepared = HashMap::with_capacity(snapshot.node_count());

        for node in snapshot.iterate_nodes() {
            if node.label.chars().count() > max_chars {
                warn!(node_id = %node.id, max_name_chars = max_chars, "label too long, ignored for matching");
                report.skipped.push(node.id.clone());
            }
            if !index.insert(node) {
                warn!(node_id = %node.id, "node has no blocking keys");
                report.unblockable.push(node.id.clone());
            }
            prepared.insert(node.id.clone(), PreparedNode::new(node, max_chars));
        }

        let buckets: Vec<Bucket<'_>> = index.buckets().filter(|(_, ids)| ids.len() > 1).collect();
        let workers = config.scan.workers.max(1);
        let capacity = config.scan.queue_capacity.max(1);
        let finished = AtomicUsize::new(0);

        let outputs = thread::scope(|scope| -> ResolveResult<Vec<WorkerOutput>> {
            let (tx, rx) = bounded::<Bucket<'_>>(capacity);

            let mut handles = Vec::with_capacity(workers);
            for idx in 0..workers {
                let rx = rx.clone();
                let worker = BucketWorker {
                    index: &index,
                    prepared: &prepared,
                    scorer: self.scorer,
                    threshold: config.threshold,
                    cancel,
                    finished: &finished,
                    progress: self.progress,
                };
                let handle = thread::Builder::new()
                    .name(format!("kyroql-scan-{idx}"))
                    .spawn_scoped(scope, move || worker.drain(&rx))
                    .map_err(|e| ResolveError::internal(format!("failed to spawn scan worker: {e}")))?;
                handles.push(handle);
            }
            drop(rx);

            for bucket in &buckets {
                if cancel.is_cancelled() || tx.send(*bucket).is_err() {
                    break;
                }
            }
            // Closing the channel lets workers drain and exit.
            drop(tx);

            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .map_err(|_| ResolveError::internal("scan worker panicked"))
                })
                .collect()
        })?;

        let mut scored = Vec::new();
        for output in outputs {
            report.buckets_scanned += output.buckets;
            report.pairs_scored += output.pairs;
            scored.extend(output.candidates);
        }

        if cancel.is_cancelled() {
            debug!(buckets_scanned = report.buckets_scanned, "scan cancelled");
            return Err(ResolveError::Cancelled {
                buckets_scanned: report.buckets_scanned,
            });
        }

        if config.include_unblockable {
            let (pairs, found) = self.compare_unblockable(snapshot, &index, cancel)?;
            report.pairs_scored += pairs;
            scored.extend(found);
        }

        report.candidates = rank(scored, config.threshold);

        debug!(
            nodes = snapshot.node_count(),
            buckets = index.bucket_count(),
            unblockable = report.unblockable.len(),
            skipped = report.skipped.len(),
            pairs_scored = report.pairs_scored,
            candidates = report.candidates.len(),
            "scan complete"
        );
        Ok(report)
    }

    /// Brute-force comparison of unblockable nodes by their raw text.
    fn compare_unblockable(
        &self,
        snapshot: &GraphSnapshot,
        index: &BlockingIndex,
        cancel: &CancellationToken,
    ) -> ResolveResult<(usize, Vec<ResolutionCandidate>)> {
        let raw: Vec<PreparedNode<'_>> = index
            .unblockable()
            .iter()
            .filter_map(|id| snapshot.node(id))
            .map(PreparedNode::raw)
            .filter(|prepared| !prepared.is_empty())
            .collect();

        let mut pairs = 0;
        let mut found = Vec::new();
        for (i, a) in raw.iter().enumerate() {
            if cancel.is_cancelled() {
                debug!("scan cancelled during unblockable comparison");
                return Err(ResolveError::Cancelled {
                    buckets_scanned: index.bucket_count(),
                });
            }
            for b in &raw[i + 1..] {
                pairs += 1;
                let breakdown = self.scorer.score_prepared(a, b);
                if breakdown.combined >= self.config.threshold {
                    found.push(ResolutionCandidate::new(a.id().clone(), b.id().clone(), breakdown));
                }
            }
        }
        Ok((pairs, found))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::graph::{EntityType, Node};

    fn snapshot(nodes: Vec<Node>) -> GraphSnapshot {
        GraphSnapshot::new(nodes, Vec::new())
    }

    fn config(workers: usize) -> ResolutionConfig {
        ResolutionConfig {
            scan: ScanConfig {
                workers,
                queue_capacity: 2,
            },
            ..ResolutionConfig::default()
        }
    }

    fn people(labels: &[(&str, &str)]) -> Vec<Node> {
        labels
            .iter()
            .map(|(id, label)| Node::new(*id, *label, EntityType::Person))
            .collect()
    }

    #[test]
    fn finds_near_duplicates() {
        let snap = snapshot(people(&[
            ("1", "Sidney Gottlieb"),
            ("2", "Sidney  Gottlieb."),
            ("3", "Allen Dulles"),
        ]));
        let config = config(2);
        let report = Scanner::new(&config).scan(&snap, &CancellationToken::new()).unwrap();

        assert_eq!(report.candidates.len(), 1);
        let top = &report.candidates[0];
        assert_eq!(top.pair(), (&NodeId::from("1"), &NodeId::from("2")));
        assert!(top.score >= config.threshold);
    }

    #[test]
    fn each_pair_scored_once() {
        // Identical labels share every gram; they must still be compared once.
        let snap = snapshot(people(&[("a", "Frank Olson"), ("b", "Frank Olson")]));
        let config = config(3);
        let report = Scanner::new(&config).scan(&snap, &CancellationToken::new()).unwrap();
        assert_eq!(report.pairs_scored, 1);
        assert_eq!(report.candidates.len(), 1);
    }

    #[test]
    fn worker_count_does_not_change_results() {
        let snap = snapshot(people(&[
            ("1", "Frank Olson"),
            ("2", "Frank Olsen"),
            ("3", "Eric Olson"),
            ("4", "Harold Abramson"),
            ("5", "Harold Abrahamson"),
            ("6", "George White"),
        ]));
        let single = Scanner::new(&config(1)).scan(&snap, &CancellationToken::new()).unwrap();
        let many = Scanner::new(&config(4)).scan(&snap, &CancellationToken::new()).unwrap();

        let pairs = |r: &ScanReport| {
            r.candidates
                .iter()
                .map(|c| (c.left.clone(), c.right.clone(), c.score.to_bits()))
                .collect::<Vec<_>>()
        };
        assert_eq!(pairs(&single), pairs(&many));
        assert_eq!(single.pairs_scored, many.pairs_scored);
    }

    #[test]
    fn cancelled_scan_returns_no_candidates() {
        let snap = snapshot(people(&[("1", "Frank Olson"), ("2", "Frank Olson")]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let config = config(2);
        let err = Scanner::new(&config).scan(&snap, &cancel).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn cancellation_mid_scan_stops_at_a_bucket_boundary() {
        let snap = snapshot(people(&[
            ("1", "Frank Olson"),
            ("2", "Frank Olsen"),
            ("3", "Frank Olsson"),
            ("4", "Franklin Olson"),
            ("5", "Fran Olson"),
        ]));
        let config = ResolutionConfig {
            scan: ScanConfig {
                workers: 1,
                queue_capacity: 1,
            },
            ..ResolutionConfig::default()
        };
        let total = BlockingIndex::build(snap.iterate_nodes(), config.gram_size)
            .buckets()
            .filter(|(_, ids)| ids.len() > 1)
            .count();
        assert!(total > 3);

        let cancel = CancellationToken::new();
        let progress = |done: usize| {
            if done == 3 {
                cancel.cancel();
            }
        };
        let err = Scanner::new(&config)
            .with_progress(&progress)
            .scan(&snap, &cancel)
            .unwrap_err();

        match err {
            ResolveError::Cancelled { buckets_scanned } => {
                assert_eq!(buckets_scanned, 3);
                assert!(buckets_scanned < total);
            }
            other => panic!("expected cancellation, got {other}"),
        }
    }

    #[test]
    fn progress_sees_every_bucket() {
        let snap = snapshot(people(&[("1", "Frank Olson"), ("2", "Frank Olsen"), ("3", "Eric Olson")]));
        let config = config(3);
        let calls = AtomicUsize::new(0);
        let progress = |_: usize| {
            calls.fetch_add(1, Ordering::Relaxed);
        };

        let report = Scanner::new(&config)
            .with_progress(&progress)
            .scan(&snap, &CancellationToken::new())
            .unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), report.buckets_scanned);
        assert!(report.buckets_scanned > 0);
    }

    #[test]
    fn unblockable_nodes_are_reported_and_optionally_compared() {
        let snap = snapshot(people(&[("1", "???"), ("2", "???"), ("3", "Frank Olson")]));

        let config = config(1);
        let report = Scanner::new(&config).scan(&snap, &CancellationToken::new()).unwrap();
        assert_eq!(report.unblockable, vec![NodeId::from("1"), NodeId::from("2")]);
        assert!(report.candidates.is_empty());

        let fallback = ResolutionConfig {
            include_unblockable: true,
            ..config
        };
        let report = Scanner::new(&fallback).scan(&snap, &CancellationToken::new()).unwrap();
        assert_eq!(report.candidates.len(), 1);
        assert_eq!(report.candidates[0].pair(), (&NodeId::from("1"), &NodeId::from("2")));
    }

    #[test]
    fn overlong_labels_are_skipped() {
        let long = "Gottlieb ".repeat(10);
        let snap = snapshot(people(&[("1", long.as_str()), ("2", "Sidney Gottlieb")]));
        let config = ResolutionConfig {
            max_name_chars: 32,
            ..config(1)
        };
        let report = Scanner::new(&config).scan(&snap, &CancellationToken::new()).unwrap();
        assert_eq!(report.skipped, vec![NodeId::from("1")]);
        assert_eq!(report.unblockable, vec![NodeId::from("1")]);
        assert!(report.candidates.is_empty());
    }

    #[test]
    fn empty_snapshot_is_fine() {
        let config = config(2);
        let report = Scanner::new(&config)
            .scan(&snapshot(Vec::new()), &CancellationToken::new())
            .unwrap();
        assert!(report.candidates.is_empty());
        assert_eq!(report.buckets_scanned, 0);
    }
}
