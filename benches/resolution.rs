use std::sync::Arc;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use kyroql_resolve::resolution::{BlockingIndex, CancellationToken, Scanner};
use kyroql_resolve::{
    EntityType, GraphStore, InMemoryAuditLog, InMemoryGraphStore, Node, ResolutionConfig,
    ResolutionEngine,
};

const FIRST: [&str; 12] = [
    "Sidney", "Frank", "Harold", "Allen", "George", "Richard", "Eric", "Joseph", "Martha", "Helen",
    "James", "Ruth",
];
const LAST: [&str; 10] = [
    "Gottlieb", "Olson", "Abramson", "Dulles", "White", "Helms", "Scheider", "Lashbrook", "Cameron",
    "Hunter",
];

/// Synthetic people with a few near-duplicate spellings mixed in.
fn people(count: usize) -> Vec<Node> {
    (0..count)
        .map(|i| {
            let first = FIRST[i % FIRST.len()];
            let last = LAST[(i / FIRST.len()) % LAST.len()];
            let label = match i % 7 {
                0 => format!("{first} {last}."),
                3 => format!("{} {last}", &first[..1]),
                _ => format!("{first} {last} {}", i / 120),
            };
            Node::new(i as u64, label, EntityType::Person).with_source(format!("src-{}", i % 5))
        })
        .collect()
}

fn bench_blocking_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("blocking_build");
    for size in [500usize, 2_000] {
        let nodes = people(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &nodes, |b, nodes| {
            b.iter(|| BlockingIndex::build(nodes.iter(), 3));
        });
    }
    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");
    group.sample_size(20);
    for workers in [1usize, 4] {
        let store = InMemoryGraphStore::new();
        for node in people(1_000) {
            store.insert_node(node).unwrap();
        }
        let snapshot = store.snapshot().unwrap();
        let mut config = ResolutionConfig::default();
        config.scan.workers = workers;

        group.bench_function(BenchmarkId::new("workers", workers), |b| {
            b.iter(|| {
                Scanner::new(&config)
                    .scan(&snapshot, &CancellationToken::new())
                    .unwrap()
            });
        });
    }
    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    c.bench_function("merge/pairwise", |b| {
        // Fresh graph per sample; setup excluded from timing.
        b.iter_custom(|iters| {
            let count = usize::try_from(iters).unwrap_or(usize::MAX).saturating_mul(2);
            let store = Arc::new(InMemoryGraphStore::new());
            for node in people(count) {
                store.insert_node(node).unwrap();
            }
            let engine = ResolutionEngine::new(
                store,
                Arc::new(InMemoryAuditLog::new()),
                ResolutionConfig::default(),
            )
            .unwrap();

            let start = Instant::now();
            for i in 0..iters {
                engine.execute_merge(2 * i + 1, 2 * i, "bench").unwrap();
            }
            start.elapsed()
        });
    });
}

criterion_group!(resolution, bench_blocking_build, bench_scan, bench_merge);
criterion_main!(resolution);
