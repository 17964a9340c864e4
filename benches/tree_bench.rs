//! Benchmarks for keyspace-walker
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn benchmark_tokenize(c: &mut Criterion) {
    use keyspace_walker::tree::tokenize;

    c.bench_function("tokenize_hash_tag_key", |b| {
        b.iter(|| {
            let segments = tokenize(black_box("app:users:{eu:42}:sessions:9f1c:token"));
            black_box(segments);
        })
    });
}

fn benchmark_fold(c: &mut Criterion) {
    use keyspace_walker::tree::{tokenize, EntryTree, LevelWindow};

    let keys: Vec<String> = (0..10_000)
        .map(|i| format!("group-{}:item:{}:field", i % 16, i))
        .collect();

    c.bench_function("fold_10k_keys_all_levels", |b| {
        b.iter(|| {
            let mut tree = EntryTree::new();
            for key in &keys {
                tree.fold_key(&tokenize(key), LevelWindow::ALL);
            }
            black_box(tree.len());
        })
    });

    c.bench_function("fold_10k_keys_top_level", |b| {
        b.iter(|| {
            let mut tree = EntryTree::new();
            for key in &keys {
                tree.fold_key(&tokenize(key), LevelWindow::new(0, 0));
            }
            black_box(tree.len());
        })
    });
}

fn benchmark_queue_operations(c: &mut Criterion) {
    use keyspace_walker::delivery::{BatchQueue, DataBatch, Record, StreamFrame};

    c.bench_function("batch_queue_send_recv", |b| {
        let queue = BatchQueue::new(10_000);
        let sender = queue.sender();
        let receiver = queue.receiver();

        b.iter(|| {
            let batch = DataBatch::new(vec![Record::Text("app:users:1".into())]);
            sender.try_send(StreamFrame::Batch(batch)).unwrap();
            black_box(receiver.recv());
        })
    });
}

fn benchmark_memory_scan(c: &mut Criterion) {
    use keyspace_walker::store::{MemoryStore, ScanTarget};
    use keyspace_walker::tree::{Filter, LevelWindow};
    use keyspace_walker::walker::{ScanCoordinator, ScanOptions};
    use std::sync::Arc;

    let store = MemoryStore::partitioned(4, 0);
    for i in 0..20_000 {
        store.set_text(format!("group-{}:{}", i % 8, i), "v");
    }
    let target: Arc<dyn ScanTarget> = Arc::new(store);
    let coordinator = ScanCoordinator::new(target, ScanOptions::default());
    let filter = Filter::match_all();

    c.bench_function("scan_20k_keys_4_shards", |b| {
        b.iter(|| {
            let outcome = coordinator.scan_all(&filter, LevelWindow::new(0, 1)).unwrap();
            black_box(outcome.tree.len());
        })
    });
}

criterion_group!(
    benches,
    benchmark_tokenize,
    benchmark_fold,
    benchmark_queue_operations,
    benchmark_memory_scan
);
criterion_main!(benches);
