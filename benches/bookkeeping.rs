//! Transaction Bookkeeping Benchmarks
//!
//! Measures the hot paths shared between worker threads:
//!
//! 1. Rollback node pool give/get round trips across thread counts
//! 2. Allocate/free without the pool, for comparison
//! 3. Nested child start/finish on one family
//! 4. Chain iteration at various depths
//!
//! Run with: cargo bench --bench bookkeeping

use std::ops::ControlFlow;
use std::sync::{Arc, Barrier};
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tidewal_concurrency::{
    ChildTransactionRegistry, GiveError, MemoryBlockStore, RollbackBlockStore, RollbackNodePool,
};
use tidewal_core::{BlockNum, TxnId, TxnIdPair};

const OPS_PER_THREAD: usize = 1_000;

fn pool_round_trip(pool: &RollbackNodePool, store: &MemoryBlockStore, txn: TxnIdPair) {
    let mut node = match pool.get(txn).unwrap() {
        Some(node) => node,
        None => store.allocate().unwrap(),
    };
    node.initialize_for_txn(txn, 0, BlockNum::NONE);
    match pool.give(txn, node) {
        Ok(()) => {}
        Err(GiveError::Full(node)) => store.free(node).unwrap(),
        Err(e) => panic!("{e}"),
    }
}

fn pool_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_contention");

    for threads in [1usize, 2, 4, 8] {
        group.throughput(Throughput::Elements((threads * OPS_PER_THREAD) as u64));
        group.bench_with_input(
            BenchmarkId::new("give_get", threads),
            &threads,
            |b, &threads| {
                let store = Arc::new(MemoryBlockStore::new());
                let pool = Arc::new(RollbackNodePool::new(16, store.clone()));
                b.iter(|| {
                    let barrier = Arc::new(Barrier::new(threads));
                    let handles: Vec<_> = (0..threads)
                        .map(|t| {
                            let pool = Arc::clone(&pool);
                            let store = Arc::clone(&store);
                            let barrier = Arc::clone(&barrier);
                            thread::spawn(move || {
                                barrier.wait();
                                for i in 0..OPS_PER_THREAD {
                                    let txn = TxnIdPair::root(TxnId::new(
                                        (t * OPS_PER_THREAD + i + 1) as u64,
                                    ));
                                    pool_round_trip(&pool, &store, txn);
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

fn pool_vs_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_vs_store");
    group.throughput(Throughput::Elements(1));
    let txn = TxnIdPair::root(TxnId::new(1));

    group.bench_function("pooled", |b| {
        let store = Arc::new(MemoryBlockStore::new());
        let pool = RollbackNodePool::new(16, store.clone());
        b.iter(|| pool_round_trip(&pool, &store, black_box(txn)));
    });

    group.bench_function("unpooled", |b| {
        let store = MemoryBlockStore::new();
        b.iter(|| {
            let mut node = store.allocate().unwrap();
            node.initialize_for_txn(black_box(txn), 0, BlockNum::NONE);
            store.free(node).unwrap();
        });
    });

    group.finish();
}

fn child_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("child_lifecycle");

    for depth in [1usize, 4, 16] {
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::new("start_finish", depth), &depth, |b, &depth| {
            let registry = ChildTransactionRegistry::new(TxnId::new(1));
            b.iter(|| {
                let mut chain = vec![registry.root()];
                for _ in 0..depth {
                    let parent = Arc::clone(&chain[chain.len() - 1]);
                    chain.push(registry.start_child(&parent));
                }
                while chain.len() > 1 {
                    if let Some(child) = chain.pop() {
                        registry.finish_child(&child);
                    }
                }
            });
        });
    }

    group.finish();
}

fn chain_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_iteration");

    for depth in [1usize, 8, 64] {
        let registry = ChildTransactionRegistry::new(TxnId::new(1));
        let mut leaf = registry.root();
        for _ in 0..depth {
            leaf = registry.start_child(&leaf);
        }

        group.throughput(Throughput::Elements(depth as u64 + 1));
        group.bench_with_input(BenchmarkId::new("iterate", depth), &registry, |b, registry| {
            b.iter(|| {
                let mut visited = 0usize;
                let flow: ControlFlow<()> = registry.iterate(|txn| {
                    visited += black_box(txn.depth()) + 1;
                    ControlFlow::Continue(())
                });
                black_box((flow, visited))
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    pool_contention,
    pool_vs_store,
    child_lifecycle,
    chain_iteration
);
criterion_main!(benches);
