// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Benchmarks for the block cache.

#![expect(missing_docs, reason = "Benchmark code does not require documentation")]

use std::hint::black_box;
use std::thread;

use block_cache::{BlockCache, BlockId, MemDevice, RecencyPolicy};
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

criterion_group!(benches, bench_basic, bench_concurrent, bench_recency);
criterion_main!(benches);

const ENTRIES: usize = 256;
const SHARDS: usize = 13;
const BLOCK_SIZE: usize = 1024;

fn cache(entries: usize, shards: usize) -> BlockCache<MemDevice> {
    BlockCache::builder()
        .entries(entries)
        .shards(shards)
        .block_size(BLOCK_SIZE)
        .build(MemDevice::new())
}

fn bench_basic(c: &mut Criterion) {
    let mut group = c.benchmark_group("BlockCache");

    group.bench_function("build", |b| {
        b.iter(|| black_box(cache(ENTRIES, SHARDS)));
    });

    group.throughput(Throughput::Elements(1));
    group.bench_function("fetch_hit", |b| {
        let cache = cache(ENTRIES, SHARDS);
        let resident = u32::try_from(ENTRIES / 2).unwrap_or(u32::MAX);

        for block in 0..resident {
            drop(cache.fetch_for_read(BlockId::new(1, block)).expect("memory device never fails"));
        }

        let mut rng = StdRng::seed_from_u64(42);
        b.iter(|| {
            let id = BlockId::new(1, rng.random_range(0..resident));
            black_box(cache.fetch_for_read(id).expect("memory device never fails")[0]);
        });
    });

    group.bench_function("fetch_miss_local", |b| {
        let cache = cache(ENTRIES, SHARDS);

        // Sequential blocks cycle through every shard, so each one recycles locally.
        let mut block = 0_u32;
        b.iter(|| {
            block = block.wrapping_add(1);
            black_box(cache.fetch_for_read(BlockId::new(1, block)).expect("memory device never fails")[0]);
        });
    });

    group.bench_function("fetch_miss_migrate", |b| {
        b.iter_batched(
            || {
                let cache = cache(SHARDS * 2, SHARDS);

                // Pin both entries of shard 0 so the next miss there has to migrate.
                for block in [0, 13] {
                    let guard = cache.fetch_for_read(BlockId::new(1, block)).expect("memory device never fails");
                    guard.pin();
                }
                cache
            },
            |cache| {
                black_box(cache.fetch_for_read(BlockId::new(1, 26)).expect("memory device never fails")[0]);
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("write_through", |b| {
        let cache = cache(ENTRIES, SHARDS);
        let mut block = cache.fetch_for_read(BlockId::new(1, 7)).expect("memory device never fails");

        b.iter(|| {
            block[0] = block[0].wrapping_add(1);
            block.write_through().expect("memory device never fails");
        });
    });

    group.finish();
}

fn bench_concurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("BlockCache_Concurrent");

    for num_threads in [2, 4, 8] {
        group.throughput(Throughput::Elements(1000));
        group.bench_with_input(
            BenchmarkId::new("concurrent_fetch_disjoint", num_threads),
            &num_threads,
            |b, &num_threads| {
                let cache = cache(ENTRIES, SHARDS);

                b.iter(|| {
                    let handles: Vec<_> = (0..num_threads)
                        .map(|t: u32| {
                            let cache = cache.clone();
                            thread::spawn(move || {
                                let mut rng = StdRng::seed_from_u64(u64::from(t));
                                for _ in 0..1000 {
                                    // Each thread works on its own range of blocks.
                                    let id = BlockId::new(1, t * 1000 + rng.random_range(0..16));
                                    black_box(cache.fetch_for_read(id).expect("memory device never fails")[0]);
                                }
                            })
                        })
                        .collect();

                    for handle in handles {
                        handle.join().expect("thread panicked");
                    }
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("concurrent_fetch_shared", num_threads),
            &num_threads,
            |b, &num_threads| {
                let cache = cache(ENTRIES, SHARDS);

                b.iter(|| {
                    let handles: Vec<_> = (0..num_threads)
                        .map(|t: u32| {
                            let cache = cache.clone();
                            thread::spawn(move || {
                                let mut rng = StdRng::seed_from_u64(u64::from(t));
                                for i in 0..1000 {
                                    let id = BlockId::new(1, rng.random_range(0..64));
                                    let mut block = cache.fetch_for_read(id).expect("memory device never fails");
                                    if i % 10 == 0 {
                                        // 10% writes
                                        block[0] = block[0].wrapping_add(1);
                                        block.write_through().expect("memory device never fails");
                                    }
                                }
                            })
                        })
                        .collect();

                    for handle in handles {
                        handle.join().expect("thread panicked");
                    }
                });
            },
        );
    }

    group.finish();
}

/// Compares the two recycling orders under a skewed workload that overflows the cache.
fn bench_recency(c: &mut Criterion) {
    let mut group = c.benchmark_group("BlockCache_Recency");
    group.throughput(Throughput::Elements(1000));

    for policy in [RecencyPolicy::InsertionOrder, RecencyPolicy::MoveToFrontOnRelease] {
        group.bench_with_input(BenchmarkId::new("skewed", format!("{policy:?}")), &policy, |b, &policy| {
            let cache = BlockCache::builder()
                .entries(64)
                .shards(SHARDS)
                .block_size(BLOCK_SIZE)
                .recency(policy)
                .build(MemDevice::new());

            let mut rng = StdRng::seed_from_u64(42);
            b.iter(|| {
                for _ in 0..1000 {
                    // 80% of lookups go to 32 hot blocks, the rest to 1024 cold ones.
                    let block = if rng.random_bool(0.8) {
                        rng.random_range(0..32)
                    } else {
                        rng.random_range(32..1056)
                    };
                    black_box(cache.fetch_for_read(BlockId::new(1, block)).expect("memory device never fails")[0]);
                }
            });
        });
    }

    group.finish();
}
