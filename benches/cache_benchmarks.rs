//! Criterion benchmarks for the engine's hot paths.
//!
//! Single-threaded: measures the cost of the state-machine steps
//! themselves, without lock contention. See `concurrent_benchmarks` for
//! the cross-thread paths.

use core::num::NonZeroUsize;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use objcache_rs::{AdditiveHashBuilder, CacheEngine, ObjectCacheConfig, SCRATCH_GROUP};

fn engine(objects: usize, hash_slots: usize) -> CacheEngine<AdditiveHashBuilder> {
    CacheEngine::with_hasher(
        ObjectCacheConfig {
            hash_slots,
            objects: NonZeroUsize::new(objects).unwrap(),
            buffer_size: 512,
        },
        AdditiveHashBuilder,
    )
}

fn acquired(step: objcache_rs::AcquireStep) -> objcache_rs::SlotId {
    match step {
        objcache_rs::AcquireStep::Acquired(id) => id,
        other => panic!("unexpected step: {:?}", other),
    }
}

fn bench_hit_path(c: &mut Criterion) {
    let mut e = engine(256, 512);
    // Pre-populate every identity so the loop is pure hits.
    for key in 0..256u32 {
        let id = acquired(e.acquire_or_wait(1, key));
        e.set_valid(id, true);
        e.release(id);
    }

    let mut key = 0u32;
    c.bench_function("hit_acquire_release", |b| {
        b.iter(|| {
            let id = acquired(e.acquire_or_wait(1, black_box(key % 256)));
            e.release(id);
            key = key.wrapping_add(61);
        })
    });
}

fn bench_miss_path(c: &mut Criterion) {
    let mut e = engine(256, 512);
    let mut key = 0u32;
    c.bench_function("miss_recycle_release", |b| {
        b.iter(|| {
            // Strictly increasing keys: every acquisition evicts the tail.
            key = key.wrapping_add(1);
            let id = acquired(e.acquire_or_wait(1, black_box(key)));
            e.set_valid(id, true);
            e.release(id);
        })
    });
}

fn bench_discard_path(c: &mut Criterion) {
    let mut e = engine(256, 512);
    c.bench_function("error_discard_release", |b| {
        b.iter(|| {
            let id = acquired(e.acquire_or_wait(1, black_box(7)));
            e.set_error(id);
            e.release(id);
        })
    });
}

fn bench_scratch_path(c: &mut Criterion) {
    let mut e = engine(256, 512);
    c.bench_function("scratch_grab_release", |b| {
        b.iter(|| {
            let id = acquired(e.acquire_or_wait(SCRATCH_GROUP, 0));
            e.release(black_box(id));
        })
    });
}

criterion_group!(
    benches,
    bench_hit_path,
    bench_miss_path,
    bench_discard_path,
    bench_scratch_path
);
criterion_main!(benches);
