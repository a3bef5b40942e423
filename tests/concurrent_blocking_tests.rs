//! Concurrency tests for the blocking cache.
//!
//! Exercises the parts a single thread cannot: blocking on an exhausted
//! pool, direct hand-off between threads, invalidation wake-ups, bounded
//! waits, and sustained contention. Timing-based assertions use generous
//! margins so they hold on loaded CI machines.

#![cfg(feature = "concurrent")]

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use objcache_rs::{NullMedia, ObjectCache, ObjectCacheConfig, SCRATCH_GROUP};

fn make_cache(objects: usize, hash_slots: usize) -> Arc<ObjectCache<NullMedia>> {
    Arc::new(ObjectCache::init(
        ObjectCacheConfig {
            hash_slots,
            objects: NonZeroUsize::new(objects).unwrap(),
            buffer_size: 32,
        },
        NullMedia,
        None,
    ))
}

#[test]
fn second_acquire_blocks_until_first_release() {
    let cache = make_cache(1, 2);
    let acquired = Arc::new(AtomicBool::new(false));

    let mut holder = cache.acquire(1, 1);
    holder.data_mut()[0] = 11;
    holder.mark_valid();

    let waiter = {
        let cache = Arc::clone(&cache);
        let acquired = Arc::clone(&acquired);
        thread::spawn(move || {
            // Different key: must wait for the pool, then recycle the
            // single buffer under the new identity.
            let lease = cache.acquire(1, 2);
            acquired.store(true, Ordering::SeqCst);
            assert!(!lease.is_cache_hit());
            assert_eq!(lease.group(), 1);
            assert_eq!(lease.key(), 2);
            lease.release();
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(
        !acquired.load(Ordering::SeqCst),
        "waiter proceeded while the pool was fully owned"
    );

    holder.release();
    waiter.join().unwrap();
    assert!(acquired.load(Ordering::SeqCst));

    // The old identity was recycled away.
    let relookup = cache.acquire(1, 1);
    assert!(!relookup.is_cache_hit());
    relookup.release();
    cache.check_invariants();
}

#[test]
fn release_hands_off_to_exactly_one_waiter() {
    let cache = make_cache(4, 8);
    let (tx, rx) = mpsc::channel();

    let mut holder = cache.acquire(7, 7);
    holder.data_mut()[0] = 77;
    holder.mark_valid();

    let waiters: Vec<_> = (0..2)
        .map(|i| {
            let cache = Arc::clone(&cache);
            let tx = tx.clone();
            thread::spawn(move || {
                let lease = cache.acquire(7, 7);
                tx.send(i).unwrap();
                // The hand-off preserved the cached payload.
                assert!(lease.is_cache_hit());
                assert_eq!(lease.data()[0], 77);
                // Hold long enough that the other waiter is observably
                // still blocked.
                thread::sleep(Duration::from_millis(200));
                lease.release();
            })
        })
        .collect();

    // Let both waiters park, then release.
    thread::sleep(Duration::from_millis(100));
    holder.release();

    // Exactly one waiter proceeds per release.
    rx.recv_timeout(Duration::from_secs(5))
        .expect("no waiter received the hand-off");
    assert!(
        rx.recv_timeout(Duration::from_millis(100)).is_err(),
        "both waiters proceeded from a single release"
    );

    // The first waiter's release unblocks the second.
    rx.recv_timeout(Duration::from_secs(5))
        .expect("second waiter never obtained the object");

    for w in waiters {
        w.join().unwrap();
    }
    assert_eq!(cache.metrics_snapshot().handoffs, 2);
    cache.check_invariants();
}

#[test]
fn invalidation_wakes_waiter_into_fresh_miss() {
    let cache = make_cache(2, 4);

    let mut holder = cache.acquire(9, 9);
    holder.data_mut().fill(0xDD);
    holder.mark_valid();

    let waiter = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            let lease = cache.acquire(9, 9);
            // The owner discarded the object: we must not see its stale
            // payload as cached content.
            assert!(!lease.is_cache_hit());
            lease.release();
        })
    };

    thread::sleep(Duration::from_millis(100));
    holder.set_error();
    holder.release();

    waiter.join().unwrap();
    assert!(cache.metrics_snapshot().discards >= 1);
    cache.check_invariants();
}

#[test]
fn acquire_for_times_out_under_contention() {
    let cache = make_cache(1, 2);
    let holder = cache.acquire(1, 1);

    let worker = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            let start = Instant::now();
            // Owned identity.
            let owned = cache.acquire_for(1, 1, Duration::from_millis(60)).is_none();
            // Exhausted pool, different identity.
            let exhausted = cache.acquire_for(1, 2, Duration::from_millis(60)).is_none();
            (owned, exhausted, start.elapsed())
        })
    };

    let (owned, exhausted, elapsed) = worker.join().unwrap();
    assert!(owned, "timed acquisition of an owned object succeeded");
    assert!(exhausted, "timed acquisition from an empty pool succeeded");
    assert!(elapsed >= Duration::from_millis(120));

    holder.release();
    // No contention: the bounded variant succeeds immediately.
    let lease = cache
        .acquire_for(1, 3, Duration::from_millis(500))
        .expect("uncontended timed acquisition failed");
    lease.release();
    cache.check_invariants();
}

#[test]
fn concurrent_misses_on_one_identity_stay_unique() {
    let cache = make_cache(4, 8);
    let mut pool = scoped_threadpool::Pool::new(8);

    let cache_ref = &*cache;
    pool.scoped(|scope| {
        for t in 0..8u32 {
            scope.execute(move || {
                for i in 0..300u32 {
                    // Everyone fights over two identities; discards force
                    // re-insertion races.
                    let key = i % 2;
                    let mut lease = cache_ref.acquire(5, key);
                    if (t + i) % 13 == 0 {
                        lease.set_error();
                    } else {
                        lease.mark_valid();
                    }
                    lease.release();
                }
            });
        }
    });

    // No duplicate identities, accounting intact, everything released.
    cache.check_invariants();
    assert_eq!(cache.available(), 4);
}

#[test]
fn mixed_workload_stress() {
    let cache = make_cache(16, 32);
    let mut pool = scoped_threadpool::Pool::new(8);

    let cache_ref = &*cache;
    pool.scoped(|scope| {
        for t in 0..8u32 {
            scope.execute(move || {
                for i in 0..400u32 {
                    let key = (t.wrapping_mul(31).wrapping_add(i)) % 48;
                    match i % 11 {
                        0 => {
                            // Scratch traffic mixed in.
                            let mut lease = cache_ref.acquire(SCRATCH_GROUP, 0);
                            lease.data_mut()[0] = t as u8;
                            lease.release();
                        }
                        1 => {
                            let mut lease = cache_ref.acquire(3, key);
                            lease.set_error();
                            lease.release();
                        }
                        2 => {
                            if let Some(lease) = cache_ref.try_acquire(3, key) {
                                lease.release();
                            }
                        }
                        3 => {
                            if let Some(mut lease) =
                                cache_ref.acquire_for(3, key, Duration::from_millis(50))
                            {
                                lease.data_mut()[0] = key as u8;
                                lease.mark_valid();
                                lease.release();
                            }
                        }
                        _ => {
                            let mut lease = cache_ref.acquire(3, key);
                            if lease.is_cache_hit() {
                                assert_eq!(lease.data()[0], key as u8);
                            }
                            lease.data_mut()[0] = key as u8;
                            lease.mark_valid();
                            lease.set_modified();
                            lease.release();
                        }
                    }
                }
            });
        }
    });

    cache.check_invariants();
    assert_eq!(cache.available(), 16);
    assert!(cache.len() <= 16);

    let m = cache.metrics_snapshot();
    assert_eq!(m.requests, m.cache_hits + m.recycles + m.scratch_grabs);
}

#[test]
fn payload_integrity_under_handoff_chains() {
    // One hot identity, many threads incrementing a counter in its
    // payload. Exclusive ownership makes the final count exact.
    let cache = make_cache(2, 4);
    const THREADS: u32 = 6;
    const INCREMENTS: u32 = 200;

    {
        let mut lease = cache.acquire(1, 1);
        lease.data_mut()[..4].copy_from_slice(&0u32.to_le_bytes());
        lease.mark_valid();
        lease.release();
    }

    let mut pool = scoped_threadpool::Pool::new(THREADS);
    let cache_ref = &*cache;
    pool.scoped(|scope| {
        for _ in 0..THREADS {
            scope.execute(move || {
                for _ in 0..INCREMENTS {
                    let mut lease = cache_ref.acquire(1, 1);
                    assert!(lease.is_cache_hit(), "counter payload was lost");
                    let mut bytes = [0u8; 4];
                    bytes.copy_from_slice(&lease.data()[..4]);
                    let value = u32::from_le_bytes(bytes) + 1;
                    lease.data_mut()[..4].copy_from_slice(&value.to_le_bytes());
                    lease.release();
                }
            });
        }
    });

    let lease = cache.acquire(1, 1);
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&lease.data()[..4]);
    assert_eq!(u32::from_le_bytes(bytes), THREADS * INCREMENTS);
    lease.release();
    cache.check_invariants();
}
