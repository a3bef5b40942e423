//! Blocking object cache.
//!
//! [`ObjectCache`] wraps the lock-held [`CacheEngine`] in the concurrency
//! protocol that makes it shareable: one `parking_lot::Mutex` forms the
//! cache-wide critical section, and two kinds of `Condvar` form the only
//! suspend points — one per slot for "this exact object is owned, wait for
//! it", and one cache-wide for "every buffer is owned, wait for any
//! release".
//!
//! # Why this cannot deadlock
//!
//! Every blocking wait goes through `Condvar::wait`, which releases the
//! metadata mutex as part of parking the thread. The mutex is therefore
//! never held by a sleeping thread, and the only lock-ordering that exists
//! is the trivial one. The price is the usual condition-variable contract:
//! a wake-up proves nothing by itself, so every waiter re-polls the engine
//! under the reacquired lock and acts on what it finds —
//!
//! - a hand-off grant: the releasing owner passed ownership directly to
//!   one waiter (`notify_one`, matching the single-owner invariant; a
//!   broadcast could mint two owners);
//! - an epoch change: the object was invalidated; retry the whole lookup;
//! - neither: spurious wake, park again.
//!
//! # Acquire never fails
//!
//! [`ObjectCache::acquire`] has no error path. It returns when it owns a
//! buffer, and every release makes progress for someone: an idling release
//! refills the recency list (waking one availability waiter), a hand-off
//! wakes its recipient, a discard wakes its waiters to retry *and* refills
//! the list. Bounded variants ([`try_acquire`](ObjectCache::try_acquire),
//! [`acquire_for`](ObjectCache::acquire_for)) are layered on the same
//! steps without weakening the default.
//!
//! # Payload access
//!
//! An [`ObjectLease`] is proof of exclusive ownership of one slot, so its
//! payload accessors hand out plain slices of the shared [`BufferPool`]
//! without further locking. Releasing happens when the lease drops —
//! exactly once per acquisition, by construction.

use core::fmt;
use core::hash::BuildHasher;
use core::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::config::ObjectCacheConfig;
use crate::engine::{AcquireStep, CacheEngine, ReleaseEffect, WaitPoll, SCRATCH_GROUP};
use crate::index::DefaultHashBuilder;
use crate::media::MediaBackend;
use crate::metrics::{CacheMetrics, ObjectCacheMetrics};
use crate::pool::BufferPool;
use crate::slot::SlotId;

extern crate alloc;
extern crate std;

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use std::time::Instant;

/// A shared, blocking cache of fixed-size objects identified by
/// `(group, key)`.
///
/// All memory — slot metadata, hash buckets, payload buffers — is allocated
/// at [`init`](ObjectCache::init) and the working set stays bounded by
/// `objects` for the cache's lifetime. Clone-free sharing: put it in an
/// `Arc` (or let scoped threads borrow it) and call `acquire` from any
/// thread.
///
/// # Example
///
/// ```
/// use objcache_rs::{ObjectCache, ObjectCacheConfig, NullMedia};
/// use core::num::NonZeroUsize;
///
/// let cache = ObjectCache::init(
///     ObjectCacheConfig {
///         hash_slots: 8,
///         objects: NonZeroUsize::new(4).unwrap(),
///         buffer_size: 64,
///     },
///     NullMedia,
///     None,
/// );
///
/// let mut lease = cache.acquire(1, 100);
/// assert!(!lease.is_cache_hit());
/// lease.data_mut()[0] = 0x42;
/// lease.mark_valid();
/// drop(lease);
///
/// let lease = cache.acquire(1, 100);
/// assert!(lease.is_cache_hit());
/// assert_eq!(lease.data()[0], 0x42);
/// ```
pub struct ObjectCache<M: MediaBackend, S = DefaultHashBuilder> {
    engine: Mutex<CacheEngine<S>>,
    /// One wait queue per slot, for threads parked on a specific owned
    /// object. Indexed by [`SlotId::index`].
    object_cvs: Box<[Condvar]>,
    /// Wait queue for threads parked until any buffer becomes idle.
    pool_cv: Condvar,
    buffers: BufferPool,
    media: M,
}

impl<M: MediaBackend> ObjectCache<M, DefaultHashBuilder> {
    /// Creates a cache from a configuration with an optional hasher.
    ///
    /// # Arguments
    ///
    /// * `config` - Pool and index dimensioning; validated fatally.
    /// * `media` - Storage backend invoked by `read_through`/`write_back`.
    /// * `hasher` - Optional custom default-type hash builder. If `None`,
    ///   uses `DefaultHashBuilder::default()`.
    pub fn init(
        config: ObjectCacheConfig,
        media: M,
        hasher: Option<DefaultHashBuilder>,
    ) -> Self {
        Self::init_with_hasher(config, media, hasher.unwrap_or_default())
    }
}

impl<M: MediaBackend, S: BuildHasher> ObjectCache<M, S> {
    /// Creates a cache with a custom hash builder for bucket selection.
    ///
    /// Use this for deterministic hashing (e.g.
    /// [`AdditiveHashBuilder`](crate::AdditiveHashBuilder) for sector-style
    /// identities) or DoS-resistant hashers.
    pub fn init_with_hasher(config: ObjectCacheConfig, media: M, hash_builder: S) -> Self {
        let engine = CacheEngine::with_hasher(config, hash_builder);
        let object_cvs: Vec<Condvar> = (0..config.objects.get()).map(|_| Condvar::new()).collect();
        ObjectCache {
            engine: Mutex::new(engine),
            object_cvs: object_cvs.into_boxed_slice(),
            pool_cv: Condvar::new(),
            buffers: BufferPool::new(config.objects.get(), config.buffer_size),
            media,
        }
    }

    /// Number of pool slots (the bound on the working set).
    pub fn object_count(&self) -> usize {
        self.buffers.count()
    }

    /// Payload size of every buffer, in bytes.
    pub fn buffer_size(&self) -> usize {
        self.buffers.buffer_size()
    }

    /// Number of objects currently indexed (idle or owned).
    pub fn len(&self) -> usize {
        self.engine.lock().len()
    }

    /// True if no object is indexed.
    pub fn is_empty(&self) -> bool {
        self.engine.lock().is_empty()
    }

    /// Number of idle buffers at this instant. May be stale by the time
    /// the caller acts on it; `acquire` does its own waiting.
    pub fn available(&self) -> usize {
        self.engine.lock().available()
    }

    /// The storage backend this cache was initialized with.
    pub fn media(&self) -> &M {
        &self.media
    }

    /// Snapshot of the engine counters.
    pub fn metrics_snapshot(&self) -> ObjectCacheMetrics {
        self.engine.lock().metrics().clone()
    }

    /// Verifies the engine's structural invariants, panicking on
    /// violation. Debugging aid; call at quiescent points.
    pub fn check_invariants(&self) {
        self.engine.lock().check_invariants();
    }

    /// Acquires the object `(group, key)`, blocking as long as it takes.
    ///
    /// On a hit the cached buffer is returned (possibly handed off directly
    /// by its previous owner); on a miss the least-recently-released idle
    /// buffer is recycled under the new identity and returned with
    /// [`is_cache_hit`](ObjectLease::is_cache_hit) false, for the caller to
    /// populate. Never fails: blocking is bounded only by other holders'
    /// release behavior.
    ///
    /// Passing [`SCRATCH_GROUP`] yields an anonymous buffer that bypasses
    /// identity tracking entirely.
    pub fn acquire(&self, group: u32, key: u32) -> ObjectLease<'_, M, S> {
        let mut engine = self.engine.lock();
        loop {
            match engine.acquire_or_wait(group, key) {
                AcquireStep::Acquired(id) => return self.lease_locked(&engine, id),
                AcquireStep::MustWait { id, epoch } => loop {
                    self.object_cvs[id.index()].wait(&mut engine);
                    match engine.poll_wait(id, epoch) {
                        WaitPoll::Granted => return self.lease_locked(&engine, id),
                        WaitPoll::Invalidated => break,
                        WaitPoll::Pending => {}
                    }
                },
                AcquireStep::Exhausted => {
                    engine.record_pool_wait();
                    self.pool_cv.wait(&mut engine);
                }
            }
        }
    }

    /// Non-blocking acquisition. Returns `None` whenever `acquire` would
    /// have had to park — the identity is owned, or the pool is exhausted
    /// on a miss. Useful for composing with other work instead of
    /// committing a thread to a wait.
    pub fn try_acquire(&self, group: u32, key: u32) -> Option<ObjectLease<'_, M, S>> {
        let mut engine = self.engine.lock();
        let id = engine.try_acquire(group, key)?;
        Some(self.lease_locked(&engine, id))
    }

    /// Bounded acquisition: like [`acquire`](ObjectCache::acquire) but
    /// gives up and returns `None` once `timeout` has elapsed without
    /// obtaining ownership.
    ///
    /// A hand-off that races the timeout is honored — if the previous
    /// owner granted us the object as we were giving up, the acquisition
    /// succeeds and the object is not lost.
    pub fn acquire_for(
        &self,
        group: u32,
        key: u32,
        timeout: Duration,
    ) -> Option<ObjectLease<'_, M, S>> {
        let deadline = Instant::now() + timeout;
        let mut engine = self.engine.lock();
        loop {
            match engine.acquire_or_wait(group, key) {
                AcquireStep::Acquired(id) => return Some(self.lease_locked(&engine, id)),
                AcquireStep::MustWait { id, epoch } => {
                    loop {
                        let timed_out = self.object_cvs[id.index()]
                            .wait_until(&mut engine, deadline)
                            .timed_out();
                        match engine.poll_wait(id, epoch) {
                            WaitPoll::Granted => return Some(self.lease_locked(&engine, id)),
                            WaitPoll::Invalidated => break,
                            WaitPoll::Pending => {
                                if timed_out {
                                    return if engine.cancel_wait(id, epoch) {
                                        Some(self.lease_locked(&engine, id))
                                    } else {
                                        None
                                    };
                                }
                            }
                        }
                    }
                    if Instant::now() >= deadline {
                        return None;
                    }
                }
                AcquireStep::Exhausted => {
                    engine.record_pool_wait();
                    let timed_out = self.pool_cv.wait_until(&mut engine, deadline).timed_out();
                    if timed_out {
                        // Last chance: a release may have slipped in
                        // between the wake and the deadline check.
                        return engine
                            .try_acquire(group, key)
                            .map(|id| self.lease_locked(&engine, id));
                    }
                }
            }
        }
    }

    /// Acquires `(group, key)` and guarantees a valid payload: on a miss
    /// (or a hit on a never-populated buffer) the media backend fills the
    /// buffer before the lease is returned.
    ///
    /// On a read failure the object is discarded — a later acquisition of
    /// the same identity starts from a clean miss — and the backend's
    /// error is returned.
    pub fn read_through(&self, group: u32, key: u32) -> Result<ObjectLease<'_, M, S>, M::Error> {
        assert_ne!(group, SCRATCH_GROUP, "read_through on a scratch buffer");
        let mut lease = self.acquire(group, key);
        if !lease.is_cache_hit() {
            if let Err(e) = self.media.read(group, key, lease.data_mut()) {
                lease.set_error();
                return Err(e);
            }
            lease.mark_valid();
        }
        Ok(lease)
    }

    /// Builds the lease for a freshly owned slot. Must be called with the
    /// engine lock held so the captured flags are consistent.
    fn lease_locked(&self, engine: &CacheEngine<S>, id: SlotId) -> ObjectLease<'_, M, S> {
        let (group, key) = engine.identity_of(id);
        let cache_hit = engine.is_cache_hit(id);
        ObjectLease {
            cache: self,
            id,
            group,
            key,
            cache_hit,
            valid: cache_hit,
            modified: engine.is_modified(id),
            error: false,
        }
    }
}

impl<M: MediaBackend, S: BuildHasher> CacheMetrics for ObjectCache<M, S> {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.engine.lock().metrics().to_btreemap()
    }

    fn algorithm_name(&self) -> &'static str {
        "PooledLRU"
    }
}

impl<M: MediaBackend, S> fmt::Debug for ObjectCache<M, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectCache")
            .field("objects", &self.buffers.count())
            .field("buffer_size", &self.buffers.buffer_size())
            .finish()
    }
}

/// Exclusive ownership of one cached object.
///
/// Holding a lease is the permission to read and write the object's payload
/// buffer; no other thread can touch it until release. Dropping the lease
/// releases the object — back to the cache's idle list, directly to a
/// waiting thread, or discarded if [`set_error`](ObjectLease::set_error)
/// was called. Because release rides on `Drop`, it happens exactly once per
/// acquisition and cannot be forgotten.
pub struct ObjectLease<'a, M: MediaBackend, S: BuildHasher = DefaultHashBuilder> {
    cache: &'a ObjectCache<M, S>,
    id: SlotId,
    group: u32,
    key: u32,
    cache_hit: bool,
    valid: bool,
    modified: bool,
    error: bool,
}

impl<'a, M: MediaBackend, S: BuildHasher> ObjectLease<'a, M, S> {
    /// Group component of the identity ([`SCRATCH_GROUP`] for scratch
    /// buffers).
    pub fn group(&self) -> u32 {
        self.group
    }

    /// Key component of the identity.
    pub fn key(&self) -> u32 {
        self.key
    }

    /// True if the payload held valid cached content at acquisition. False
    /// means the buffer was freshly recycled and its content is garbage
    /// until populated.
    pub fn is_cache_hit(&self) -> bool {
        self.cache_hit
    }

    /// True for anonymous buffers acquired under [`SCRATCH_GROUP`].
    pub fn is_scratch(&self) -> bool {
        self.group == SCRATCH_GROUP
    }

    /// Current state of the modified marker.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Marks the payload as diverged from the media copy. The marker
    /// survives idle periods until some holder clears it (typically via
    /// [`write_back`](ObjectLease::write_back)).
    pub fn set_modified(&mut self) {
        self.modified = true;
    }

    /// Declares the payload valid cached content: the next acquisition of
    /// this identity will be a cache hit. Call after populating a fresh
    /// buffer by hand; `read_through` does it for you.
    pub fn mark_valid(&mut self) {
        self.valid = true;
    }

    /// Marks the object erroneous. On release its identity is discarded
    /// and the buffer queued for immediate reuse; threads waiting for it
    /// retry from a clean miss.
    pub fn set_error(&mut self) {
        self.error = true;
    }

    /// Read access to the payload.
    pub fn data(&self) -> &[u8] {
        // SAFETY: the lease proves this thread exclusively owns the slot.
        unsafe { self.cache.buffers.slot(self.id.index()) }
    }

    /// Write access to the payload.
    pub fn data_mut(&mut self) -> &mut [u8] {
        // SAFETY: the lease proves this thread exclusively owns the slot;
        // `&mut self` prevents aliasing through `data`.
        unsafe { self.cache.buffers.slot_mut(self.id.index()) }
    }

    /// Flushes the payload to the media backend and clears the modified
    /// marker on success.
    pub fn write_back(&mut self) -> Result<(), M::Error> {
        assert!(!self.is_scratch(), "write_back on a scratch buffer");
        self.cache.media.write(self.group, self.key, self.data())?;
        self.modified = false;
        Ok(())
    }

    /// Releases the object. Equivalent to dropping the lease; provided so
    /// call sites can make the hand-back explicit.
    pub fn release(self) {}
}

impl<'a, M: MediaBackend, S: BuildHasher> Drop for ObjectLease<'a, M, S> {
    fn drop(&mut self) {
        let mut engine = self.cache.engine.lock();
        if self.error {
            engine.set_error(self.id);
        } else {
            engine.set_valid(self.id, self.valid);
            engine.set_modified(self.id, self.modified);
        }
        let effect = engine.release(self.id);
        drop(engine);

        // Wake-ups happen outside the critical section; which queue to
        // poke falls out of what the release did.
        match effect {
            ReleaseEffect::Cached => self.cache.pool_cv.notify_one(),
            ReleaseEffect::HandedOff => self.cache.object_cvs[self.id.index()].notify_one(),
            ReleaseEffect::Recycled { had_waiters } => {
                if had_waiters {
                    self.cache.object_cvs[self.id.index()].notify_all();
                }
                self.cache.pool_cv.notify_one()
            }
        };
    }
}

impl<'a, M: MediaBackend, S: BuildHasher> fmt::Debug for ObjectLease<'a, M, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectLease")
            .field("group", &self.group)
            .field("key", &self.key)
            .field("cache_hit", &self.cache_hit)
            .field("modified", &self.modified)
            .field("error", &self.error)
            .finish()
    }
}
