//! The cache engine: lookup, acquisition, recycling and release.
//!
//! [`CacheEngine`] is the single-threaded core of the object cache. It owns
//! the slot pool, the hash index and the recency list, and mutates them
//! through short, non-blocking steps. It contains **no** synchronization of
//! its own: every method must be called with the cache's critical section
//! held. The blocking [`ObjectCache`](crate::cache::ObjectCache) wraps an
//! engine in a mutex and turns the step outcomes into condition-variable
//! waits; bare-metal integrations can drive the same steps under their own
//! lock and parking primitives.
//!
//! # The acquisition state machine
//!
//! ```text
//!            acquire(group, key)
//!                    │
//!              hash lookup
//!          ┌─────────┼──────────────┐
//!        hit,      hit,           miss
//!        idle      owned            │
//!          │         │        recency list empty?
//!    unlink from   register    ┌────┴────┐
//!    recency list  waiter     no        yes
//!          │         │         │          │
//!       Acquired  MustWait  pop tail,  Exhausted
//!                    │      retag,    (wait for a
//!                    │      index     release, then
//!                    │         │      retry lookup)
//!                    │      Acquired
//!          ┌─────────┴───────┐
//!       Granted         Invalidated
//!    (ownership         (retry the
//!     handed off)        lookup)
//! ```
//!
//! A waiter parks on the specific slot it found; the owner's release either
//! hands ownership directly to exactly one waiter (`grants`) or, when the
//! owner discards the object as erroneous, advances the slot's `epoch` so
//! every waiter wakes, observes the identity gone, and retries the whole
//! lookup. Retrying the lookup — rather than assuming anything about the
//! slot — is also what keeps two concurrent misses on the same identity
//! from both inserting it.
//!
//! # Ownership accounting
//!
//! The recency list holds exactly the unowned slots, so
//! `available() + owned == objects` at every quiescent point, and the
//! list's length is the availability count the miss path waits on.

use core::hash::BuildHasher;

use crate::config::ObjectCacheConfig;
use crate::index::{DefaultHashBuilder, HashIndex};
use crate::list::RecencyList;
use crate::metrics::ObjectCacheMetrics;
use crate::slot::{ObjectFlags, ObjectSlot, ObjectState, SlotId};

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

/// Reserved group value requesting any free buffer.
///
/// An acquisition under this group bypasses identity tracking entirely: the
/// returned object is never inserted into the hash index, cannot be hit by
/// other threads, and recycles to the fast-reuse end of the recency list on
/// release. Group `u32::MAX` is therefore not usable as a real identity.
pub const SCRATCH_GROUP: u32 = u32::MAX;

/// Outcome of one acquisition step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStep {
    /// The caller now owns the slot.
    Acquired(SlotId),
    /// The identity is owned by another thread; the caller has been
    /// registered as a waiter and must park on the slot, then poll with
    /// [`CacheEngine::poll_wait`] using the returned epoch.
    MustWait {
        /// Slot to park on.
        id: SlotId,
        /// Epoch observed at registration; a later mismatch means the
        /// object was invalidated while the caller slept.
        epoch: u64,
    },
    /// Miss with no idle object to recycle; the caller must wait for a
    /// release to refill the recency list, then retry the whole step.
    Exhausted,
}

/// Outcome of polling a parked wait after a wake-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPoll {
    /// Ownership was handed to this caller; the slot is its to use.
    Granted,
    /// The object was invalidated; the caller must retry the full lookup.
    /// Never surfaced to clients — the retry is internal and unbounded.
    Invalidated,
    /// Spurious wake-up; keep waiting.
    Pending,
}

/// What a release did, telling the caller whom to wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseEffect {
    /// Object became idle at the recency list head; one thread waiting for
    /// availability can proceed.
    Cached,
    /// Ownership passed directly to one registered waiter; wake exactly one
    /// thread parked on the slot.
    HandedOff,
    /// Identity discarded, slot queued at the recency list tail. If
    /// `had_waiters`, every thread parked on the slot must wake and retry;
    /// one thread waiting for availability can proceed either way.
    Recycled {
        /// Whether threads were parked on the slot when it was discarded.
        had_waiters: bool,
    },
}

/// The lock-held cache core: hash index, recency list, slot pool, counters.
///
/// All methods expect the cache-wide critical section to be held by the
/// caller and run in O(1) (lookups average O(1)); none of them block.
/// Protocol violations — releasing an unowned slot, unlinking an unlisted
/// one — are fatal assertions, because they mean the cache state or the
/// caller's accounting is already corrupt.
pub struct CacheEngine<S = DefaultHashBuilder> {
    slots: Box<[ObjectSlot]>,
    index: HashIndex<S>,
    lru: RecencyList,
    metrics: ObjectCacheMetrics,
}

impl CacheEngine<DefaultHashBuilder> {
    /// Creates an engine with the default hash builder.
    pub fn new(config: ObjectCacheConfig) -> Self {
        Self::with_hasher(config, DefaultHashBuilder::default())
    }
}

impl<S: BuildHasher> CacheEngine<S> {
    /// Creates an engine with a custom hash builder for bucket selection.
    ///
    /// Panics if the configuration violates its preconditions.
    pub fn with_hasher(config: ObjectCacheConfig, hash_builder: S) -> Self {
        config.validate();

        let n = config.objects.get();
        let mut slots: Box<[ObjectSlot]> = (0..n).map(|_| ObjectSlot::new()).collect();

        // All slots start invalid and idle, listed in slot order so slot 0
        // is the first recycling victim.
        let mut lru = RecencyList::new();
        for i in 0..n {
            lru.push_front(&mut slots, SlotId(i as u32));
        }

        CacheEngine {
            slots,
            index: HashIndex::new(config.hash_slots, hash_builder),
            lru,
            metrics: ObjectCacheMetrics::default(),
        }
    }

    /// Number of pool slots.
    #[inline]
    pub fn object_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of hash buckets.
    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.index.bucket_count()
    }

    /// Number of objects currently indexed (idle or owned).
    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True if nothing is indexed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.len() == 0
    }

    /// Number of idle objects, i.e. the recency list's length. This is the
    /// availability count the miss path waits on.
    #[inline]
    pub fn available(&self) -> usize {
        self.lru.len()
    }

    /// Number of currently owned objects.
    #[inline]
    pub fn owned_count(&self) -> usize {
        self.slots.len() - self.lru.len()
    }

    /// Engine counters.
    #[inline]
    pub fn metrics(&self) -> &ObjectCacheMetrics {
        &self.metrics
    }

    /// Canonical state of a slot.
    #[inline]
    pub fn state_of(&self, id: SlotId) -> ObjectState {
        self.slots[id.index()].state()
    }

    /// The slot's current `(group, key)` identity.
    #[inline]
    pub fn identity_of(&self, id: SlotId) -> (u32, u32) {
        let slot = &self.slots[id.index()];
        (slot.group, slot.key)
    }

    /// Whether the slot's payload is valid cached content.
    #[inline]
    pub fn is_cache_hit(&self, id: SlotId) -> bool {
        self.slots[id.index()].flags.contains(ObjectFlags::CACHE_HIT)
    }

    /// Whether the slot carries the modified marker.
    #[inline]
    pub fn is_modified(&self, id: SlotId) -> bool {
        self.slots[id.index()].flags.contains(ObjectFlags::MODIFIED)
    }

    /// One acquisition step for `(group, key)`.
    ///
    /// Never blocks; the two non-`Acquired` outcomes tell the caller what
    /// to park on. After any wait the caller retries this step (for
    /// `Exhausted`) or polls (for `MustWait`) — see the module docs.
    pub fn acquire_or_wait(&mut self, group: u32, key: u32) -> AcquireStep {
        if group == SCRATCH_GROUP {
            return match self.take_scratch() {
                Some(id) => AcquireStep::Acquired(id),
                None => AcquireStep::Exhausted,
            };
        }

        if let Some(id) = self.index.lookup(&self.slots, group, key) {
            if self.slots[id.index()].owned {
                // Owned by another thread: register as waiter.
                let slot = &mut self.slots[id.index()];
                slot.waiters += 1;
                let epoch = slot.epoch;
                self.metrics.record_object_wait();
                AcquireStep::MustWait { id, epoch }
            } else {
                self.seize_idle(id);
                AcquireStep::Acquired(id)
            }
        } else {
            match self.recycle_tail(group, key) {
                Some(id) => AcquireStep::Acquired(id),
                None => AcquireStep::Exhausted,
            }
        }
    }

    /// Non-blocking acquisition: like [`acquire_or_wait`] but refuses with
    /// `None` wherever that would have to wait. No waiter is registered.
    ///
    /// [`acquire_or_wait`]: CacheEngine::acquire_or_wait
    pub fn try_acquire(&mut self, group: u32, key: u32) -> Option<SlotId> {
        if group == SCRATCH_GROUP {
            return self.take_scratch();
        }
        if let Some(id) = self.index.lookup(&self.slots, group, key) {
            if self.slots[id.index()].owned {
                None
            } else {
                self.seize_idle(id);
                Some(id)
            }
        } else {
            self.recycle_tail(group, key)
        }
    }

    /// Takes any idle buffer, bypassing identity tracking. The returned
    /// slot is owned and unindexed; `None` when every object is owned.
    pub fn take_scratch(&mut self) -> Option<SlotId> {
        let id = self.lru.pop_back(&mut self.slots)?;
        if self.slots[id.index()].flags.contains(ObjectFlags::IN_HASH) {
            self.index.remove(&mut self.slots, id);
        }

        let slot = &mut self.slots[id.index()];
        debug_assert!(slot.waiters == 0 && slot.grants == 0);
        slot.clear_identity();
        slot.group = SCRATCH_GROUP;
        slot.owned = true;
        self.metrics.record_scratch();
        Some(id)
    }

    /// Polls a registered wait after a wake-up on the slot.
    ///
    /// `waiters` counts current-epoch registrations only: a discard wipes
    /// the whole count along with the identity, so a stale poll just
    /// observes the epoch mismatch and walks away.
    pub fn poll_wait(&mut self, id: SlotId, epoch: u64) -> WaitPoll {
        let slot = &mut self.slots[id.index()];

        if slot.epoch != epoch {
            // Identity discarded while we slept; the registration was
            // wiped with it. Retry the lookup.
            return WaitPoll::Invalidated;
        }

        debug_assert!(slot.waiters > 0, "poll without a registered wait");
        if slot.grants > 0 {
            slot.grants -= 1;
            slot.waiters -= 1;
            debug_assert!(slot.owned);
            self.metrics.record_handoff_received();
            WaitPoll::Granted
        } else {
            WaitPoll::Pending
        }
    }

    /// Deregisters a wait that is being abandoned (timeout, cancellation).
    ///
    /// Returns `true` when a hand-off raced the cancellation and was
    /// consumed: the caller owns the slot after all and must treat the
    /// acquisition as successful.
    pub fn cancel_wait(&mut self, id: SlotId, epoch: u64) -> bool {
        let slot = &mut self.slots[id.index()];

        if slot.epoch != epoch {
            // Registration already wiped by a discard; nothing to undo.
            return false;
        }

        debug_assert!(slot.waiters > 0, "cancel without a registered wait");
        if slot.grants > 0 {
            slot.grants -= 1;
            slot.waiters -= 1;
            self.metrics.record_handoff_received();
            true
        } else {
            slot.waiters -= 1;
            false
        }
    }

    /// Sets the error marker: release will discard the object's identity.
    pub fn set_error(&mut self, id: SlotId) {
        debug_assert!(self.slots[id.index()].owned);
        self.slots[id.index()].flags.insert(ObjectFlags::ERROR);
    }

    /// Sets or clears the modified marker. The engine preserves it across
    /// idle periods but never interprets it.
    pub fn set_modified(&mut self, id: SlotId, modified: bool) {
        debug_assert!(self.slots[id.index()].owned);
        self.slots[id.index()]
            .flags
            .set(ObjectFlags::MODIFIED, modified);
    }

    /// Declares the payload valid (or garbage). A valid payload makes the
    /// next acquisition of this identity a cache hit.
    pub fn set_valid(&mut self, id: SlotId, valid: bool) {
        debug_assert!(self.slots[id.index()].owned);
        self.slots[id.index()]
            .flags
            .set(ObjectFlags::CACHE_HIT, valid);
    }

    /// Releases an owned slot according to its flags.
    ///
    /// - `ERROR` set: the identity is removed from the index, the slot
    ///   reverts to invalid and queues at the recency list **tail** for
    ///   fastest reuse. Parked waiters observe the epoch change and retry.
    /// - waiters registered: ownership transfers to exactly one of them;
    ///   the slot is otherwise untouched (it stays indexed and owned).
    /// - otherwise: the slot parks at the recency list **head**, indexed
    ///   and idle, `MODIFIED` preserved.
    ///
    /// Scratch (unindexed) slots always take the first path, minus the
    /// index removal; they cannot have waiters.
    ///
    /// The returned effect tells the caller which parked threads to wake.
    /// Releasing a slot that is not owned, or one already in the recency
    /// list, is a protocol violation and panics.
    pub fn release(&mut self, id: SlotId) -> ReleaseEffect {
        let slot = &self.slots[id.index()];
        assert!(slot.owned, "release of an unowned object");
        assert!(
            !slot.flags.contains(ObjectFlags::IN_LRU),
            "released object already in recency list"
        );
        debug_assert_eq!(slot.grants, 0, "release with a pending hand-off");

        // Scratch buffers and erroneous objects are discarded: identity
        // cleared, queued for immediate reuse.
        let indexed = slot.flags.contains(ObjectFlags::IN_HASH);
        if !indexed || slot.flags.contains(ObjectFlags::ERROR) {
            if indexed {
                self.index.remove(&mut self.slots, id);
                self.metrics.record_discard();
            }
            let slot = &mut self.slots[id.index()];
            let had_waiters = slot.waiters > 0;
            // Registrations die with the identity: waiters wake to an
            // epoch mismatch and re-run the lookup, so none of them will
            // come back to decrement this count.
            slot.waiters = 0;
            slot.owned = false;
            slot.clear_identity();
            self.lru.push_back(&mut self.slots, id);
            return ReleaseEffect::Recycled { had_waiters };
        }

        let slot = &mut self.slots[id.index()];
        if slot.waiters > 0 {
            // Direct hand-off: the slot never touches the recency list and
            // remains owned — by the waiter we are about to wake.
            slot.grants = 1;
            self.metrics.record_handoff();
            return ReleaseEffect::HandedOff;
        }

        slot.owned = false;
        self.lru.push_front(&mut self.slots, id);
        ReleaseEffect::Cached
    }

    /// Counts a park on the availability wait. The blocking layer calls
    /// this before suspending on an `Exhausted` outcome.
    pub fn record_pool_wait(&mut self) {
        self.metrics.record_pool_wait();
    }

    /// Verifies the structural invariants, panicking on any violation.
    ///
    /// Intended for tests and debugging at quiescent points (no thread
    /// parked mid-acquisition). Checks:
    ///
    /// 1. every slot is in exactly one canonical state — owned xor listed;
    /// 2. `available() + owned == objects`;
    /// 3. no two indexed slots share an identity;
    /// 4. link structures are intact (no cycles, lengths consistent) and
    ///    agree with the membership flags.
    pub fn check_invariants(&self) {
        let n = self.slots.len();
        let mut listed = vec![false; n];

        self.lru.for_each(&self.slots, |id| {
            let slot = &self.slots[id.index()];
            listed[id.index()] = true;
            assert!(
                slot.flags.contains(ObjectFlags::IN_LRU),
                "listed slot missing IN_LRU"
            );
            assert!(!slot.owned, "owned object in recency list");
            assert_eq!(slot.grants, 0, "idle slot with pending hand-off");
            assert_eq!(slot.waiters, 0, "idle slot with registered waiters");
        });

        let mut owned = 0usize;
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.owned {
                owned += 1;
                assert!(!listed[i], "owned object in recency list");
            } else {
                assert!(listed[i], "idle object missing from recency list");
            }
            assert_eq!(
                slot.flags.contains(ObjectFlags::IN_LRU),
                listed[i],
                "IN_LRU flag disagrees with list membership"
            );
        }
        assert_eq!(self.lru.len() + owned, n, "availability accounting broken");

        let mut indexed_flags = 0usize;
        for slot in self.slots.iter() {
            if slot.flags.contains(ObjectFlags::IN_HASH) {
                indexed_flags += 1;
            } else {
                assert!(
                    slot.owned || !slot.flags.contains(ObjectFlags::CACHE_HIT),
                    "unindexed idle slot claims cached content"
                );
            }
        }

        let mut identities: Vec<(u32, u32)> = Vec::with_capacity(self.index.len());
        self.index.for_each(&self.slots, |id| {
            let slot = &self.slots[id.index()];
            assert!(
                slot.flags.contains(ObjectFlags::IN_HASH),
                "chained slot missing IN_HASH"
            );
            identities.push((slot.group, slot.key));
        });
        assert_eq!(indexed_flags, identities.len(), "IN_HASH flag leak");

        identities.sort_unstable();
        for pair in identities.windows(2) {
            assert_ne!(pair[0], pair[1], "duplicate identity in hash index");
        }
    }

    // -- internal steps ----------------------------------------------------

    /// Hit on an idle object: unlink from the recency list, take ownership.
    fn seize_idle(&mut self, id: SlotId) {
        self.lru.unlink(&mut self.slots, id);
        let slot = &mut self.slots[id.index()];
        debug_assert!(!slot.owned);
        slot.owned = true;
        self.metrics.record_hit();
    }

    /// Miss: recycle the recency list tail under the new identity.
    fn recycle_tail(&mut self, group: u32, key: u32) -> Option<SlotId> {
        let id = self.lru.pop_back(&mut self.slots)?;
        if self.slots[id.index()].flags.contains(ObjectFlags::IN_HASH) {
            // Discarding a cached-but-idle object to make room.
            self.index.remove(&mut self.slots, id);
        }

        let slot = &mut self.slots[id.index()];
        debug_assert!(slot.waiters == 0 && slot.grants == 0);
        slot.clear_identity();
        slot.group = group;
        slot.key = key;
        slot.owned = true;
        self.index.insert(&mut self.slots, id);
        self.metrics.record_recycle();
        Some(id)
    }
}

impl<S> core::fmt::Debug for CacheEngine<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("objects", &self.slots.len())
            .field("buckets", &self.index.bucket_count())
            .field("indexed", &self.index.len())
            .field("available", &self.lru.len())
            .finish()
    }
}
