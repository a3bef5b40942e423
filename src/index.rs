//! Hash index: maps `(group, key)` identities to pool slots.
//!
//! A fixed, power-of-two array of bucket heads with collision chains
//! threaded through the slot pool via index links, the same intrusive
//! arrangement as the recency list. Insertion is at the chain head, so the
//! newest colliding identity is found first; no other ordering among
//! colliding keys is promised. The table never resizes — degenerate chains
//! are a capacity-planning concern, not a correctness one.
//!
//! Bucket selection is `hash(group, key) & (buckets - 1)` with a pluggable
//! [`BuildHasher`]. The default is a mixing hasher; identities that are
//! already well distributed (consecutive sector numbers, say) can opt into
//! the cheaper [`AdditiveHashBuilder`], which folds the identity words
//! together and relies on the mask alone.

use core::hash::{BuildHasher, Hasher};

use crate::slot::{ObjectFlags, ObjectSlot, SlotId, NIL};

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec;

/// The crate-wide default hash builder for bucket selection.
#[cfg(feature = "hashbrown")]
pub use hashbrown::DefaultHashBuilder;

#[cfg(all(not(feature = "hashbrown"), feature = "std"))]
extern crate std;

/// The crate-wide default hash builder for bucket selection.
#[cfg(all(not(feature = "hashbrown"), feature = "std"))]
pub use std::collections::hash_map::RandomState as DefaultHashBuilder;

/// The crate-wide default hash builder for bucket selection.
#[cfg(all(not(feature = "hashbrown"), not(feature = "std")))]
pub use self::AdditiveHashBuilder as DefaultHashBuilder;

/// Build hasher that sums the written words.
///
/// Deterministic and essentially free, but it distributes identities only
/// as well as the identities distribute themselves: `(group, key)` pairs
/// that increment in lockstep land in consecutive buckets, which is ideal
/// for sector-style keys and terrible for pointers or hashes-of-names.
#[derive(Clone, Copy, Default, Debug)]
pub struct AdditiveHashBuilder;

impl BuildHasher for AdditiveHashBuilder {
    type Hasher = AdditiveHasher;

    #[inline]
    fn build_hasher(&self) -> AdditiveHasher {
        AdditiveHasher { sum: 0 }
    }
}

/// Hasher for [`AdditiveHashBuilder`].
#[derive(Debug)]
pub struct AdditiveHasher {
    sum: u64,
}

impl Hasher for AdditiveHasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.sum
    }

    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.sum = self.sum.wrapping_add(u64::from(b));
        }
    }

    #[inline]
    fn write_u32(&mut self, i: u32) {
        self.sum = self.sum.wrapping_add(u64::from(i));
    }

    #[inline]
    fn write_u64(&mut self, i: u64) {
        self.sum = self.sum.wrapping_add(i);
    }

    #[inline]
    fn write_usize(&mut self, i: usize) {
        self.sum = self.sum.wrapping_add(i as u64);
    }
}

/// Fixed-size hash table over pool slots.
///
/// Membership is mirrored in each slot's `IN_HASH` flag, maintained here.
pub(crate) struct HashIndex<S> {
    buckets: Box<[u32]>,
    hash_builder: S,
    len: usize,
}

impl<S: BuildHasher> HashIndex<S> {
    /// `bucket_count` must be a power of two; validated by the engine's
    /// configuration checks before we get here.
    pub fn new(bucket_count: usize, hash_builder: S) -> Self {
        debug_assert!(bucket_count.is_power_of_two());
        HashIndex {
            buckets: vec![NIL; bucket_count].into_boxed_slice(),
            hash_builder,
            len: 0,
        }
    }

    #[inline]
    fn bucket_of(&self, group: u32, key: u32) -> usize {
        (self.hash_builder.hash_one((group, key)) as usize) & (self.buckets.len() - 1)
    }

    /// Finds the slot indexed under `(group, key)`, if any.
    pub fn lookup(&self, slots: &[ObjectSlot], group: u32, key: u32) -> Option<SlotId> {
        let mut cursor = self.buckets[self.bucket_of(group, key)];
        while cursor != NIL {
            let slot = &slots[cursor as usize];
            if slot.group == group && slot.key == key {
                return Some(SlotId(cursor));
            }
            cursor = slot.hash_next;
        }
        None
    }

    /// Links a slot into its bucket's chain head. The slot's identity
    /// fields must already be set; the caller guarantees the identity is
    /// not currently indexed.
    pub fn insert(&mut self, slots: &mut [ObjectSlot], id: SlotId) {
        let i = id.0;
        debug_assert!(!slots[i as usize].flags.contains(ObjectFlags::IN_HASH));

        let bucket = self.bucket_of(slots[i as usize].group, slots[i as usize].key);
        let head = self.buckets[bucket];

        let slot = &mut slots[i as usize];
        slot.hash_prev = NIL;
        slot.hash_next = head;
        slot.flags.insert(ObjectFlags::IN_HASH);

        if head != NIL {
            slots[head as usize].hash_prev = i;
        }
        self.buckets[bucket] = i;
        self.len += 1;
    }

    /// Unlinks a slot from its bucket's chain.
    ///
    /// Panics if the slot is not indexed; removing an unindexed object
    /// means the cache state is corrupt.
    pub fn remove(&mut self, slots: &mut [ObjectSlot], id: SlotId) {
        let i = id.0;
        assert!(
            slots[i as usize].flags.contains(ObjectFlags::IN_HASH),
            "slot not in hash index"
        );

        let bucket = self.bucket_of(slots[i as usize].group, slots[i as usize].key);
        let (prev, next) = {
            let slot = &mut slots[i as usize];
            let links = (slot.hash_prev, slot.hash_next);
            slot.hash_prev = NIL;
            slot.hash_next = NIL;
            slot.flags.remove(ObjectFlags::IN_HASH);
            links
        };

        if prev != NIL {
            slots[prev as usize].hash_next = next;
        } else {
            debug_assert_eq!(self.buckets[bucket], i);
            self.buckets[bucket] = next;
        }
        if next != NIL {
            slots[next as usize].hash_prev = prev;
        }
        self.len -= 1;
    }

    /// Walks every chain, calling `f` with each indexed slot. Used by the
    /// invariant checker.
    pub fn for_each(&self, slots: &[ObjectSlot], mut f: impl FnMut(SlotId)) {
        let mut seen = 0usize;
        for &head in self.buckets.iter() {
            let mut cursor = head;
            while cursor != NIL {
                f(SlotId(cursor));
                seen += 1;
                assert!(seen <= self.len, "hash chain cycle");
                cursor = slots[cursor as usize].hash_next;
            }
        }
        assert_eq!(seen, self.len, "hash index length mismatch");
    }
}

impl<S> HashIndex<S> {
    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of indexed slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }
}

impl<S> core::fmt::Debug for HashIndex<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HashIndex")
            .field("buckets", &self.buckets.len())
            .field("len", &self.len)
            .finish()
    }
}
