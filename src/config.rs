//! Cache configuration.
//!
//! A single public-field configuration struct; just create it with all
//! fields set. Validation happens once at initialization and is fatal:
//! a cache dimensioned wrong cannot limp along, so misconfiguration halts
//! startup rather than surfacing as a runtime error value.
//!
//! # Sizing Guidelines
//!
//! - **`objects`** bounds the working set: it is the number of payload
//!   buffers that exist, and therefore the number of objects that can be
//!   owned or cached at any instant. A thread acquiring a new identity when
//!   all objects are owned blocks until one is released.
//! - **`hash_slots`** only affects lookup speed, never capacity. It must be
//!   a power of two (bucket selection is masked, not divided) and at least
//!   `objects`; a factor of two over `objects` keeps collision chains short
//!   for most workloads.
//! - **`buffer_size`** is the payload size every slot carries, typically
//!   the media's sector or page size.

use core::num::NonZeroUsize;

/// Configuration for an object cache.
///
/// # Example
///
/// ```
/// use objcache_rs::ObjectCacheConfig;
/// use core::num::NonZeroUsize;
///
/// // 32 buffers of 512 bytes, 64 hash slots for short chains.
/// let config = ObjectCacheConfig {
///     hash_slots: 64,
///     objects: NonZeroUsize::new(32).unwrap(),
///     buffer_size: 512,
/// };
/// config.validate();
/// ```
#[derive(Clone, Copy, Debug)]
pub struct ObjectCacheConfig {
    /// Number of hash buckets. Must be a power of two and >= `objects`.
    pub hash_slots: usize,
    /// Number of pool slots (and payload buffers).
    pub objects: NonZeroUsize,
    /// Payload buffer size in bytes.
    pub buffer_size: usize,
}

impl ObjectCacheConfig {
    /// Checks the dimensioning preconditions, panicking on violation.
    ///
    /// Called by the engine and cache constructors; public so that
    /// configuration loaded from elsewhere can be vetted early.
    pub fn validate(&self) {
        assert!(
            self.hash_slots.is_power_of_two(),
            "hash_slots must be a power of two, got {}",
            self.hash_slots
        );
        assert!(
            self.hash_slots >= self.objects.get(),
            "hash_slots ({}) must be >= objects ({})",
            self.hash_slots,
            self.objects
        );
        // Slot links are u32 indices with u32::MAX reserved as nil.
        assert!(
            self.objects.get() < u32::MAX as usize,
            "objects ({}) exceeds the addressable pool size",
            self.objects
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(hash_slots: usize, objects: usize) -> ObjectCacheConfig {
        ObjectCacheConfig {
            hash_slots,
            objects: NonZeroUsize::new(objects).unwrap(),
            buffer_size: 64,
        }
    }

    #[test]
    fn test_valid_config() {
        config(8, 8).validate();
        config(16, 3).validate();
        config(1, 1).validate();
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_non_power_of_two_hash_slots() {
        config(12, 8).validate();
    }

    #[test]
    #[should_panic(expected = "must be >=")]
    fn test_hash_slots_smaller_than_pool() {
        config(4, 8).validate();
    }
}
