#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Code Reference
//!
//! This section summarizes the moving parts and how an acquisition travels
//! through them.
//!
//! ## Anatomy
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                       ObjectCache (one Mutex)                         │
//! │                                                                       │
//! │   hash index                 slot pool               recency list     │
//! │  ┌──────────┐      ┌───────────────────────────┐    ┌────────────┐    │
//! │  │ bucket 0 ─┼────▶│ slot 0  (grp,key) flags ◀─┼────┼─ front     │    │
//! │  │ bucket 1  │      │ slot 1   owned? waiters  │    │   ...      │    │
//! │  │   ...    │      │  ...                      │    │  back ◀── next  │
//! │  │ bucket M-1│      │ slot N-1                 │    │       victim    │
//! │  └──────────┘      └───────────────────────────┘    └────────────┘    │
//! │        collision chains and recency links are slot indices,           │
//! │        threaded through the same fixed pool records                   │
//! └───────────────────────────────────────────────────────────────────────┘
//!         payload buffers (BufferPool) live outside the mutex and are
//!         touched only by each slot's current owner
//! ```
//!
//! ## An acquisition, end to end
//!
//! | Situation                  | What happens                                    | Returned as |
//! |----------------------------|-------------------------------------------------|-------------|
//! | identity cached, idle      | unlinked from the recency list, owned           | hit         |
//! | identity cached, owned     | park on the slot; owner hands off on release    | hit         |
//! | identity unknown, pool has idle buffers | recency-list tail recycled, retagged, indexed | miss (populate me) |
//! | identity unknown, all owned| park until any release, then retry the lookup   | hit or miss |
//! | owner discarded it (error) | waiters wake, retry, and take the miss path     | miss        |
//!
//! The miss/hit distinction reaches the caller as
//! [`ObjectLease::is_cache_hit`]; nothing else about the path taken is
//! observable, and no path returns a failure.
//!
//! ## Layering
//!
//! | Layer | Type | Locking | Feature |
//! |-------|------|---------|---------|
//! | blocking cache | [`ObjectCache`] / [`ObjectLease`] | internal (`parking_lot`) | `concurrent` |
//! | state machine  | [`CacheEngine`] | caller-provided | always |
//! | storage        | [`BufferPool`]  | ownership protocol | always |
//!
//! The engine layer exists on its own so that environments with their own
//! critical-section and parking primitives (RTOS ports, deterministic test
//! harnesses) can drive the identical state machine; `ObjectCache` is that
//! same machine driven by a mutex and condvars.
//!
//! ## Modules
//!
//! - [`cache`]: blocking cache and lease (feature `concurrent`)
//! - [`engine`]: the lock-held acquire/release state machine
//! - [`index`]: hash index and hash builders
//! - [`pool`]: payload buffer storage
//! - [`media`]: storage backend trait
//! - [`config`]: cache configuration
//! - [`metrics`]: counters and the reporting trait
//! - [`slot`]: slot records, flags and states

#![no_std]

/// Pool slot records: identity, flags, ownership bookkeeping, link fields.
pub mod slot;

/// Recency (idle-object) list threaded through the slot pool.
///
/// **Note**: internal infrastructure; the engine is its only client.
pub(crate) mod list;

/// Hash index mapping `(group, key)` identities to pool slots, plus the
/// pluggable hash builders for bucket selection.
pub mod index;

/// Cache configuration structure and its fatal validation.
pub mod config;

/// The lock-held cache engine: the acquire/release state machine exposed
/// as explicit non-blocking steps.
pub mod engine;

/// Fixed pool of payload buffers with ownership-gated access.
pub mod pool;

/// Media backend trait: how payloads move to and from slow storage.
pub mod media;

/// Cache metrics: counters plus a BTreeMap-based reporting trait.
pub mod metrics;

/// Blocking object cache built on the engine with `parking_lot`.
///
/// Available when the `concurrent` feature is enabled.
#[cfg(feature = "concurrent")]
pub mod cache;

// Re-export the main cache types
#[cfg(feature = "concurrent")]
pub use cache::{ObjectCache, ObjectLease};
pub use engine::{AcquireStep, CacheEngine, ReleaseEffect, WaitPoll, SCRATCH_GROUP};

// Re-export the configuration and collaborator types
pub use config::ObjectCacheConfig;
pub use index::{AdditiveHashBuilder, DefaultHashBuilder};
pub use media::{MediaBackend, NullMedia};
pub use pool::BufferPool;

// Re-export metrics and slot vocabulary
pub use metrics::{CacheMetrics, ObjectCacheMetrics};
pub use slot::{ObjectFlags, ObjectState, SlotId};
