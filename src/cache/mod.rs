//! In-memory query cache for resource reads.
//!
//! - Entries are keyed by resource family, operation and a parameter fingerprint
//! - Concurrent reads of one key share a single in-flight fetch
//! - Stale entries are served while a background refetch runs
//! - Mutations invalidate key prefixes through a static rule table

pub mod invalidation;
mod key;
mod layer;
mod result;

pub use invalidation::{InvalidationMapper, InvalidationRule, Target};
pub use key::{CacheKey, Fingerprint, KeyPrefix};
pub use layer::{CacheEvent, CacheStatus, QueryCache, ReadMode};
pub use result::{CacheResult, CacheSource};
