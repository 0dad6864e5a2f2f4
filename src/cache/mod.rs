//! Cache Module
//!
//! In-memory response caching with TTL expiry, LRU eviction, and an
//! optional durable mirror behind an injectable persistence port.

mod entry;
mod lru;
mod persist;
mod stats;
mod store;


// Re-export public types
pub use entry::{now_ms, CacheEntry};
pub use lru::LruTracker;
pub use persist::{MemoryPersistence, PersistencePort};
pub use stats::{CacheStats, StatsSnapshot};
pub use store::CacheStore;
