//! Cache Entry Module
//!
//! Defines the structure for individual cached responses with TTL and
//! access-tracking metadata.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

// == Cache Entry ==
/// A single cached value with its lifetime and access metadata.
///
/// An entry is readable only while `now - created_at <= ttl_ms`; once that
/// bound is exceeded it is logically absent regardless of physical presence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// The cached value
    pub value: T,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Lifetime in milliseconds from creation
    pub ttl_ms: u64,
    /// Number of reads served from this entry
    pub access_count: u64,
    /// Timestamp of the most recent read (Unix milliseconds)
    pub last_accessed_at: u64,
}

impl<T> CacheEntry<T> {
    // == Constructor ==
    /// Creates a new entry stamped at the current time.
    pub fn new(value: T, ttl_ms: u64) -> Self {
        let now = now_ms();
        Self {
            value,
            created_at: now,
            ttl_ms,
            access_count: 0,
            last_accessed_at: now,
        }
    }

    // == Is Expired ==
    /// Checks whether the entry's lifetime has elapsed.
    ///
    /// The entry remains readable while `now - created_at <= ttl_ms`, so an
    /// entry read exactly at its TTL boundary is still served.
    pub fn is_expired(&self) -> bool {
        now_ms().saturating_sub(self.created_at) > self.ttl_ms
    }

    // == Touch ==
    /// Records a read: bumps the access counter and last-access timestamp.
    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed_at = now_ms();
    }

    // == Remaining TTL ==
    /// Returns the remaining lifetime in milliseconds (0 once expired).
    pub fn ttl_remaining_ms(&self) -> u64 {
        let deadline = self.created_at + self.ttl_ms;
        deadline.saturating_sub(now_ms())
    }
}

// == Utility Functions ==
/// Returns the current Unix timestamp in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}
