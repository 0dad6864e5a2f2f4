//! Rate Limiter Module
//!
//! Sliding-window counters per logical key. Gates the request executor's
//! network path: a blocked key fails fast before any attempt is made.

use std::collections::HashMap;

use tracing::debug;

use crate::cache::now_ms;

// == Rate Limit Entry ==
/// Window bookkeeping for one key.
#[derive(Debug, Clone)]
pub struct RateLimitEntry {
    /// Calls observed in the current window
    pub count: u32,
    /// Threshold the window was opened with
    pub limit: u32,
    /// Unix-ms timestamp when the window resets
    pub window_reset_at: u64,
    /// True once the window's budget is spent
    pub blocked: bool,
}

// == Rate Limiter ==
/// Sliding-window rate limiter keyed by logical request class.
#[derive(Debug, Default)]
pub struct RateLimiter {
    entries: HashMap<String, RateLimitEntry>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    // == Check And Increment ==
    /// Counts one call against `key` and reports whether it is allowed.
    ///
    /// The first use of a key opens a window of `window_ms`. Calls within an
    /// active window increment the counter; once it exceeds `limit` the key
    /// is blocked and every later call is rejected until the window lapses.
    /// The call that observes a lapsed window opens a fresh one and is
    /// allowed with the counter back at 1.
    pub fn check_and_increment(&mut self, key: &str, limit: u32, window_ms: u64) -> bool {
        let now = now_ms();
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry {
                count: 0,
                limit,
                window_reset_at: now + window_ms,
                blocked: false,
            });

        if now > entry.window_reset_at {
            entry.count = 0;
            entry.limit = limit;
            entry.window_reset_at = now + window_ms;
            entry.blocked = false;
        }

        entry.count += 1;
        if entry.count > entry.limit {
            if !entry.blocked {
                debug!(%key, limit, "rate limit window exhausted");
            }
            entry.blocked = true;
        }
        !entry.blocked
    }

    // == Remaining ==
    /// Calls left in the key's current window; `limit` for unknown or
    /// lapsed keys. Pure read, no side effects.
    pub fn remaining(&self, key: &str) -> Option<u32> {
        let entry = self.entries.get(key)?;
        if now_ms() > entry.window_reset_at {
            return Some(entry.limit);
        }
        Some(entry.limit.saturating_sub(entry.count))
    }

    // == Reset In ==
    /// Milliseconds until the key's window resets; 0 if already lapsed or
    /// unknown. Pure read, no side effects.
    pub fn reset_in(&self, key: &str) -> u64 {
        self.entries
            .get(key)
            .map(|entry| entry.window_reset_at.saturating_sub(now_ms()))
            .unwrap_or(0)
    }
}
