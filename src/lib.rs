//! Datalink - resilient client-side data access
//!
//! The data-access layer of a video-subscription client: a TTL/LRU response
//! cache with optional durable persistence, a request executor with
//! retry/backoff/timeout/cancellation, a push-channel connection manager
//! with capped exponential-backoff reconnection, and an optimistic
//! state-mutation container, gated by a sliding-window rate limiter.

pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod limiter;
pub mod optimistic;
pub mod push;
pub mod service;
pub mod tasks;

pub use config::{Config, RateLimitPolicy};
pub use error::{DataError, Result};
pub use executor::{Connectivity, Method, RequestDescriptor, RequestExecutor};
pub use optimistic::OptimisticStore;
pub use push::{ConnectionManager, ConnectionState};
pub use service::DataLayer;
pub use tasks::spawn_sweep_task;

/// Initializes a default tracing subscriber for host applications that do
/// not bring their own. Defaults to "info", overridable with `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "datalink=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
