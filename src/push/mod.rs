//! Push Module
//!
//! Push-channel connection management: one bidirectional connection per
//! application session, capped exponential-backoff reconnection, and topic
//! multiplexing with server-driven cache invalidation.

mod manager;
mod transport;

// Re-export public types
pub use manager::{
    ConnectionManager, ConnectionState, ReconnectPolicy, SubscriptionHandle, TopicHandler,
    CACHE_INVALIDATE_TYPE,
};
pub use transport::{derive_endpoint, ControlMessage, PushChannel, PushEnvelope, PushTransport};
