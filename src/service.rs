//! Service Module
//!
//! `DataLayer` is the explicit service object the host application builds
//! once at startup and hands to its feature stores by reference. It wires
//! the cache, rate limiter, request executor, and connection manager
//! together from one `Config`, replacing hidden global singletons while
//! keeping "one instance per app" semantics.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::{CacheStore, PersistencePort};
use crate::config::Config;
use crate::executor::{
    HttpTransport, ReqwestTransport, RequestExecutor, SharedCache, SharedLimiter, TokenProvider,
};
use crate::limiter::RateLimiter;
use crate::push::{ConnectionManager, PushTransport, ReconnectPolicy};
use crate::tasks::spawn_sweep_task;

/// Key prefix for the response cache's durable mirror.
const CACHE_PREFIX: &str = "datalink:";

// == Builder ==
/// Assembles a `DataLayer` from a config plus injected ports.
pub struct DataLayerBuilder {
    config: Config,
    http_transport: Arc<dyn HttpTransport>,
    push_transport: Option<Arc<dyn PushTransport>>,
    persistence: Option<Arc<dyn PersistencePort>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
}

impl DataLayerBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            http_transport: Arc::new(ReqwestTransport::new()),
            push_transport: None,
            persistence: None,
            token_provider: None,
        }
    }

    /// Replaces the default reqwest transport (tests inject scripted ones).
    pub fn http_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.http_transport = transport;
        self
    }

    /// Enables the push channel over the given transport.
    pub fn push_transport(mut self, transport: Arc<dyn PushTransport>) -> Self {
        self.push_transport = Some(transport);
        self
    }

    /// Enables the cache's durable mirror.
    pub fn persistence(mut self, persistence: Arc<dyn PersistencePort>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Attaches the session's credential holder.
    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn build(self) -> DataLayer {
        let cache: SharedCache = Arc::new(RwLock::new(match self.persistence {
            Some(port) => CacheStore::with_persistence(
                self.config.max_cache_size,
                self.config.default_ttl_ms,
                port,
                CACHE_PREFIX,
            ),
            None => CacheStore::new(self.config.max_cache_size, self.config.default_ttl_ms),
        }));
        let limiter: SharedLimiter = Arc::new(Mutex::new(RateLimiter::new()));

        let mut executor = RequestExecutor::new(
            self.config.clone(),
            self.http_transport,
            cache.clone(),
            limiter.clone(),
        );
        if let Some(provider) = self.token_provider {
            executor = executor.with_token_provider(provider);
        }

        let connection = self.push_transport.map(|transport| {
            ConnectionManager::with_cache(
                transport,
                ReconnectPolicy::from_config(&self.config),
                cache.clone(),
            )
        });

        let sweep = spawn_sweep_task(cache.clone(), self.config.sweep_interval_ms);
        info!("data layer initialized");

        DataLayer {
            cache,
            limiter,
            executor: Arc::new(executor),
            connection,
            sweep,
        }
    }
}

// == Data Layer ==
/// The assembled data-access subsystem.
pub struct DataLayer {
    cache: SharedCache,
    limiter: SharedLimiter,
    executor: Arc<RequestExecutor>,
    connection: Option<ConnectionManager>,
    sweep: JoinHandle<()>,
}

impl DataLayer {
    /// Starts building a layer from `config`.
    pub fn builder(config: Config) -> DataLayerBuilder {
        DataLayerBuilder::new(config)
    }

    /// The shared response cache.
    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    /// The shared rate limiter.
    pub fn limiter(&self) -> &SharedLimiter {
        &self.limiter
    }

    /// The request executor feature stores issue calls through.
    pub fn executor(&self) -> &Arc<RequestExecutor> {
        &self.executor
    }

    /// The push-channel manager, when one was configured.
    pub fn connection(&self) -> Option<&ConnectionManager> {
        self.connection.as_ref()
    }

    /// Tears down the push connection and stops background maintenance.
    pub fn shutdown(&self) {
        if let Some(connection) = &self.connection {
            connection.disconnect();
        }
        self.sweep.abort();
        info!("data layer shut down");
    }
}

impl Drop for DataLayer {
    fn drop(&mut self) {
        if let Some(connection) = &self.connection {
            connection.disconnect();
        }
        self.sweep.abort();
    }
}
