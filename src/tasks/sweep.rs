//! Cache Sweep Task
//!
//! Background task that periodically removes expired cache entries, so
//! entries nobody touches still get purged between lazy expirations.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheStore;

/// Spawns the periodic sweep over a shared cache.
///
/// The task loops forever, sleeping `interval_ms` between sweeps; abort the
/// returned handle during teardown.
pub fn spawn_sweep_task<T>(
    cache: Arc<RwLock<CacheStore<T>>>,
    interval_ms: u64,
) -> JoinHandle<()>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let interval = Duration::from_millis(interval_ms);

    tokio::spawn(async move {
        info!(interval_ms, "cache sweep task started");

        loop {
            tokio::time::sleep(interval).await;

            let removed = {
                let mut cache = cache.write().await;
                cache.cleanup_expired()
            };

            if removed > 0 {
                info!(removed, "cache sweep removed expired entries");
            } else {
                debug!("cache sweep found nothing expired");
            }
        }
    })
}
