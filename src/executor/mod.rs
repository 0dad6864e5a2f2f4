//! Request Executor Module
//!
//! Performs one logical remote call with caching, rate limiting, retry with
//! exponential backoff, per-attempt timeout, and cancellation by cache key.
//! Returns a success payload or a single classified `DataError`.

mod descriptor;
mod transport;

pub use descriptor::{Method, RequestDescriptor};
pub use transport::{HttpTransport, RawResponse, ReqwestTransport, TokenProvider};

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::config::Config;
use crate::error::{DataError, Result};
use crate::limiter::RateLimiter;

// == Connectivity ==
/// Coarse network-health signal observable by dependents (UI banners and
/// the like); not part of any call's return contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Connected,
    Disconnected,
    Reconnecting,
}

// == Api Envelope ==
/// Response envelope used by the remote API. Only consulted for error
/// extraction on non-2xx responses; successful bodies are decoded as raw
/// JSON and unwrapped from their `data` field when present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiEnvelope {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub meta: Option<Value>,
}

// == Retry State ==
/// Transient attempt bookkeeping, scoped to one `execute` call.
#[derive(Debug)]
struct RetryState {
    attempt: u32,
    max_attempts: u32,
    last_error: Option<DataError>,
}

impl RetryState {
    fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts: max_attempts.max(1),
            last_error: None,
        }
    }

    fn begin_attempt(&mut self) {
        self.attempt += 1;
    }

    fn has_attempts_left(&self) -> bool {
        self.attempt < self.max_attempts
    }
}

/// Shared handle to the response cache the executor reads and writes.
pub type SharedCache = Arc<RwLock<CacheStore<Value>>>;

/// Shared handle to the rate limiter gating the network path.
pub type SharedLimiter = Arc<Mutex<RateLimiter>>;

// == Inflight Registry ==
/// Cancellation senders for every in-flight call, keyed by cache key.
/// Overlapping calls with an equal key are one logical request: `cancel`
/// signals all of them.
#[derive(Default)]
struct InflightRegistry {
    entries: HashMap<String, Vec<(u64, watch::Sender<bool>)>>,
    next_id: u64,
}

impl InflightRegistry {
    fn register(&mut self, key: &str) -> (u64, watch::Receiver<bool>) {
        self.next_id += 1;
        let id = self.next_id;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.entries
            .entry(key.to_string())
            .or_default()
            .push((id, cancel_tx));
        (id, cancel_rx)
    }

    fn unregister(&mut self, key: &str, id: u64) {
        if let Some(senders) = self.entries.get_mut(key) {
            senders.retain(|(entry_id, _)| *entry_id != id);
            if senders.is_empty() {
                self.entries.remove(key);
            }
        }
    }

    fn cancel(&self, key: &str) -> bool {
        match self.entries.get(key) {
            Some(senders) => senders.iter().fold(false, |signalled, (_, tx)| {
                tx.send(true).is_ok() || signalled
            }),
            None => false,
        }
    }
}

/// Unregisters its call on drop, which also covers a caller abandoning the
/// `execute` future mid-flight.
struct InflightGuard<'a> {
    registry: &'a StdMutex<InflightRegistry>,
    key: String,
    id: u64,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.registry
            .lock()
            .expect("inflight lock poisoned")
            .unregister(&self.key, self.id);
    }
}

// == Request Executor ==
/// Issues logical requests against the remote API.
///
/// Attempts within one call are strictly sequential. Cancellation is
/// cooperative: it aborts the current attempt or pending backoff timer and
/// suppresses further retries, surfacing a terminal `Aborted`.
pub struct RequestExecutor {
    config: Config,
    transport: Arc<dyn HttpTransport>,
    cache: SharedCache,
    limiter: SharedLimiter,
    token_provider: Option<Arc<dyn TokenProvider>>,
    inflight: StdMutex<InflightRegistry>,
    connectivity_tx: watch::Sender<Connectivity>,
}

impl RequestExecutor {
    // == Constructor ==
    pub fn new(
        config: Config,
        transport: Arc<dyn HttpTransport>,
        cache: SharedCache,
        limiter: SharedLimiter,
    ) -> Self {
        let (connectivity_tx, _) = watch::channel(Connectivity::Connected);
        Self {
            config,
            transport,
            cache,
            limiter,
            token_provider: None,
            inflight: StdMutex::new(InflightRegistry::default()),
            connectivity_tx,
        }
    }

    /// Attaches the credential holder consulted on every attempt.
    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    // == Connectivity Signal ==
    /// Subscribes to the connectivity signal.
    pub fn connectivity(&self) -> watch::Receiver<Connectivity> {
        self.connectivity_tx.subscribe()
    }

    fn set_connectivity(&self, state: Connectivity) {
        self.connectivity_tx.send_if_modified(|current| {
            if *current != state {
                debug!(?state, "connectivity changed");
                *current = state;
                true
            } else {
                false
            }
        });
    }

    // == Execute ==
    /// Performs the request described by `desc`.
    ///
    /// Cacheable GETs are served from the cache when possible, without
    /// touching the network or the rate limiter. Otherwise the rate limiter
    /// is consulted first; a blocked key class fails fast with
    /// `RateLimited` and no attempt is made.
    pub async fn execute(&self, desc: &RequestDescriptor) -> Result<Value> {
        let key = desc.cache_key();

        if desc.cacheable && desc.method.is_get() {
            if let Some(hit) = self.cache.write().await.get(&key) {
                debug!(%key, "served from cache");
                return Ok(hit);
            }
        }

        let class = desc.limiter_class();
        let policy = self.config.rate_policy_for(&class);
        {
            let mut limiter = self.limiter.lock().await;
            if !limiter.check_and_increment(&class, policy.max_requests, policy.window_ms) {
                warn!(%class, "rate limited, failing fast");
                return Err(DataError::RateLimited(class));
            }
        }

        let (id, cancel_rx) = self
            .inflight
            .lock()
            .expect("inflight lock poisoned")
            .register(&key);
        let _guard = InflightGuard {
            registry: &self.inflight,
            key: key.clone(),
            id,
        };

        let result = self.run_attempts(desc, cancel_rx).await;

        if let Ok(value) = &result {
            if desc.cacheable && desc.method.is_get() {
                self.cache
                    .write()
                    .await
                    .set(key, value.clone(), desc.ttl_override);
            }
        }
        result
    }

    // == Cancel ==
    /// Cancels every in-flight call identified by `cache_key`; equal keys
    /// are one logical request. Returns true when at least one call was
    /// actually signalled.
    pub fn cancel(&self, cache_key: &str) -> bool {
        self.inflight
            .lock()
            .expect("inflight lock poisoned")
            .cancel(cache_key)
    }

    // == Attempt Loop ==
    async fn run_attempts(
        &self,
        desc: &RequestDescriptor,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> Result<Value> {
        let url = self.resolve_url(&desc.url);
        let mut retry = RetryState::new(self.config.max_attempts);

        loop {
            retry.begin_attempt();

            let outcome = tokio::select! {
                out = self.attempt_once(desc, &url) => out,
                _ = cancel_rx.changed() => {
                    debug!(key = %desc.cache_key(), "request cancelled mid-attempt");
                    return Err(DataError::Aborted(desc.cache_key()));
                }
            };

            match outcome {
                Ok(value) => {
                    self.set_connectivity(Connectivity::Connected);
                    return Ok(value);
                }
                Err(err) => {
                    if let DataError::HttpClient { status: 401, .. } = &err {
                        if let Some(provider) = &self.token_provider {
                            provider.on_token_expired();
                        }
                    }
                    if err.is_network_class() {
                        self.set_connectivity(Connectivity::Disconnected);
                    }

                    if err.is_terminal() || !retry.has_attempts_left() {
                        warn!(
                            attempt = retry.attempt,
                            max = retry.max_attempts,
                            previous = ?retry.last_error,
                            %err,
                            "request failed"
                        );
                        return Err(err);
                    }

                    let delay = self.config.base_delay_ms * 2u64.pow(retry.attempt - 1);
                    if err.is_network_class() {
                        self.set_connectivity(Connectivity::Reconnecting);
                    }
                    debug!(attempt = retry.attempt, delay_ms = delay, %err, "retrying");

                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                        _ = cancel_rx.changed() => {
                            debug!(key = %desc.cache_key(), "request cancelled during backoff");
                            return Err(DataError::Aborted(desc.cache_key()));
                        }
                    }
                    retry.last_error = Some(err);
                }
            }
        }
    }

    // == Single Attempt ==
    async fn attempt_once(&self, desc: &RequestDescriptor, url: &str) -> Result<Value> {
        let bearer = self
            .token_provider
            .as_ref()
            .and_then(|provider| provider.bearer_token());

        let timeout = Duration::from_millis(self.config.request_timeout_ms);
        let send = self
            .transport
            .send(desc.method, url, desc.body.as_ref(), bearer.as_deref());

        let raw = tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| DataError::Timeout(self.config.request_timeout_ms))??;

        Self::interpret_response(raw)
    }

    // == Response Interpretation ==
    /// 2xx bodies parse as JSON and unwrap their `data` field when present;
    /// an unparsable 2xx body is a `Parse` failure. Non-2xx is a failure
    /// regardless of body shape, with the envelope's error/message text
    /// when one can be extracted.
    fn interpret_response(raw: RawResponse) -> Result<Value> {
        if (200..300).contains(&raw.status) {
            let parsed: Value = serde_json::from_str(&raw.body)
                .map_err(|err| DataError::Parse(format!("malformed response body: {err}")))?;
            return Ok(match parsed.get("data") {
                Some(data) if !data.is_null() => data.clone(),
                _ => parsed,
            });
        }

        let message = serde_json::from_str::<ApiEnvelope>(&raw.body)
            .ok()
            .and_then(|env| env.error.or(env.message))
            .unwrap_or_else(|| "request failed".to_string());

        if raw.status >= 500 {
            Err(DataError::HttpServer {
                status: raw.status,
                message,
            })
        } else if raw.status >= 400 {
            Err(DataError::HttpClient {
                status: raw.status,
                message,
            })
        } else {
            // 1xx/3xx are not expected from this API
            Err(DataError::Network(format!(
                "unexpected status {}",
                raw.status
            )))
        }
    }

    fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}{}", self.config.base_url, url)
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    // Replays a script of responses; repeats the last one when exhausted.
    struct ScriptedTransport {
        script: StdMutex<VecDeque<Result<RawResponse>>>,
        last: Result<RawResponse>,
        attempts: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<RawResponse>>) -> Arc<Self> {
            let last = script
                .last()
                .cloned()
                .unwrap_or_else(|| Ok(ok_response(json!({"ok": true}))));
            Arc::new(Self {
                script: StdMutex::new(script.into()),
                last,
                attempts: AtomicU32::new(0),
            })
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(
            &self,
            _method: Method,
            _url: &str,
            _body: Option<&Value>,
            _bearer: Option<&str>,
        ) -> Result<RawResponse> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.last.clone())
        }
    }

    // Never responds; used for timeout and cancellation tests.
    struct HangingTransport {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl HttpTransport for HangingTransport {
        async fn send(
            &self,
            _method: Method,
            _url: &str,
            _body: Option<&Value>,
            _bearer: Option<&str>,
        ) -> Result<RawResponse> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    fn ok_response(data: Value) -> RawResponse {
        RawResponse {
            status: 200,
            body: json!({ "data": data }).to_string(),
        }
    }

    fn status_response(status: u16, message: &str) -> RawResponse {
        RawResponse {
            status,
            body: json!({ "error": message }).to_string(),
        }
    }

    fn test_config() -> Config {
        Config {
            max_attempts: 3,
            base_delay_ms: 100,
            request_timeout_ms: 5_000,
            ..Config::default()
        }
    }

    fn executor_with(config: Config, transport: Arc<dyn HttpTransport>) -> RequestExecutor {
        let cache = Arc::new(RwLock::new(CacheStore::new(
            config.max_cache_size,
            config.default_ttl_ms,
        )));
        let limiter = Arc::new(Mutex::new(RateLimiter::new()));
        RequestExecutor::new(config, transport, cache, limiter)
    }

    #[tokio::test]
    async fn test_success_returns_data_field() {
        let transport = ScriptedTransport::new(vec![Ok(ok_response(json!({"title": "A"})))]);
        let executor = executor_with(test_config(), transport.clone());

        let value = executor
            .execute(&RequestDescriptor::get("/videos/1"))
            .await
            .unwrap();

        assert_eq!(value, json!({"title": "A"}));
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test]
    async fn test_cacheable_get_served_from_cache() {
        let transport = ScriptedTransport::new(vec![Ok(ok_response(json!({"title": "A"})))]);
        let executor = executor_with(test_config(), transport.clone());
        let desc = RequestDescriptor::get("/videos/1");

        executor.execute(&desc).await.unwrap();
        let second = executor.execute(&desc).await.unwrap();

        assert_eq!(second, json!({"title": "A"}));
        assert_eq!(transport.attempts(), 1, "second read must not hit the network");
    }

    #[tokio::test]
    async fn test_uncached_request_always_hits_network() {
        let transport = ScriptedTransport::new(vec![]);
        let executor = executor_with(test_config(), transport.clone());
        let desc = RequestDescriptor::get("/videos/1").uncached();

        executor.execute(&desc).await.unwrap();
        executor.execute(&desc).await.unwrap();

        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_retried_with_exponential_backoff() {
        let transport = ScriptedTransport::new(vec![
            Ok(status_response(500, "boom")),
            Ok(status_response(500, "boom")),
            Ok(status_response(500, "boom")),
        ]);
        let executor = executor_with(test_config(), transport.clone());

        let started = tokio::time::Instant::now();
        let result = executor.execute(&RequestDescriptor::get("/videos")).await;

        assert!(matches!(
            result,
            Err(DataError::HttpServer { status: 500, .. })
        ));
        assert_eq!(transport.attempts(), 3, "exactly max_attempts attempts");
        // backoff delays: 100ms + 200ms between the three attempts
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let transport = ScriptedTransport::new(vec![Ok(status_response(404, "missing"))]);
        let executor = executor_with(test_config(), transport.clone());

        let result = executor.execute(&RequestDescriptor::get("/videos/999")).await;

        assert!(matches!(
            result,
            Err(DataError::HttpClient { status: 404, .. })
        ));
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test]
    async fn test_network_failure_retried_then_surfaces_last_error() {
        let transport = ScriptedTransport::new(vec![
            Err(DataError::Network("refused".into())),
            Err(DataError::Network("refused".into())),
            Err(DataError::Network("still refused".into())),
        ]);
        let config = Config {
            base_delay_ms: 1,
            ..test_config()
        };
        let executor = executor_with(config, transport.clone());

        let result = executor.execute(&RequestDescriptor::get("/videos")).await;

        assert_eq!(result, Err(DataError::Network("still refused".into())));
        assert_eq!(transport.attempts(), 3);
    }

    #[tokio::test]
    async fn test_timeout_classified_and_retried() {
        let transport = Arc::new(HangingTransport {
            attempts: AtomicU32::new(0),
        });
        let config = Config {
            request_timeout_ms: 30,
            max_attempts: 2,
            base_delay_ms: 10,
            ..Config::default()
        };
        let executor = executor_with(config, transport.clone());

        let result = executor.execute(&RequestDescriptor::get("/videos")).await;

        assert_eq!(result, Err(DataError::Timeout(30)));
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_fails_fast_without_network() {
        let transport = ScriptedTransport::new(vec![]);
        let config = test_config().with_rate_override(
            "GET /videos",
            crate::config::RateLimitPolicy {
                window_ms: 60_000,
                max_requests: 1,
            },
        );
        let executor = executor_with(config, transport.clone());
        let desc = RequestDescriptor::get("/videos").uncached();

        executor.execute(&desc).await.unwrap();
        let second = executor.execute(&desc).await;

        assert!(matches!(second, Err(DataError::RateLimited(_))));
        assert_eq!(transport.attempts(), 1, "no attempt once blocked");
    }

    #[tokio::test]
    async fn test_cancel_yields_single_aborted() {
        let transport = Arc::new(HangingTransport {
            attempts: AtomicU32::new(0),
        });
        let executor = Arc::new(executor_with(test_config(), transport.clone()));
        let desc = RequestDescriptor::get("/videos/slow");
        let key = desc.cache_key();

        let task = {
            let executor = executor.clone();
            let desc = desc.clone();
            tokio::spawn(async move { executor.execute(&desc).await })
        };

        // let the attempt register before cancelling
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(executor.cancel(&key));

        let result = task.await.unwrap();
        assert!(matches!(result, Err(DataError::Aborted(_))));
        assert_eq!(
            transport.attempts.load(Ordering::SeqCst),
            1,
            "no further attempts after cancel"
        );
    }

    #[tokio::test]
    async fn test_cancel_unknown_key_is_noop() {
        let transport = ScriptedTransport::new(vec![]);
        let executor = executor_with(test_config(), transport);

        assert!(!executor.cancel("GET:/nowhere"));
    }

    #[tokio::test]
    async fn test_dropped_execute_future_unregisters_inflight() {
        let transport = Arc::new(HangingTransport {
            attempts: AtomicU32::new(0),
        });
        let executor = Arc::new(executor_with(test_config(), transport));
        let desc = RequestDescriptor::get("/videos/slow");
        let key = desc.cache_key();

        let task = {
            let executor = executor.clone();
            let desc = desc.clone();
            tokio::spawn(async move { executor.execute(&desc).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.abort();
        let _ = task.await;

        // the abandoned call left no cancellation entry behind
        assert!(!executor.cancel(&key));
    }

    #[tokio::test]
    async fn test_cancel_reaches_overlapping_calls_with_same_key() {
        let transport = Arc::new(HangingTransport {
            attempts: AtomicU32::new(0),
        });
        let executor = Arc::new(executor_with(test_config(), transport));
        let desc = RequestDescriptor::get("/videos/slow");
        let key = desc.cache_key();

        let spawn_call = |executor: Arc<RequestExecutor>, desc: RequestDescriptor| {
            tokio::spawn(async move { executor.execute(&desc).await })
        };
        let first = spawn_call(executor.clone(), desc.clone());
        let second = spawn_call(executor.clone(), desc.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(executor.cancel(&key));

        assert!(matches!(first.await.unwrap(), Err(DataError::Aborted(_))));
        assert!(matches!(second.await.unwrap(), Err(DataError::Aborted(_))));
        assert!(!executor.cancel(&key), "registry drained after completion");
    }

    #[tokio::test]
    async fn test_malformed_success_body_is_parse_failure() {
        let transport = ScriptedTransport::new(vec![Ok(RawResponse {
            status: 200,
            body: "<html>not json</html>".to_string(),
        })]);
        let executor = executor_with(test_config(), transport);

        let result = executor.execute(&RequestDescriptor::get("/videos")).await;
        assert!(matches!(result, Err(DataError::Parse(_))));
    }

    #[tokio::test]
    async fn test_connectivity_signal_transitions() {
        let transport = ScriptedTransport::new(vec![
            Err(DataError::Network("down".into())),
            Ok(ok_response(json!(1))),
        ]);
        let config = Config {
            base_delay_ms: 1,
            ..test_config()
        };
        let executor = executor_with(config, transport);
        let connectivity = executor.connectivity();

        executor
            .execute(&RequestDescriptor::get("/videos"))
            .await
            .unwrap();

        assert_eq!(*connectivity.borrow(), Connectivity::Connected);
    }

    #[tokio::test]
    async fn test_token_expiry_hook_fires_on_401() {
        struct CountingProvider {
            expired: AtomicU32,
        }
        impl TokenProvider for CountingProvider {
            fn bearer_token(&self) -> Option<String> {
                Some("token".to_string())
            }
            fn on_token_expired(&self) {
                self.expired.fetch_add(1, Ordering::SeqCst);
            }
        }

        let provider = Arc::new(CountingProvider {
            expired: AtomicU32::new(0),
        });
        let transport = ScriptedTransport::new(vec![Ok(status_response(401, "expired"))]);
        let executor =
            executor_with(test_config(), transport).with_token_provider(provider.clone());

        let result = executor.execute(&RequestDescriptor::get("/me")).await;

        assert!(matches!(
            result,
            Err(DataError::HttpClient { status: 401, .. })
        ));
        assert_eq!(provider.expired.load(Ordering::SeqCst), 1);
    }
}
