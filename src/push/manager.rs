//! Connection Manager Module
//!
//! Maintains the single push-channel connection: capped exponential-backoff
//! reconnection, topic multiplexing over one socket, and cache invalidation
//! driven by server notifications.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::executor::SharedCache;
use crate::push::{ControlMessage, PushEnvelope, PushTransport};

/// Envelope type reserved for server-driven cache invalidation; its payload
/// carries `{"pattern": <regex>}`.
pub const CACHE_INVALIDATE_TYPE: &str = "cache.invalidate";

// == Connection State ==
/// Connection lifecycle; transitions are strictly sequential, at most one
/// connection attempt is outstanding at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

// == Reconnect Policy ==
/// Capped exponential backoff for reconnect scheduling.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_delay_ms: config.reconnect_base_delay_ms,
            max_delay_ms: config.reconnect_max_delay_ms,
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// Delay before reconnect attempt number `attempts` (zero-based):
    /// `min(base * 2^attempts, max)`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempts));
        Duration::from_millis(exp.min(self.max_delay_ms))
    }
}

/// Handler invoked with the payload of every message on its topic.
pub type TopicHandler = Arc<dyn Fn(Value) + Send + Sync>;

#[derive(Default)]
struct Registry {
    topics: HashMap<String, HashMap<u64, TopicHandler>>,
    next_id: u64,
}

enum Command {
    Send(String),
    Shutdown,
}

struct Inner {
    transport: Arc<dyn PushTransport>,
    cache: Option<SharedCache>,
    policy: ReconnectPolicy,
    registry: StdMutex<Registry>,
    state_tx: watch::Sender<ConnectionState>,
    command_tx: StdMutex<Option<mpsc::UnboundedSender<Command>>>,
    task: StdMutex<Option<JoinHandle<()>>>,
    active: AtomicBool,
}

// == Connection Manager ==
/// One instance per push endpoint. The subscription registry survives
/// reconnects; only the socket is replaced.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

/// Registration receipt for one handler. Dropping it does nothing; call
/// [`SubscriptionHandle::unsubscribe`] to remove the handler.
pub struct SubscriptionHandle {
    inner: Arc<Inner>,
    topic: String,
    id: u64,
}

impl ConnectionManager {
    // == Constructors ==
    pub fn new(transport: Arc<dyn PushTransport>, policy: ReconnectPolicy) -> Self {
        Self::build(transport, policy, None)
    }

    /// A manager whose push notifications may invalidate the given cache.
    pub fn with_cache(
        transport: Arc<dyn PushTransport>,
        policy: ReconnectPolicy,
        cache: SharedCache,
    ) -> Self {
        Self::build(transport, policy, Some(cache))
    }

    fn build(
        transport: Arc<dyn PushTransport>,
        policy: ReconnectPolicy,
        cache: Option<SharedCache>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                transport,
                cache,
                policy,
                registry: StdMutex::new(Registry::default()),
                state_tx,
                command_tx: StdMutex::new(None),
                task: StdMutex::new(None),
                active: AtomicBool::new(true),
            }),
        }
    }

    // == State ==
    /// Subscribes to connection-state changes.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Current connection state.
    pub fn current_state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Marks the host context active or inactive; reconnects are only
    /// scheduled while active (the visibility analog).
    pub fn set_active(&self, active: bool) {
        self.inner.active.store(active, Ordering::SeqCst);
    }

    // == Connect ==
    /// Opens the channel and keeps it alive. No-op if already Connecting or
    /// Connected. After the reconnect budget is exhausted, another explicit
    /// `connect` call is required.
    pub fn connect(&self, endpoint: impl Into<String>) {
        if self.current_state() != ConnectionState::Disconnected {
            debug!("connect ignored, channel already active");
            return;
        }
        let endpoint = endpoint.into();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        *self.inner.command_tx.lock().expect("command lock poisoned") = Some(command_tx);

        let inner = self.inner.clone();
        let handle = tokio::spawn(run_connection(inner, endpoint, command_rx));
        if let Some(previous) = self
            .inner
            .task
            .lock()
            .expect("task lock poisoned")
            .replace(handle)
        {
            previous.abort();
        }
    }

    // == Disconnect ==
    /// Closes the channel, clears all subscriptions, and cancels any
    /// pending reconnect. Idempotent.
    pub fn disconnect(&self) {
        if let Some(tx) = self
            .inner
            .command_tx
            .lock()
            .expect("command lock poisoned")
            .take()
        {
            let _ = tx.send(Command::Shutdown);
        }
        if let Some(task) = self.inner.task.lock().expect("task lock poisoned").take() {
            task.abort();
        }
        self.inner
            .registry
            .lock()
            .expect("registry lock poisoned")
            .topics
            .clear();
        self.inner.state_tx.send_replace(ConnectionState::Disconnected);
    }

    // == Subscribe ==
    /// Registers a handler for a topic. When this is the topic's first
    /// handler and the channel is connected, a subscribe control frame is
    /// sent immediately.
    pub fn subscribe(&self, topic: impl Into<String>, handler: TopicHandler) -> SubscriptionHandle {
        let topic = topic.into();
        let (id, first_for_topic) = {
            let mut registry = self.inner.registry.lock().expect("registry lock poisoned");
            registry.next_id += 1;
            let id = registry.next_id;
            let handlers = registry.topics.entry(topic.clone()).or_default();
            let first = handlers.is_empty();
            handlers.insert(id, handler);
            (id, first)
        };

        if first_for_topic && self.current_state() == ConnectionState::Connected {
            self.send_control(ControlMessage::Subscribe {
                topics: vec![topic.clone()],
            });
        }

        SubscriptionHandle {
            inner: self.inner.clone(),
            topic,
            id,
        }
    }

    // == Publish ==
    /// Sends `{type: topic, payload}` over the channel. Logs and drops when
    /// not connected; never fails, never queues.
    pub fn publish(&self, topic: impl Into<String>, payload: Value) {
        let topic = topic.into();
        if self.current_state() != ConnectionState::Connected {
            debug!(%topic, "not connected, dropping publish");
            return;
        }
        let envelope = PushEnvelope {
            kind: topic,
            payload,
        };
        match serde_json::to_string(&envelope) {
            Ok(frame) => self.send_frame(frame),
            Err(err) => warn!(%err, "failed to serialize publish frame"),
        }
    }

    fn send_control(&self, control: ControlMessage) {
        match serde_json::to_string(&control) {
            Ok(frame) => self.send_frame(frame),
            Err(err) => warn!(%err, "failed to serialize control frame"),
        }
    }

    fn send_frame(&self, frame: String) {
        if let Some(tx) = self
            .inner
            .command_tx
            .lock()
            .expect("command lock poisoned")
            .as_ref()
        {
            let _ = tx.send(Command::Send(frame));
        }
    }
}

impl SubscriptionHandle {
    /// Removes the handler; when it was the topic's last, an unsubscribe
    /// control frame is sent.
    pub fn unsubscribe(self) {
        let last_for_topic = {
            let mut registry = self.inner.registry.lock().expect("registry lock poisoned");
            if let Some(handlers) = registry.topics.get_mut(&self.topic) {
                handlers.remove(&self.id);
                if handlers.is_empty() {
                    registry.topics.remove(&self.topic);
                    true
                } else {
                    false
                }
            } else {
                false
            }
        };

        if last_for_topic && *self.inner.state_tx.borrow() == ConnectionState::Connected {
            if let Ok(frame) = serde_json::to_string(&ControlMessage::Unsubscribe {
                topics: vec![self.topic.clone()],
            }) {
                if let Some(tx) = self
                    .inner
                    .command_tx
                    .lock()
                    .expect("command lock poisoned")
                    .as_ref()
                {
                    let _ = tx.send(Command::Send(frame));
                }
            }
        }
    }
}

// == Connection Task ==
async fn run_connection(
    inner: Arc<Inner>,
    endpoint: String,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut attempts: u32 = 0;

    loop {
        inner.state_tx.send_replace(ConnectionState::Connecting);

        match inner.transport.open(&endpoint).await {
            Ok(mut channel) => {
                info!(%endpoint, "push channel open");
                inner.state_tx.send_replace(ConnectionState::Connected);
                attempts = 0;

                // re-issue every registered topic on the fresh socket
                let topics: Vec<String> = {
                    let registry = inner.registry.lock().expect("registry lock poisoned");
                    registry.topics.keys().cloned().collect()
                };
                if !topics.is_empty() {
                    if let Ok(frame) = serde_json::to_string(&ControlMessage::Subscribe { topics })
                    {
                        if channel.send(frame).await.is_err() {
                            warn!("resubscribe frame failed, recycling channel");
                        }
                    }
                }

                // pump until the channel closes or we are told to stop
                loop {
                    tokio::select! {
                        command = command_rx.recv() => match command {
                            Some(Command::Send(frame)) => {
                                if channel.send(frame).await.is_err() {
                                    break;
                                }
                            }
                            Some(Command::Shutdown) | None => {
                                inner.state_tx.send_replace(ConnectionState::Disconnected);
                                return;
                            }
                        },
                        message = channel.recv() => match message {
                            Some(text) => dispatch(&inner, &text).await,
                            None => break,
                        },
                    }
                }
                inner.state_tx.send_replace(ConnectionState::Disconnected);
                warn!("push channel closed");
            }
            Err(err) => {
                inner.state_tx.send_replace(ConnectionState::Disconnected);
                warn!(%err, "push channel open failed");
            }
        }

        if !inner.active.load(Ordering::SeqCst) {
            debug!("host inactive, not scheduling reconnect");
            return;
        }
        if attempts >= inner.policy.max_attempts {
            warn!(
                attempts,
                "reconnect budget exhausted, waiting for manual connect"
            );
            return;
        }

        let delay = inner.policy.delay_for(attempts);
        attempts += 1;
        info!(attempt = attempts, delay_ms = delay.as_millis() as u64, "scheduling reconnect");

        // frames arriving during the backoff are dropped without disturbing
        // the scheduled delay; only a shutdown cuts it short
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                command = command_rx.recv() => {
                    if matches!(command, Some(Command::Shutdown) | None) {
                        inner.state_tx.send_replace(ConnectionState::Disconnected);
                        return;
                    }
                }
            }
        }
    }
}

// == Inbound Dispatch ==
/// Parses one inbound frame and delivers its payload to every handler of
/// the envelope's type. A parse failure drops the single message without
/// affecting the connection.
async fn dispatch(inner: &Inner, text: &str) {
    let envelope: PushEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            debug!(%err, "dropping unparsable push message");
            return;
        }
    };

    if envelope.kind == CACHE_INVALIDATE_TYPE {
        if let Some(cache) = &inner.cache {
            let pattern = envelope.payload.get("pattern").and_then(Value::as_str);
            match pattern.map(Regex::new) {
                Some(Ok(regex)) => {
                    let removed = cache.write().await.invalidate_pattern(&regex);
                    debug!(removed, "push-driven cache invalidation");
                }
                Some(Err(err)) => debug!(%err, "invalid invalidation pattern"),
                None => debug!("invalidation payload missing pattern"),
            }
        }
    }

    let handlers: Vec<TopicHandler> = {
        let registry = inner.registry.lock().expect("registry lock poisoned");
        registry
            .topics
            .get(&envelope.kind)
            .map(|h| h.values().cloned().collect())
            .unwrap_or_default()
    };
    for handler in handlers {
        handler(envelope.payload.clone());
    }
}
