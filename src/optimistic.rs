//! Optimistic Store Module
//!
//! A state container exposing a transactional "mutate now, confirm or roll
//! back later" primitive: apply a tentative transform, perform the remote
//! call, then commit a derived success state or restore the pre-mutation
//! snapshot.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{DataError, Result};

// == Outcome ==
/// Terminal disposition of one optimistic transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pending,
    Committed,
    RolledBack,
}

// == Optimistic Transaction ==
/// Bookkeeping for one `mutate` call; created and dropped entirely within
/// it, never persisted.
#[derive(Debug)]
struct OptimisticTransaction<S> {
    snapshot: S,
    speculative: S,
    outcome: Outcome,
}

// == Notification Sink ==
/// Receives human-readable summaries for the user (a toast surface).
pub trait NotificationSink: Send + Sync {
    fn success(&self, summary: &str);
    fn failure(&self, summary: &str);
}

// == Optimistic Store ==
/// Generic state container consumed by the UI-facing feature stores
/// (auth, video list, admin, campaigns). State is observed through a
/// `watch` channel: observers see the speculative state followed by
/// exactly one terminal state per mutation.
///
/// Concurrent `mutate` calls on the same store are NOT serialized: each
/// snapshots the state at entry, and whichever terminal publish lands last
/// wins. Feature stores that interleave mutations on shared state must
/// account for this.
pub struct OptimisticStore<S> {
    state_tx: watch::Sender<S>,
    sink: Option<Arc<dyn NotificationSink>>,
}

impl<S> OptimisticStore<S>
where
    S: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    pub fn new(initial: S) -> Self {
        let (state_tx, _) = watch::channel(initial);
        Self {
            state_tx,
            sink: None,
        }
    }

    /// Attaches the toast surface failure summaries are sent to.
    pub fn with_notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    // == State Access ==
    /// Current state, cloned.
    pub fn state(&self) -> S {
        self.state_tx.borrow().clone()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.state_tx.subscribe()
    }

    fn publish(&self, state: S) {
        self.state_tx.send_replace(state);
    }

    // == Mutate ==
    /// Runs one optimistic mutation:
    ///
    /// 1. snapshot the current state
    /// 2. publish `optimistic(snapshot)` immediately
    /// 3. await `remote()`
    /// 4. on success publish `on_success(result, speculative)`, return true
    /// 5. on any failure publish `on_failure(error, snapshot)` (typically
    ///    the snapshot itself), return false
    ///
    /// Every failure except `Aborted` also emits one failure summary to the
    /// notification sink.
    pub async fn mutate<T, Fut, Opt, Rem, Succ, Fail>(
        &self,
        optimistic: Opt,
        remote: Rem,
        on_success: Succ,
        on_failure: Fail,
    ) -> bool
    where
        Fut: Future<Output = Result<T>>,
        Opt: FnOnce(&S) -> S,
        Rem: FnOnce() -> Fut,
        Succ: FnOnce(T, &S) -> S,
        Fail: FnOnce(&DataError, &S) -> S,
    {
        let snapshot = self.state();
        let speculative = optimistic(&snapshot);
        let mut txn = OptimisticTransaction {
            snapshot,
            speculative: speculative.clone(),
            outcome: Outcome::Pending,
        };
        self.publish(speculative);

        let committed = match remote().await {
            Ok(result) => {
                let next = on_success(result, &txn.speculative);
                txn.outcome = Outcome::Committed;
                self.publish(next);
                true
            }
            Err(err) => {
                let next = on_failure(&err, &txn.snapshot);
                txn.outcome = Outcome::RolledBack;
                self.publish(next);
                if !matches!(err, DataError::Aborted(_)) {
                    if let Some(sink) = &self.sink {
                        sink.failure(&err.to_string());
                    }
                    warn!(%err, "optimistic mutation rolled back");
                }
                false
            }
        };
        debug!(outcome = ?txn.outcome, "optimistic mutation finished");
        committed
    }

    /// Emits a success summary to the notification sink, for feature stores
    /// that want a toast after a committed mutation.
    pub fn notify_success(&self, summary: &str) {
        if let Some(sink) = &self.sink {
            sink.success(summary);
        }
    }
}
