//! Query Node
//!
//! The composition root. A [`QueryNode`] wires the coalescer, supersession
//! controller, state machine and broadcaster together behind the public
//! `{data, is_loading, is_error, error, refetch}` contract.
//!
//! # Execution Model
//!
//! Each node has a driver task on a current-thread Tokio runtime. The driver
//! is the single logical thread of control for the node: it is the only code
//! that advances the state machine and publishes snapshots, so node state
//! needs no locking of its own. Producers never run on the driver; a panic in
//! one fails its attempt and leaves the driver running.
//!
//! ```text
//!   signals ──┐
//!   refetch ──┼──▶ coalescer ──▶ driver ──▶ attempt task (producer)
//!   initial ──┘                   ▲  │                 │
//!                                 │  ▼                 │
//!                  broadcaster ◀──┘ state    settled ◀─┘ (tagged with generation)
//! ```
//!
//! Attempts run in their own tasks and report back over a channel. The driver
//! applies a settled result only if its generation is still the live one, so
//! results are applied in trigger order, never completion order.
//!
//! # Lifecycle
//!
//! [`QueryNode::dispose`] (or dropping the last handle) unsubscribes from
//! every dependency, retires the generation counter and stops the driver. A
//! producer that resolves afterwards is discarded without touching state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use super::broadcaster::StateBroadcaster;
use super::builder::{Gate, Normalizer, Producer, QueryBuilder};
use super::coalescer::{Trigger, TriggerCoalescer, TriggerReason, TriggerStream};
use super::state::{QueryEvent, QueryState, QueryStatus};
use super::supersession::Supersession;
use crate::reactive::{ChangeCallback, Dependencies, Subscription, Subscriptions};

/// Counter for generating unique query IDs.
static QUERY_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_query_id() -> u64 {
    QUERY_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A reactive asynchronous query.
///
/// Clones share the same node. The node is disposed when [`dispose`] is
/// called or the last clone is dropped.
///
/// [`dispose`]: QueryNode::dispose
pub struct QueryNode<T, E> {
    inner: Arc<NodeInner<T, E>>,
}

struct NodeInner<T, E> {
    id: u64,
    broadcaster: StateBroadcaster<T, E>,
    coalescer: Arc<TriggerCoalescer>,
    supersession: Arc<Supersession>,
    /// Dependency subscriptions, released on disposal.
    subscriptions: Mutex<Subscriptions>,
}

impl<T, E> NodeInner<T, E> {
    fn dispose(&self) -> bool {
        // Closed before retiring: nothing publishes once disposal starts.
        self.broadcaster.close();
        if !self.supersession.retire() {
            return false;
        }
        self.coalescer.close();
        drop(std::mem::take(&mut *self.subscriptions.lock()));
        tracing::debug!(
            query = self.id,
            generation = self.supersession.generation(),
            "query disposed"
        );
        true
    }
}

impl<T, E> Drop for NodeInner<T, E> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<T, E> QueryNode<T, E>
where
    T: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub(crate) fn spawn<D, R>(builder: QueryBuilder<D, T, R, E>, handle: &Handle) -> Self
    where
        D: Dependencies,
        R: Send + 'static,
    {
        let QueryBuilder {
            dependencies,
            producer,
            normalize,
            eager,
            enabled,
        } = builder;

        let id = next_query_id();
        let (coalescer, triggers) = TriggerCoalescer::new();
        let supersession = Arc::new(Supersession::new());
        let broadcaster = StateBroadcaster::new();

        let on_change: ChangeCallback = {
            let coalescer = Arc::clone(&coalescer);
            Arc::new(move || {
                coalescer.signal(TriggerReason::Dependency);
            })
        };
        let subscriptions = dependencies.watch(&on_change);

        tracing::debug!(
            query = id,
            dependencies = dependencies.len(),
            eager,
            "query created"
        );

        let driver = Driver {
            id,
            dependencies,
            producer,
            normalize,
            enabled,
            triggers,
            supersession: Arc::clone(&supersession),
            broadcaster: broadcaster.clone(),
            state: QueryState::new(),
        };
        handle.spawn(driver.run());

        if eager {
            coalescer.signal(TriggerReason::Initial);
        }

        Self {
            inner: Arc::new(NodeInner {
                id,
                broadcaster,
                coalescer,
                supersession,
                subscriptions: Mutex::new(subscriptions),
            }),
        }
    }

    /// Unique identifier of this node.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The last successfully produced value.
    ///
    /// The value is shared with every other observer and must be treated as
    /// immutable.
    pub fn data(&self) -> Option<Arc<T>> {
        self.inner.broadcaster.with_current(|state| state.data().cloned())
    }

    pub fn is_loading(&self) -> bool {
        self.inner.broadcaster.with_current(QueryState::is_loading)
    }

    pub fn is_error(&self) -> bool {
        self.inner.broadcaster.with_current(QueryState::is_error)
    }

    /// The normalized error of the live attempt, present only in `Error`.
    pub fn error(&self) -> Option<E> {
        self.inner.broadcaster.with_current(|state| state.error().cloned())
    }

    pub fn status(&self) -> QueryStatus {
        self.inner.broadcaster.with_current(QueryState::status)
    }

    /// A consistent snapshot of status, data and error.
    pub fn state(&self) -> QueryState<T, E> {
        self.inner.broadcaster.current()
    }

    /// Request a new attempt.
    ///
    /// Coalesced with any trigger already pending. Safe to call while loading:
    /// the in-flight attempt is superseded. A no-op after disposal.
    pub fn refetch(&self) {
        self.inner.coalescer.signal(TriggerReason::Refetch);
    }

    /// The most recently issued attempt generation.
    pub fn generation(&self) -> u64 {
        self.inner.supersession.generation()
    }

    /// Observe every snapshot, starting with the current one.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&QueryState<T, E>) + Send + Sync + 'static,
    {
        self.inner.broadcaster.subscribe(observer)
    }

    /// Observe `is_loading`, starting with its current value, then only flips.
    pub fn subscribe_loading<F>(&self, observer: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner.broadcaster.subscribe_loading(observer)
    }

    /// Observe `is_error`, starting with its current value, then only flips.
    pub fn subscribe_error_flag<F>(&self, observer: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner.broadcaster.subscribe_error_flag(observer)
    }

    /// Async view of the node's snapshots.
    pub fn watch(&self) -> watch::Receiver<QueryState<T, E>> {
        self.inner.broadcaster.watch()
    }

    /// Tear the node down.
    ///
    /// Unsubscribes from every dependency, cancels the live attempt and stops
    /// the driver. The last snapshot stays readable. Calling it again does
    /// nothing.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.supersession.is_retired()
    }
}

impl<T, E> Clone for QueryNode<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for QueryNode<T, E>
where
    T: Send + Sync + fmt::Debug + 'static,
    E: Clone + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryNode")
            .field("id", &self.inner.id)
            .field("generation", &self.generation())
            .field("state", &self.state())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Driver
// ----------------------------------------------------------------------------

/// Result of one attempt, tagged with the generation that started it.
struct Settled<T, R> {
    generation: u64,
    outcome: Result<T, R>,
}

struct Driver<D, T, R, E>
where
    D: Dependencies,
{
    id: u64,
    dependencies: D,
    producer: Producer<D::Values, T, R>,
    normalize: Normalizer<R, E>,
    enabled: Option<Gate<D::Values>>,
    triggers: TriggerStream,
    supersession: Arc<Supersession>,
    broadcaster: StateBroadcaster<T, E>,
    state: QueryState<T, E>,
}

impl<D, T, R, E> Driver<D, T, R, E>
where
    D: Dependencies,
    T: Send + Sync + 'static,
    R: Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    async fn run(mut self) {
        let (settled_tx, mut settled_rx) = mpsc::unbounded_channel::<Settled<T, R>>();
        let shutdown = self.supersession.shutdown().clone();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                Some(settled) = settled_rx.recv() => self.settle(settled),

                woke = self.triggers.wait() => {
                    if !woke {
                        break;
                    }
                    // Let the rest of the current burst land first.
                    tokio::task::yield_now().await;
                    let trigger = self.triggers.flush();
                    self.fire(trigger, &settled_tx);
                }
            }
        }

        tracing::trace!(query = self.id, "driver stopped");
    }

    fn fire(&mut self, trigger: Trigger, settled: &mpsc::UnboundedSender<Settled<T, R>>) {
        if self.triggers.is_closed() {
            return;
        }

        let values = self.dependencies.snapshot();

        if let Some(enabled) = &self.enabled {
            if !enabled(&values) {
                let generation = self.supersession.abandon();
                tracing::trace!(query = self.id, generation, "query disabled for current inputs");
                if !self.state.is_idle() {
                    self.transition(QueryEvent::Reset);
                }
                return;
            }
        }

        let Some(attempt) = self.supersession.begin() else {
            return;
        };
        let generation = attempt.generation();

        tracing::debug!(
            query = self.id,
            generation,
            signals = trigger.signals(),
            refetch = trigger.contains(TriggerReason::Refetch),
            "starting attempt"
        );
        self.transition(QueryEvent::Started);

        // Producers only run inside attempt tasks, never on the driver.
        let producer = Arc::clone(&self.producer);
        let token = attempt.token().clone();
        let settled = settled.clone();
        tokio::spawn(async move {
            let outcome = producer(values, token).await;
            // The driver may already be gone; the result is then simply dropped.
            let _ = settled.send(Settled { generation, outcome });
        });
    }

    fn settle(&mut self, settled: Settled<T, R>) {
        if !self.supersession.is_current(settled.generation) {
            tracing::trace!(
                query = self.id,
                generation = settled.generation,
                current = self.supersession.generation(),
                "discarding superseded result"
            );
            return;
        }

        let event = match settled.outcome {
            Ok(data) => QueryEvent::Succeeded(Arc::new(data)),
            Err(raw) => QueryEvent::Failed((self.normalize)(raw)),
        };
        self.transition(event);
    }

    fn transition(&mut self, event: QueryEvent<T, E>) {
        let kind = event.kind();
        if let Err(err) = self.state.apply(event) {
            tracing::error!(query = self.id, %err, "illegal query transition");
            if cfg!(debug_assertions) {
                panic!("illegal query transition: {err}");
            }
            return;
        }

        tracing::trace!(
            query = self.id,
            event = %kind,
            status = %self.state.status(),
            "query transition"
        );
        self.broadcaster.publish(self.state.clone());
    }
}
