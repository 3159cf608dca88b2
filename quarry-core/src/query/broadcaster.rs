//! State Broadcaster
//!
//! Publishes [`QueryState`] snapshots to any number of observers.
//!
//! # Delivery Rules
//!
//! - Subscribing delivers the current snapshot synchronously, before any
//!   later change. A late observer therefore sees exactly what everyone else
//!   currently sees, and nothing twice.
//! - Snapshot observers receive every published snapshot, including a
//!   `Loading` that follows another `Loading`.
//! - Flag observers (`subscribe_loading`, `subscribe_error_flag`) receive
//!   only flips of their boolean.
//! - With no observers, publishing only replaces the cached snapshot. The
//!   next observer gets a replay of it, never a fresh fetch.
//!
//! Deliveries are serialized by a reentrant lock: a replay never interleaves
//! with a publish, and an observer may subscribe further observers from
//! inside its callback.
//!
//! Async consumers can use [`StateBroadcaster::watch`], a
//! `tokio::sync::watch` receiver with the same replay semantics.

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{ReentrantMutex, RwLock};
use smallvec::SmallVec;
use tokio::sync::watch;

use super::state::QueryState;
use crate::reactive::{SubscriberId, Subscription};

type SnapshotFn<T, E> = Arc<dyn Fn(&QueryState<T, E>) + Send + Sync>;
type FlagFn = Arc<dyn Fn(bool) + Send + Sync>;

enum Observer<T, E> {
    Snapshot(SnapshotFn<T, E>),
    Loading(FlagFn),
    ErrorFlag(FlagFn),
}

impl<T, E> Clone for Observer<T, E> {
    fn clone(&self) -> Self {
        match self {
            Observer::Snapshot(f) => Observer::Snapshot(Arc::clone(f)),
            Observer::Loading(f) => Observer::Loading(Arc::clone(f)),
            Observer::ErrorFlag(f) => Observer::ErrorFlag(Arc::clone(f)),
        }
    }
}

impl<T, E> Observer<T, E> {
    fn replay(&self, state: &QueryState<T, E>) {
        match self {
            Observer::Snapshot(f) => f(state),
            Observer::Loading(f) => f(state.is_loading()),
            Observer::ErrorFlag(f) => f(state.is_error()),
        }
    }
}

struct Registry<T, E> {
    current: QueryState<T, E>,
    /// Observers in subscription order.
    observers: IndexMap<SubscriberId, Observer<T, E>>,
    closed: bool,
}

struct Shared<T, E> {
    registry: RwLock<Registry<T, E>>,
    delivery: ReentrantMutex<()>,
    watch: watch::Sender<QueryState<T, E>>,
}

/// Fan-out of query snapshots with replay-on-subscribe.
pub struct StateBroadcaster<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> StateBroadcaster<T, E>
where
    T: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a broadcaster holding the idle state.
    pub fn new() -> Self {
        let (watch, _) = watch::channel(QueryState::new());
        Self {
            shared: Arc::new(Shared {
                registry: RwLock::new(Registry {
                    current: QueryState::new(),
                    observers: IndexMap::new(),
                    closed: false,
                }),
                delivery: ReentrantMutex::new(()),
                watch,
            }),
        }
    }

    /// The latest published snapshot.
    pub fn current(&self) -> QueryState<T, E> {
        self.shared.registry.read().current.clone()
    }

    /// Read the latest snapshot without cloning it.
    pub fn with_current<R>(&self, f: impl FnOnce(&QueryState<T, E>) -> R) -> R {
        f(&self.shared.registry.read().current)
    }

    /// Observe every snapshot, starting with the current one.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&QueryState<T, E>) + Send + Sync + 'static,
    {
        self.register(Observer::Snapshot(Arc::new(observer)))
    }

    /// Observe the loading flag, starting with its current value.
    pub fn subscribe_loading<F>(&self, observer: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.register(Observer::Loading(Arc::new(observer)))
    }

    /// Observe the error flag, starting with its current value.
    pub fn subscribe_error_flag<F>(&self, observer: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.register(Observer::ErrorFlag(Arc::new(observer)))
    }

    /// A watch receiver whose initial value is the current snapshot.
    pub fn watch(&self) -> watch::Receiver<QueryState<T, E>> {
        self.shared.watch.subscribe()
    }

    /// Replace the current snapshot and notify observers.
    ///
    /// Returns `false` (and does nothing) once the broadcaster is closed.
    pub fn publish(&self, next: QueryState<T, E>) -> bool {
        let _delivery = self.shared.delivery.lock();

        let (targets, loading_flipped, error_flipped) = {
            let mut registry = self.shared.registry.write();
            if registry.closed {
                return false;
            }
            let loading_flipped = registry.current.is_loading() != next.is_loading();
            let error_flipped = registry.current.is_error() != next.is_error();
            registry.current = next.clone();

            let targets: SmallVec<[Observer<T, E>; 4]> =
                registry.observers.values().cloned().collect();
            (targets, loading_flipped, error_flipped)
        };

        self.shared.watch.send_replace(next.clone());

        for observer in targets {
            match observer {
                Observer::Snapshot(f) => f(&next),
                Observer::Loading(f) if loading_flipped => f(next.is_loading()),
                Observer::ErrorFlag(f) if error_flipped => f(next.is_error()),
                Observer::Loading(_) | Observer::ErrorFlag(_) => {}
            }
        }
        true
    }

    fn register(&self, observer: Observer<T, E>) -> Subscription {
        let _delivery = self.shared.delivery.lock();
        let id = SubscriberId::new();

        let current = {
            let mut registry = self.shared.registry.write();
            if !registry.closed {
                registry.observers.insert(id, observer.clone());
            }
            registry.current.clone()
        };

        tracing::trace!(observer = id.raw(), "observer subscribed");
        observer.replay(&current);

        let shared: Weak<Shared<T, E>> = Arc::downgrade(&self.shared);
        Subscription::new(id, move || {
            if let Some(shared) = shared.upgrade() {
                shared.registry.write().observers.shift_remove(&id);
                tracing::trace!(observer = id.raw(), "observer unsubscribed");
            }
        })
    }
}

impl<T, E> StateBroadcaster<T, E> {
    /// Stop publishing and drop every observer.
    ///
    /// The last snapshot stays readable and is still replayed to new
    /// observers.
    pub fn close(&self) {
        let _delivery = self.shared.delivery.lock();
        let mut registry = self.shared.registry.write();
        registry.closed = true;
        registry.observers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.registry.read().closed
    }

    pub fn observer_count(&self) -> usize {
        self.shared.registry.read().observers.len()
    }
}

impl<T, E> Default for StateBroadcaster<T, E>
where
    T: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Clone for StateBroadcaster<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
