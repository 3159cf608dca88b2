//! Signal Implementation
//!
//! A Signal is the reactive cell queries watch. It holds a value that can be
//! read synchronously at any time and notifies its subscribers when a write
//! changes that value.
//!
//! # How Signals Work
//!
//! 1. `read()` returns a clone of the current value. It never blocks on a
//!    computation and is always defined after construction.
//!
//! 2. `write()` stores the new value unconditionally, then compares it to the
//!    previous one using the signal's equality. Subscribers are notified once
//!    if and only if the values differ.
//!
//! 3. Notifications run after the value lock is released, so a callback may
//!    read (or even write) the signal it was notified by.
//!
//! # Thread Safety
//!
//! The value and the subscriber map live behind `parking_lot` locks and are
//! shared between clones. Subscriptions hold the map weakly, so a signal is
//! freed as soon as the last handle is dropped.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use smallvec::SmallVec;

use super::subscriber::{SubscriberId, Subscription};

/// Counter for generating unique signal IDs.
static SIGNAL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique signal ID.
fn next_signal_id() -> u64 {
    SIGNAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

type Notifier = Arc<dyn Fn() + Send + Sync>;
type Notifiers = RwLock<HashMap<SubscriberId, Notifier>>;
type Equality<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// A reactive cell holding a value of type T.
///
/// # Example
///
/// ```rust
/// use quarry_core::reactive::Signal;
///
/// let count = Signal::new(0);
/// let _sub = count.subscribe(|| println!("changed"));
///
/// count.write(5); // prints "changed"
/// count.write(5); // equal value, no notification
/// assert_eq!(count.read(), 5);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Unique identifier for this signal.
    id: u64,

    value: Arc<RwLock<T>>,

    /// Notification callbacks keyed by subscriber. Order is irrelevant.
    notifiers: Arc<Notifiers>,

    equals: Equality<T>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal that compares values with `PartialEq`.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_equality(value, |a: &T, b: &T| a == b)
    }

    /// Create a new signal with a custom equality.
    ///
    /// A write notifies subscribers only when `equals(previous, next)` is false.
    pub fn with_equality<F>(value: T, equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            id: next_signal_id(),
            value: Arc::new(RwLock::new(value)),
            notifiers: Arc::new(RwLock::new(HashMap::new())),
            equals: Arc::new(equals),
        }
    }

    /// Create a signal where every write notifies, even with an equal value.
    pub fn always_notify(value: T) -> Self {
        Self::with_equality(value, |_: &T, _: &T| false)
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the current value.
    pub fn read(&self) -> T {
        self.value.read().clone()
    }

    /// Run `f` against the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.value.read())
    }

    /// Store a new value, notifying subscribers if it differs from the old one.
    pub fn write(&self, value: T) {
        self.update(move |_| value);
    }

    /// Replace the value with a function of the current value.
    ///
    /// The read and the store happen under one write lock, so concurrent
    /// updates never lose each other. `f` must not access this signal.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let changed = {
            let mut guard = self.value.write();
            let next = f(&*guard);
            let changed = !(self.equals)(&*guard, &next);
            *guard = next;
            changed
        };

        if changed {
            self.notify_subscribers();
        }
    }

    /// Register a callback invoked after every changing write.
    pub fn subscribe<F>(&self, notify: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = SubscriberId::new();
        self.notifiers.write().insert(id, Arc::new(notify));

        let notifiers: Weak<Notifiers> = Arc::downgrade(&self.notifiers);
        Subscription::new(id, move || {
            if let Some(notifiers) = notifiers.upgrade() {
                notifiers.write().remove(&id);
            }
        })
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.notifiers.read().len()
    }

    fn notify_subscribers(&self) {
        let pending: SmallVec<[Notifier; 4]> = self.notifiers.read().values().cloned().collect();
        for notify in pending {
            notify();
        }
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Arc::clone(&self.value),
            notifiers: Arc::clone(&self.notifiers),
            equals: Arc::clone(&self.equals),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &*self.value.read())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
