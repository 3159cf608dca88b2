//! Trigger Coalescer
//!
//! Turns bursts of change notifications into single triggers.
//!
//! # Algorithm
//!
//! 1. Any signal (a dependency changed, a refetch, the initial eager trigger)
//!    sets the `pending` flag. Only the signal that flips it from false to
//!    true wakes the driver; every other signal is absorbed.
//!
//! 2. The driver receives the wake-up, yields once to the scheduler so the
//!    current synchronous turn can finish, then calls [`TriggerStream::flush`]
//!    which clears `pending` and reports everything absorbed.
//!
//! 3. Signals arriving after the flush start a new pending trigger.
//!
//! This is a zero-delay debounce: writing two dependencies back to back
//! costs one producer call, not two. The guarantee needs the writer and the
//! driver to share one thread: on a current-thread runtime the driver cannot
//! run until the writing task yields, so a synchronous burst always lands in
//! a single trigger. Query nodes refuse to build on a multi-thread runtime.
//!
//! At most one wake-up is ever queued, and receiving it is cancel-safe, so
//! the driver may wait on it inside `tokio::select!`.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

/// Why a trigger was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerReason {
    /// The eager first trigger issued at construction.
    Initial,

    /// A watched signal changed.
    Dependency,

    /// `refetch()` was called.
    Refetch,
}

impl TriggerReason {
    fn bit(self) -> u8 {
        match self {
            TriggerReason::Initial => 0b001,
            TriggerReason::Dependency => 0b010,
            TriggerReason::Refetch => 0b100,
        }
    }
}

/// One coalesced trigger.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    signals: u64,
    reasons: u8,
}

impl Trigger {
    /// How many signals were merged into this trigger.
    pub fn signals(&self) -> u64 {
        self.signals
    }

    /// Whether a signal of the given kind was merged into this trigger.
    pub fn contains(&self, reason: TriggerReason) -> bool {
        self.reasons & reason.bit() != 0
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("signals", &self.signals)
            .field("initial", &self.contains(TriggerReason::Initial))
            .field("dependency", &self.contains(TriggerReason::Dependency))
            .field("refetch", &self.contains(TriggerReason::Refetch))
            .finish()
    }
}

/// The signalling half, shared by every trigger source of one query.
pub struct TriggerCoalescer {
    pending: AtomicBool,
    closed: AtomicBool,
    signals: AtomicU64,
    reasons: AtomicU8,
    wake: mpsc::UnboundedSender<()>,
}

/// The receiving half, owned by the query's driver.
pub struct TriggerStream {
    coalescer: Arc<TriggerCoalescer>,
    wakeups: mpsc::UnboundedReceiver<()>,
}

impl TriggerCoalescer {
    /// Create a coalescer and the stream its triggers arrive on.
    pub fn new() -> (Arc<Self>, TriggerStream) {
        let (wake, wakeups) = mpsc::unbounded_channel();
        let coalescer = Arc::new(Self {
            pending: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            signals: AtomicU64::new(0),
            reasons: AtomicU8::new(0),
            wake,
        });
        let stream = TriggerStream {
            coalescer: Arc::clone(&coalescer),
            wakeups,
        };
        (coalescer, stream)
    }

    /// Request a trigger.
    ///
    /// Returns `true` if this call opened a new pending trigger, `false` if it
    /// was absorbed into one already pending (or the coalescer is closed).
    pub fn signal(&self, reason: TriggerReason) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        self.signals.fetch_add(1, Ordering::AcqRel);
        self.reasons.fetch_or(reason.bit(), Ordering::AcqRel);

        if self.pending.swap(true, Ordering::AcqRel) {
            return false;
        }

        // A closed receiver means the driver is gone; nothing left to wake.
        self.wake.send(()).is_ok()
    }

    /// Whether a trigger is waiting to be flushed.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Stop accepting signals.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl TriggerStream {
    /// Wait until a trigger is pending.
    ///
    /// Cancel-safe. Returns `false` if the wake-up channel has shut down.
    pub async fn wait(&mut self) -> bool {
        self.wakeups.recv().await.is_some()
    }

    /// Close the pending trigger and report what it absorbed.
    pub fn flush(&mut self) -> Trigger {
        self.coalescer.pending.store(false, Ordering::Release);
        Trigger {
            signals: self.coalescer.signals.swap(0, Ordering::AcqRel),
            reasons: self.coalescer.reasons.swap(0, Ordering::AcqRel),
        }
    }

    /// Whether the coalescer has stopped accepting signals.
    pub fn is_closed(&self) -> bool {
        self.coalescer.is_closed()
    }
}
