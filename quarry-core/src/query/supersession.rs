//! Supersession Controller
//!
//! Guarantees that at most one attempt per query is live, and that only the
//! live attempt's result can ever be applied.
//!
//! # How It Works
//!
//! The controller owns a monotonically increasing generation counter.
//!
//! 1. [`Supersession::begin`] increments the generation, cancels the token of
//!    the previous attempt and hands out a fresh [`Attempt`] carrying the new
//!    generation and its own token.
//!
//! 2. When an attempt settles, its result is applied only if
//!    [`Supersession::is_current`] still holds for its generation. Anything
//!    else is a stale result and is dropped without touching state.
//!
//! 3. [`Supersession::retire`] advances the generation one final time and
//!    refuses further attempts, so nothing started before disposal can land.
//!
//! Cancellation is advisory. Producers receive the attempt's token and may
//! stop early when it fires; the controller never aborts their work. The
//! generation comparison alone is what makes supersession correct.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// A started attempt.
#[derive(Debug, Clone)]
pub struct Attempt {
    generation: u64,
    token: CancellationToken,
}

impl Attempt {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cancelled as soon as the attempt is superseded or the query retires.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Per-query generation tracking.
#[derive(Debug)]
pub struct Supersession {
    generation: AtomicU64,

    /// Token of the live attempt, if any.
    live: Mutex<Option<CancellationToken>>,

    /// Cancelled on retirement. Every attempt token is a child of it.
    shutdown: CancellationToken,
}

impl Supersession {
    pub fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            live: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start a new attempt, superseding the live one.
    ///
    /// Returns `None` once the controller has retired.
    pub fn begin(&self) -> Option<Attempt> {
        let mut live = self.live.lock();
        if self.shutdown.is_cancelled() {
            return None;
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let token = self.shutdown.child_token();
        if let Some(previous) = live.replace(token.clone()) {
            previous.cancel();
        }

        Some(Attempt { generation, token })
    }

    /// Supersede the live attempt without starting a new one.
    ///
    /// Returns the new generation, which no attempt carries.
    pub fn abandon(&self) -> u64 {
        let mut live = self.live.lock();
        if let Some(previous) = live.take() {
            previous.cancel();
        }
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Whether a result from `generation` may still be applied.
    pub fn is_current(&self, generation: u64) -> bool {
        !self.shutdown.is_cancelled() && self.generation.load(Ordering::Acquire) == generation
    }

    /// The most recently issued generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Retire the controller. Returns `false` if it was already retired.
    pub fn retire(&self) -> bool {
        let mut live = self.live.lock();
        if self.shutdown.is_cancelled() {
            return false;
        }

        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(previous) = live.take() {
            previous.cancel();
        }
        self.shutdown.cancel();
        true
    }

    pub fn is_retired(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Token cancelled on retirement.
    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }
}

impl Default for Supersession {
    fn default() -> Self {
        Self::new()
    }
}
