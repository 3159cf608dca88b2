//! Query State Machine
//!
//! Every query node owns one [`QueryState`]. It is advanced only by
//! [`QueryEvent`]s:
//!
//! ```text
//!            Started                Succeeded
//!   Idle ───────────────▶ Loading ─────────────▶ Success
//!     ▲                    │  ▲                    │
//!     │ Reset              │  │ Started            │
//!     │             Failed │  └────────────────────┤
//!     │                    ▼                       │
//!     └───────────────── Error ◀───────────────────┘
//!                                  Started (from Error/Success)
//! ```
//!
//! `Started` is legal from every status and clears both `data` and `error`
//! (clear-then-fetch). `Succeeded` and `Failed` are only legal while
//! `Loading`. `Reset` returns to `Idle` from anywhere.
//!
//! # Invariants
//!
//! - `data` is present only in `Success`.
//! - `error` is present only in `Error`.
//! - Published data is shared as `Arc<T>` and never mutated afterwards.

use std::fmt;
use std::sync::Arc;

use super::error::TransitionError;

/// Lifecycle status of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueryStatus {
    /// No attempt has started yet, or the query was reset.
    #[default]
    Idle,

    /// An attempt is in flight.
    Loading,

    /// The live attempt produced a value.
    Success,

    /// The live attempt failed.
    Error,
}

impl QueryStatus {
    /// Whether the status is final for the current attempt.
    pub fn is_settled(self) -> bool {
        matches!(self, QueryStatus::Success | QueryStatus::Error)
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueryStatus::Idle => "idle",
            QueryStatus::Loading => "loading",
            QueryStatus::Success => "success",
            QueryStatus::Error => "error",
        })
    }
}

/// The event kinds that drive the state machine, without payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    Started,
    Succeeded,
    Failed,
    Reset,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransitionKind::Started => "started",
            TransitionKind::Succeeded => "succeeded",
            TransitionKind::Failed => "failed",
            TransitionKind::Reset => "reset",
        })
    }
}

/// An event applied to a [`QueryState`].
#[derive(Debug)]
pub enum QueryEvent<T, E> {
    /// A new attempt began.
    Started,

    /// The live attempt produced a value.
    Succeeded(Arc<T>),

    /// The live attempt failed with an already-normalized error.
    Failed(E),

    /// The query was disabled for its current inputs.
    Reset,
}

impl<T, E> QueryEvent<T, E> {
    /// The payload-free kind of this event.
    pub fn kind(&self) -> TransitionKind {
        match self {
            QueryEvent::Started => TransitionKind::Started,
            QueryEvent::Succeeded(_) => TransitionKind::Succeeded,
            QueryEvent::Failed(_) => TransitionKind::Failed,
            QueryEvent::Reset => TransitionKind::Reset,
        }
    }
}

/// A consistent `{status, data, error}` snapshot.
pub struct QueryState<T, E> {
    status: QueryStatus,
    data: Option<Arc<T>>,
    error: Option<E>,
}

impl<T, E> QueryState<T, E> {
    /// The initial, idle state.
    pub fn new() -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
        }
    }

    pub fn status(&self) -> QueryStatus {
        self.status
    }

    pub fn is_idle(&self) -> bool {
        self.status == QueryStatus::Idle
    }

    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    /// The last successfully produced value.
    ///
    /// The value is shared, not copied. Callers must treat it as immutable;
    /// the query never mutates it after publishing.
    pub fn data(&self) -> Option<&Arc<T>> {
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&E> {
        self.error.as_ref()
    }

    /// Apply one event.
    ///
    /// On error the state is left untouched.
    pub fn apply(&mut self, event: QueryEvent<T, E>) -> Result<(), TransitionError> {
        let kind = event.kind();
        match event {
            QueryEvent::Started => {
                self.status = QueryStatus::Loading;
                self.data = None;
                self.error = None;
            }
            QueryEvent::Succeeded(data) => {
                self.require_loading(kind)?;
                self.status = QueryStatus::Success;
                self.data = Some(data);
                self.error = None;
            }
            QueryEvent::Failed(error) => {
                self.require_loading(kind)?;
                self.status = QueryStatus::Error;
                self.data = None;
                self.error = Some(error);
            }
            QueryEvent::Reset => {
                self.status = QueryStatus::Idle;
                self.data = None;
                self.error = None;
            }
        }
        Ok(())
    }

    fn require_loading(&self, event: TransitionKind) -> Result<(), TransitionError> {
        if self.status == QueryStatus::Loading {
            Ok(())
        } else {
            Err(TransitionError {
                status: self.status,
                event,
            })
        }
    }
}

impl<T, E> Default for QueryState<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E: Clone> Clone for QueryState<T, E> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for QueryState<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryState")
            .field("status", &self.status)
            .field("data", &self.data)
            .field("error", &self.error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type State = QueryState<i32, String>;

    #[test]
    fn starts_idle_and_empty() {
        let state = State::new();
        assert!(state.is_idle());
        assert!(state.data().is_none());
        assert!(state.error().is_none());
    }

    #[test]
    fn started_then_succeeded() {
        let mut state = State::new();
        state.apply(QueryEvent::Started).unwrap();
        assert!(state.is_loading());

        state.apply(QueryEvent::Succeeded(Arc::new(42))).unwrap();
        assert!(state.is_success());
        assert_eq!(state.data().map(|d| **d), Some(42));
        assert!(state.error().is_none());
    }

    #[test]
    fn started_then_failed_clears_data() {
        let mut state = State::new();
        state.apply(QueryEvent::Started).unwrap();
        state.apply(QueryEvent::Succeeded(Arc::new(1))).unwrap();
        state.apply(QueryEvent::Started).unwrap();
        state.apply(QueryEvent::Failed("boom".into())).unwrap();

        assert!(state.is_error());
        assert!(state.data().is_none());
        assert_eq!(state.error().map(String::as_str), Some("boom"));
    }

    #[test]
    fn restart_clears_previous_outcome() {
        let mut state = State::new();
        state.apply(QueryEvent::Started).unwrap();
        state.apply(QueryEvent::Failed("boom".into())).unwrap();

        state.apply(QueryEvent::Started).unwrap();
        assert!(state.is_loading());
        assert!(state.error().is_none());
        assert!(state.data().is_none());
    }

    #[test]
    fn settling_outside_loading_is_rejected() {
        let mut state = State::new();
        let err = state.apply(QueryEvent::Succeeded(Arc::new(1))).unwrap_err();
        assert_eq!(err.status, QueryStatus::Idle);
        assert_eq!(err.event, TransitionKind::Succeeded);
        assert!(state.is_idle());

        state.apply(QueryEvent::Started).unwrap();
        state.apply(QueryEvent::Succeeded(Arc::new(1))).unwrap();
        let err = state.apply(QueryEvent::Failed("late".into())).unwrap_err();
        assert_eq!(err.status, QueryStatus::Success);
        // Untouched by the rejected event.
        assert_eq!(state.data().map(|d| **d), Some(1));
    }

    #[test]
    fn reset_returns_to_idle_from_anywhere() {
        let mut state = State::new();
        state.apply(QueryEvent::Started).unwrap();
        state.apply(QueryEvent::Reset).unwrap();
        assert!(state.is_idle());

        state.apply(QueryEvent::Started).unwrap();
        state.apply(QueryEvent::Succeeded(Arc::new(3))).unwrap();
        state.apply(QueryEvent::Reset).unwrap();
        assert!(state.is_idle());
        assert!(state.data().is_none());
    }

    #[test]
    fn settled_statuses() {
        assert!(!QueryStatus::Idle.is_settled());
        assert!(!QueryStatus::Loading.is_settled());
        assert!(QueryStatus::Success.is_settled());
        assert!(QueryStatus::Error.is_settled());
    }
}
