//! Error types.
//!
//! Producer failures are never reported through these types: they are
//! captured into the query's `error` state. What lives here are framework
//! defects (a node built outside a suitable runtime, an impossible state
//! transition) and the failures the query itself attaches to an attempt: a
//! stream producer that yields nothing, or a producer that panics.

use std::any::Any;

use thiserror::Error;

use super::state::{QueryStatus, TransitionKind};

/// Errors raised while constructing a query node.
#[derive(Debug, Error)]
pub enum QueryError {
    /// `build()` was called outside of a Tokio runtime.
    #[error("query nodes must be built inside a tokio runtime")]
    NoRuntime,

    /// The runtime is multi-threaded.
    ///
    /// A node's driver must share the execution context of the code writing
    /// its dependencies, or a synchronous burst of writes may be split across
    /// several triggers.
    #[error("query nodes require a current-thread tokio runtime")]
    MultiThreadRuntime,
}

/// A state-machine event that is not legal in the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot apply `{event}` while {status}")]
pub struct TransitionError {
    pub status: QueryStatus,
    pub event: TransitionKind,
}

/// A stream producer finished without yielding a value.
///
/// Only the first value of a stream settles an attempt. A stream that ends
/// before producing one fails the attempt with this error, converted into the
/// producer's error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Error)]
#[error("producer stream ended before yielding a value")]
pub struct NoValue;

/// A producer panicked, either when called or while its future was polled.
///
/// The attempt fails with this error, converted into the producer's error
/// type, so the query settles instead of loading forever.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("producer panicked: {message}")]
pub struct Panicked {
    message: String,
}

impl Panicked {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self { message }
    }

    /// The panic message, when the payload was a string.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<NoValue> for String {
    fn from(err: NoValue) -> Self {
        err.to_string()
    }
}

impl From<Panicked> for String {
    fn from(err: Panicked) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_error_names_status_and_event() {
        let err = TransitionError {
            status: QueryStatus::Idle,
            event: TransitionKind::Succeeded,
        };
        assert_eq!(err.to_string(), "cannot apply `succeeded` while idle");
    }

    #[test]
    fn panic_payloads_become_messages() {
        let from_str = Panicked::from_payload(Box::new("exploded"));
        assert_eq!(from_str.message(), "exploded");

        let from_string = Panicked::from_payload(Box::new(format!("code {}", 7)));
        assert_eq!(String::from(from_string), "producer panicked: code 7");

        let opaque = Panicked::from_payload(Box::new(7_u8));
        assert_eq!(opaque.message(), "non-string panic payload");
    }
}
