//! Quarry Core
//!
//! Reactive asynchronous queries: a value derived from an async producer that
//! re-runs whenever its input signals change.
//!
//! It provides:
//!
//! - Reactive cells ([`Signal`]) with change notification
//! - Query nodes exposing `data`, `is_loading`, `is_error`, `error` and
//!   `refetch`
//! - Zero-delay coalescing of trigger bursts
//! - Last-trigger-wins supersession of in-flight attempts
//! - Replay-on-subscribe state broadcasting
//!
//! # Architecture
//!
//! - `reactive`: signals, dependency lists and subscriptions
//! - `query`: the state machine, coalescer, supersession controller,
//!   broadcaster and the query node composing them
//!
//! Query nodes run on a current-thread Tokio runtime. Each node owns a driver
//! task that serializes every state change, so observers always see
//! transitions in order.
//!
//! # Example
//!
//! ```rust
//! use quarry_core::{QueryBuilder, Signal};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let first = Signal::new(20);
//! let second = Signal::new(1);
//!
//! let sum = QueryBuilder::new((first.clone(), second.clone()), |(a, b), _cancel| async move {
//!     Ok::<_, String>(a + b)
//! })
//! .build()
//! .expect("inside a runtime");
//!
//! // Both writes land in a single producer call.
//! first.write(40);
//! second.write(2);
//!
//! let mut rx = sum.watch();
//! rx.wait_for(|state| state.data().is_some_and(|v| **v == 42))
//!     .await
//!     .unwrap();
//! assert!(!sum.is_loading());
//! # }
//! ```

pub mod query;
pub mod reactive;

pub use query::{Panicked, QueryBuilder, QueryError, QueryNode, QueryState, QueryStatus};
pub use reactive::{Signal, Subscription};
