//! Reactive Queries
//!
//! A query node exposes the latest result of an asynchronous producer that
//! re-runs whenever its input signals change.
//!
//! # How a Query Runs
//!
//! 1. A dependency write, a `refetch()` or the eager initial trigger signals
//!    the [`TriggerCoalescer`]. Signals issued in the same synchronous turn
//!    merge into one trigger.
//!
//! 2. The node's driver snapshots the dependencies, asks the
//!    [`Supersession`] controller for a new generation and moves the
//!    [`QueryState`] to `Loading`.
//!
//! 3. The producer runs as its own task. When it settles, the driver applies
//!    the result only if its generation is still current; superseded results
//!    are dropped.
//!
//! 4. Every transition is published through the [`StateBroadcaster`], which
//!    replays the current snapshot to late observers.
//!
//! Producer failures are data: they land in the `Error` state and are never
//! returned as `Err`. The only `Err` a caller sees is a [`QueryError`] at
//! construction.

mod broadcaster;
mod builder;
mod coalescer;
mod error;
mod node;
mod state;
mod supersession;

pub use broadcaster::StateBroadcaster;
pub use builder::QueryBuilder;
pub use coalescer::{Trigger, TriggerCoalescer, TriggerReason, TriggerStream};
pub use error::{NoValue, Panicked, QueryError, TransitionError};
pub use node::QueryNode;
pub use state::{QueryEvent, QueryState, QueryStatus, TransitionKind};
pub use supersession::{Attempt, Supersession};
