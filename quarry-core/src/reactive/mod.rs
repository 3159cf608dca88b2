//! Reactive Primitives
//!
//! This module implements the reactive inputs a query watches.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A [`Signal`] is a reactive cell: a container for mutable state that can be
//! read synchronously and notifies its subscribers when a write changes the
//! value. Whether a write counts as a change is decided by the signal's
//! equality, `PartialEq` by default.
//!
//! ## Dependencies
//!
//! Queries do not discover what they read. They are given an explicit
//! [`Dependencies`] list (a signal, a tuple of signals, or a `Vec` of them),
//! which is watched for changes and snapshotted when the query fires.
//!
//! ## Subscriptions
//!
//! Every callback registration returns a [`Subscription`]. Dropping it removes
//! the callback; it never keeps the source alive.

mod dependencies;
mod signal;
mod subscriber;

pub use dependencies::{ChangeCallback, Dependencies, Subscriptions};
pub use signal::Signal;
pub use subscriber::{SubscriberId, Subscription};
