//! Query construction options.
//!
//! A [`QueryBuilder`] collects everything a query node needs before it is
//! spawned:
//!
//! | Option          | Default            | Meaning                                         |
//! |-----------------|--------------------|-------------------------------------------------|
//! | dependencies    | given              | signals watched and passed to the producer      |
//! | producer        | given              | `(values, token) -> Future<Result<T, R>>`       |
//! | `map_error`     | identity           | normalizes producer failures into `E`           |
//! | `eager`         | `true`             | fire the first attempt at construction          |
//! | `enabled`       | always enabled     | skip attempts for inputs that cannot be fetched |
//!
//! Nodes run on a current-thread Tokio runtime. Writes made in one
//! synchronous turn of that runtime land in a single trigger; a multi-thread
//! runtime cannot promise that, so building on one fails with
//! [`QueryError::MultiThreadRuntime`].
//!
//! A producer that panics fails its attempt with [`Panicked`], converted into
//! the producer's error type.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};
use futures_util::stream::{Stream, StreamExt};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::sync::CancellationToken;

use super::error::{NoValue, Panicked, QueryError};
use super::node::QueryNode;
use crate::reactive::Dependencies;

pub(crate) type Producer<V, T, R> =
    Arc<dyn Fn(V, CancellationToken) -> BoxFuture<'static, Result<T, R>> + Send + Sync>;
pub(crate) type Normalizer<R, E> = Arc<dyn Fn(R) -> E + Send + Sync>;
pub(crate) type Gate<V> = Arc<dyn Fn(&V) -> bool + Send + Sync>;

/// Options for a query node.
///
/// # Example
///
/// ```rust
/// use quarry_core::query::QueryBuilder;
/// use quarry_core::reactive::Signal;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let user_id = Signal::new(0_u32);
///
/// let user = QueryBuilder::new(user_id.clone(), |id, _cancel| async move {
///     if id < 1000 { Ok(format!("USER-{id}")) } else { Err("unknown user".to_string()) }
/// })
/// .enabled(|id| *id != 0)
/// .map_error(|_| "Something went wrong...".to_string())
/// .build()
/// .expect("inside a runtime");
///
/// user_id.write(7);
/// # let mut rx = user.watch();
/// # rx.wait_for(|s| s.is_success()).await.unwrap();
/// # assert_eq!(user.data().as_deref().map(String::as_str), Some("USER-7"));
/// # }
/// ```
pub struct QueryBuilder<D, T, R, E>
where
    D: Dependencies,
{
    pub(crate) dependencies: D,
    pub(crate) producer: Producer<D::Values, T, R>,
    pub(crate) normalize: Normalizer<R, E>,
    pub(crate) eager: bool,
    pub(crate) enabled: Option<Gate<D::Values>>,
}

impl<D, T, R> QueryBuilder<D, T, R, R>
where
    D: Dependencies,
    T: Send + Sync + 'static,
    R: From<Panicked> + Send + 'static,
{
    /// Options for a query whose producer returns a single future.
    pub fn new<P, Fut>(dependencies: D, producer: P) -> Self
    where
        P: Fn(D::Values, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, R>> + Send + 'static,
    {
        let producer: Producer<D::Values, T, R> = Arc::new(move |values, token| {
            match panic::catch_unwind(AssertUnwindSafe(|| producer(values, token))) {
                Ok(pending) => AssertUnwindSafe(pending)
                    .catch_unwind()
                    .map(|outcome| outcome.unwrap_or_else(|payload| Err(panicked(payload))))
                    .boxed(),
                Err(payload) => future::ready(Err(panicked(payload))).boxed(),
            }
        });
        let normalize: Normalizer<R, R> = Arc::new(|raw: R| raw);

        Self {
            dependencies,
            producer,
            normalize,
            eager: true,
            enabled: None,
        }
    }

    /// Options for a query whose producer yields a stream.
    ///
    /// Only the first item settles an attempt; the rest of the stream is
    /// dropped. A stream that ends empty fails the attempt with [`NoValue`].
    pub fn from_stream<P, S>(dependencies: D, producer: P) -> Self
    where
        P: Fn(D::Values, CancellationToken) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<T, R>> + Send + 'static,
        R: From<NoValue>,
    {
        Self::new(dependencies, move |values, token| {
            let stream = producer(values, token);
            async move {
                let mut stream = Box::pin(stream);
                match stream.next().await {
                    Some(outcome) => outcome,
                    None => Err(R::from(NoValue)),
                }
            }
        })
    }
}

impl<D, T, R, E> QueryBuilder<D, T, R, E>
where
    D: Dependencies,
    R: 'static,
    E: 'static,
{
    /// Normalize producer failures before they are stored.
    ///
    /// Calls compose: each function receives the previous one's output.
    pub fn map_error<E2, F>(self, f: F) -> QueryBuilder<D, T, R, E2>
    where
        F: Fn(E) -> E2 + Send + Sync + 'static,
    {
        let previous = self.normalize;
        QueryBuilder {
            dependencies: self.dependencies,
            producer: self.producer,
            normalize: Arc::new(move |raw| f(previous(raw))),
            eager: self.eager,
            enabled: self.enabled,
        }
    }

    /// Whether the first attempt fires at construction (default `true`).
    ///
    /// A lazy query waits for `refetch()` or a dependency change, even when it
    /// has no dependencies at all.
    pub fn eager(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }

    /// Only start attempts for inputs that satisfy `predicate`.
    ///
    /// A trigger whose inputs fail the predicate supersedes any in-flight
    /// attempt and returns the query to idle.
    pub fn enabled<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&D::Values) -> bool + Send + Sync + 'static,
    {
        self.enabled = Some(Arc::new(predicate));
        self
    }
}

impl<D, T, R, E> QueryBuilder<D, T, R, E>
where
    D: Dependencies,
    T: Send + Sync + 'static,
    R: Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Spawn the query on the current Tokio runtime.
    ///
    /// The runtime must be current-thread, and dependencies should be written
    /// from tasks on that runtime.
    pub fn build(self) -> Result<QueryNode<T, E>, QueryError> {
        let handle = Handle::try_current().map_err(|_| QueryError::NoRuntime)?;
        self.build_on(&handle)
    }

    /// Spawn the query on the given current-thread runtime.
    pub fn build_on(self, handle: &Handle) -> Result<QueryNode<T, E>, QueryError> {
        match handle.runtime_flavor() {
            RuntimeFlavor::CurrentThread => Ok(QueryNode::spawn(self, handle)),
            _ => Err(QueryError::MultiThreadRuntime),
        }
    }
}

fn panicked<R: From<Panicked>>(payload: Box<dyn Any + Send>) -> R {
    let panic = Panicked::from_payload(payload);
    tracing::error!(%panic, "producer panicked");
    R::from(panic)
}
