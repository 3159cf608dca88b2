//! Dependency lists.
//!
//! A query watches an explicit, ordered list of signals. There is no automatic
//! dependency discovery: whatever is listed here is watched, and its values
//! are read exactly once per trigger and handed to the producer.

use std::sync::Arc;

use smallvec::SmallVec;

use super::signal::Signal;
use super::subscriber::Subscription;

/// Callback shared by every watched signal of one query.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Subscriptions held on behalf of one query. Most queries watch a handful of
/// signals, so they stay inline.
pub type Subscriptions = SmallVec<[Subscription; 4]>;

/// An ordered set of signals a query reads at trigger time.
pub trait Dependencies: Send + Sync + 'static {
    /// The values read from every signal, in declaration order.
    type Values: Send + 'static;

    /// Read every signal synchronously.
    fn snapshot(&self) -> Self::Values;

    /// Subscribe `on_change` to every signal.
    fn watch(&self, on_change: &ChangeCallback) -> Subscriptions;

    /// Number of signals watched.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn forward(on_change: &ChangeCallback) -> impl Fn() + Send + Sync + 'static {
    let on_change = Arc::clone(on_change);
    move || on_change()
}

impl Dependencies for () {
    type Values = ();

    fn snapshot(&self) -> Self::Values {}

    fn watch(&self, _on_change: &ChangeCallback) -> Subscriptions {
        SmallVec::new()
    }

    fn len(&self) -> usize {
        0
    }
}

impl<A> Dependencies for Signal<A>
where
    A: Clone + Send + Sync + 'static,
{
    type Values = A;

    fn snapshot(&self) -> Self::Values {
        self.read()
    }

    fn watch(&self, on_change: &ChangeCallback) -> Subscriptions {
        let mut subscriptions = SmallVec::new();
        subscriptions.push(self.subscribe(forward(on_change)));
        subscriptions
    }

    fn len(&self) -> usize {
        1
    }
}

impl<A> Dependencies for Vec<Signal<A>>
where
    A: Clone + Send + Sync + 'static,
{
    type Values = Vec<A>;

    fn snapshot(&self) -> Self::Values {
        self.iter().map(Signal::read).collect()
    }

    fn watch(&self, on_change: &ChangeCallback) -> Subscriptions {
        self.iter()
            .map(|signal| signal.subscribe(forward(on_change)))
            .collect()
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }
}

macro_rules! tuple_dependencies {
    ($len:expr; $($name:ident : $idx:tt),+) => {
        impl<$($name),+> Dependencies for ($(Signal<$name>,)+)
        where
            $($name: Clone + Send + Sync + 'static,)+
        {
            type Values = ($($name,)+);

            fn snapshot(&self) -> Self::Values {
                ($(self.$idx.read(),)+)
            }

            fn watch(&self, on_change: &ChangeCallback) -> Subscriptions {
                let mut subscriptions = SmallVec::new();
                $(subscriptions.push(self.$idx.subscribe(forward(on_change)));)+
                subscriptions
            }

            fn len(&self) -> usize {
                $len
            }
        }
    };
}

tuple_dependencies!(1; A: 0);
tuple_dependencies!(2; A: 0, B: 1);
tuple_dependencies!(3; A: 0, B: 1, C: 2);
tuple_dependencies!(4; A: 0, B: 1, C: 2, D: 3);
tuple_dependencies!(5; A: 0, B: 1, C: 2, D: 3, E: 4);
tuple_dependencies!(6; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
