//! Integration Tests for Query Nodes
//!
//! These tests drive query nodes end to end: signals trigger producers,
//! results flow through the state machine and observers see the outcome.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use quarry_core::query::{QueryBuilder, QueryError, QueryNode, QueryState, QueryStatus};
use quarry_core::reactive::Signal;

/// Yield to the runtime until `condition` holds.
async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached");
}

/// Give the driver and attempt tasks a chance to run.
async fn settle_tasks() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Producer calls parked until the test resolves them.
type Gates = Arc<Mutex<Vec<(oneshot::Sender<Result<i32, String>>, CancellationToken)>>>;

fn gated_node(gates: &Gates) -> QueryNode<i32, String> {
    let gates = Arc::clone(gates);
    QueryBuilder::new((), move |(), token| {
        let (tx, rx) = oneshot::channel();
        gates.lock().push((tx, token));
        async move { rx.await.unwrap_or_else(|_| Err("gate dropped".to_string())) }
    })
    .eager(false)
    .build()
    .unwrap()
}

fn resolve(gates: &Gates, index: usize, outcome: Result<i32, String>) {
    let (tx, _) = gates.lock().remove(index);
    let _ = tx.send(outcome);
}

fn record_statuses(node: &QueryNode<i32, String>) -> (Arc<Mutex<Vec<QueryStatus>>>, quarry_core::Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let sub = node.subscribe(move |state: &QueryState<i32, String>| sink.lock().push(state.status()));
    (seen, sub)
}

/// Test that a successful producer moves the query through loading to success.
#[tokio::test]
async fn producer_value_becomes_data() {
    let node = QueryBuilder::new((), |(), _| async { Ok::<_, String>(42) })
        .build()
        .unwrap();
    let (seen, _sub) = record_statuses(&node);

    eventually(|| node.status() == QueryStatus::Success).await;

    assert_eq!(node.data().as_deref(), Some(&42));
    assert!(!node.is_loading());
    assert!(!node.is_error());
    assert_eq!(node.error(), None);
    assert_eq!(
        *seen.lock(),
        vec![QueryStatus::Idle, QueryStatus::Loading, QueryStatus::Success]
    );
}

/// Test that producer failures are normalized and stored, never thrown.
#[tokio::test]
async fn failure_is_normalized_into_error_state() {
    let node = QueryBuilder::new((), |(), _| async { Err::<i32, _>("boom".to_string()) })
        .map_error(|raw| raw.to_uppercase())
        .build()
        .unwrap();

    eventually(|| node.status() == QueryStatus::Error).await;

    assert!(node.is_error());
    assert_eq!(node.error().as_deref(), Some("BOOM"));
    assert_eq!(node.data(), None);
}

/// Test that only the latest attempt's result lands, whatever the completion order.
#[tokio::test]
async fn latest_refetch_wins() {
    let gates = Gates::default();
    let node = gated_node(&gates);
    let (seen, _sub) = record_statuses(&node);

    node.refetch();
    eventually(|| gates.lock().len() == 1).await;
    node.refetch();
    eventually(|| gates.lock().len() == 2).await;

    // The superseded attempt was told to stop.
    assert!(gates.lock()[0].1.is_cancelled());
    assert!(!gates.lock()[1].1.is_cancelled());

    // Second attempt resolves first, then the stale one.
    resolve(&gates, 1, Ok(2));
    eventually(|| node.status() == QueryStatus::Success).await;
    resolve(&gates, 0, Ok(1));
    settle_tasks().await;

    assert_eq!(node.data().as_deref(), Some(&2));
    assert_eq!(node.generation(), 2);
    let successes = seen
        .lock()
        .iter()
        .filter(|status| **status == QueryStatus::Success)
        .count();
    assert_eq!(successes, 1);
}

/// Test that two refetches in immediate succession start one attempt, and the
/// pending attempt's late result is discarded.
#[tokio::test]
async fn immediate_double_refetch_while_pending() {
    let gates = Gates::default();
    let node = gated_node(&gates);

    node.refetch();
    eventually(|| gates.lock().len() == 1).await;

    node.refetch();
    node.refetch();
    eventually(|| gates.lock().len() == 2).await;
    settle_tasks().await;
    assert_eq!(gates.lock().len(), 2);
    assert_eq!(node.generation(), 2);
    assert!(gates.lock()[0].1.is_cancelled());

    resolve(&gates, 1, Ok(20));
    eventually(|| node.status() == QueryStatus::Success).await;

    resolve(&gates, 0, Ok(10));
    settle_tasks().await;

    assert_eq!(node.data().as_deref(), Some(&20));
    assert_eq!(node.generation(), 2);
}

/// Test that a panicking producer fails its attempt instead of loading forever.
#[tokio::test]
async fn panicking_producer_becomes_an_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let node = QueryBuilder::new((), move |(), _| {
        let call = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if call == 0 {
                panic!("lost connection");
            }
            Ok::<_, String>(call)
        }
    })
    .map_error(|raw| raw.to_uppercase())
    .build()
    .unwrap();

    eventually(|| node.is_error()).await;
    assert_eq!(node.error().as_deref(), Some("PRODUCER PANICKED: LOST CONNECTION"));

    node.refetch();
    eventually(|| node.status() == QueryStatus::Success).await;
    assert_eq!(node.data().as_deref(), Some(&1));
}

/// Test that query nodes refuse a multi-thread runtime.
#[test]
fn multi_thread_runtime_is_refused() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let result = runtime.block_on(async {
        QueryBuilder::new((), |(), _| async { Ok::<_, String>(1) }).build()
    });
    assert!(matches!(result, Err(QueryError::MultiThreadRuntime)));
}

/// Test that writes to several dependencies in one turn cost one producer call.
#[tokio::test]
async fn burst_of_writes_is_coalesced() {
    let a = Signal::new(1);
    let b = Signal::new(2);
    let calls = Arc::new(Mutex::new(Vec::new()));

    let recorded = Arc::clone(&calls);
    let node = QueryBuilder::new((a.clone(), b.clone()), move |(x, y), _| {
        recorded.lock().push((x, y));
        async move { Ok::<_, String>(x + y) }
    })
    .build()
    .unwrap();

    eventually(|| node.data().as_deref() == Some(&3)).await;

    a.write(10);
    b.write(20);
    eventually(|| node.data().as_deref() == Some(&30)).await;
    settle_tasks().await;

    assert_eq!(*calls.lock(), vec![(1, 2), (10, 20)]);
}

/// Test that the eager trigger and writes made right after construction merge.
#[tokio::test]
async fn writes_during_construction_merge_with_initial_trigger() {
    let input = Signal::new(1);
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    let node = QueryBuilder::new(input.clone(), move |v, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok::<_, String>(v) }
    })
    .build()
    .unwrap();
    input.write(2);
    input.write(3);

    eventually(|| node.status() == QueryStatus::Success).await;
    settle_tasks().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(node.data().as_deref(), Some(&3));
}

/// Test that writing an equal value does not trigger the producer.
#[tokio::test]
async fn equal_write_does_not_trigger() {
    let input = Signal::new(5);
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    let node = QueryBuilder::new(input.clone(), move |v, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok::<_, String>(v) }
    })
    .build()
    .unwrap();
    eventually(|| node.status() == QueryStatus::Success).await;

    input.write(5);
    settle_tasks().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Test that loading stays true until the attempt settles, and flips once each way.
#[tokio::test]
async fn loading_holds_until_settle() {
    let gates = Gates::default();
    let node = gated_node(&gates);

    let flips = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&flips);
    let _sub = node.subscribe_loading(move |loading| sink.lock().push(loading));

    node.refetch();
    eventually(|| gates.lock().len() == 1).await;
    assert!(node.is_loading());

    settle_tasks().await;
    assert!(node.is_loading());
    assert_eq!(node.data(), None);

    resolve(&gates, 0, Ok(7));
    eventually(|| !node.is_loading()).await;

    assert_eq!(node.data().as_deref(), Some(&7));
    assert_eq!(*flips.lock(), vec![false, true, false]);
}

/// Test that a new attempt clears the previous data and error.
#[tokio::test]
async fn refetch_clears_previous_outcome() {
    let gates = Gates::default();
    let node = gated_node(&gates);

    node.refetch();
    eventually(|| gates.lock().len() == 1).await;
    resolve(&gates, 0, Err("first".to_string()));
    eventually(|| node.is_error()).await;
    assert_eq!(node.error().as_deref(), Some("first"));

    node.refetch();
    eventually(|| gates.lock().len() == 1).await;
    assert!(node.is_loading());
    assert_eq!(node.error(), None);
    assert_eq!(node.data(), None);

    resolve(&gates, 0, Ok(9));
    eventually(|| node.status() == QueryStatus::Success).await;
    assert!(!node.is_error());
    assert_eq!(node.data().as_deref(), Some(&9));
}

/// Test that a late subscriber receives the current snapshot exactly once.
#[tokio::test]
async fn late_subscriber_gets_current_snapshot() {
    let node = QueryBuilder::new((), |(), _| async { Ok::<_, String>(42) })
        .build()
        .unwrap();
    eventually(|| node.status() == QueryStatus::Success).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = node.subscribe(move |state: &QueryState<i32, String>| {
        sink.lock().push((state.status(), state.data().map(|v| **v)));
    });
    settle_tasks().await;

    assert_eq!(*seen.lock(), vec![(QueryStatus::Success, Some(42))]);
}

/// Test that nothing moves after disposal, even when the producer resolves.
#[tokio::test]
async fn disposal_silences_in_flight_attempt() {
    let gates = Gates::default();
    let node = gated_node(&gates);

    node.refetch();
    eventually(|| gates.lock().len() == 1).await;

    let deliveries = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&deliveries);
    let _sub = node.subscribe(move |_: &QueryState<i32, String>| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(deliveries.load(Ordering::SeqCst), 1);

    node.dispose();
    assert!(gates.lock()[0].1.is_cancelled());

    resolve(&gates, 0, Ok(1));
    node.refetch();
    settle_tasks().await;

    assert_eq!(deliveries.load(Ordering::SeqCst), 1);
    assert_eq!(node.status(), QueryStatus::Loading);
    assert_eq!(node.data(), None);
    assert!(gates.lock().is_empty());
}

/// Test that a disabled input supersedes the attempt and resets to idle.
#[tokio::test]
async fn disabled_input_resets_to_idle() {
    let user_id = Signal::new(0_u32);
    let node = QueryBuilder::new(user_id.clone(), |id, _| async move {
        Ok::<_, String>(format!("USER-{id}"))
    })
    .enabled(|id| *id != 0)
    .build()
    .unwrap();

    settle_tasks().await;
    assert_eq!(node.status(), QueryStatus::Idle);

    user_id.write(7);
    eventually(|| node.status() == QueryStatus::Success).await;
    assert_eq!(node.data().as_deref().map(String::as_str), Some("USER-7"));

    user_id.write(0);
    eventually(|| node.status() == QueryStatus::Idle).await;
    assert_eq!(node.data(), None);
    assert_eq!(node.error(), None);
}

/// Test that a stream producer settles on its first item.
#[tokio::test]
async fn stream_producer_uses_first_item() {
    let node = QueryBuilder::from_stream((), |(), _| {
        futures_util::stream::iter(vec![Ok::<_, String>(1), Ok(2)])
    })
    .build()
    .unwrap();
    eventually(|| node.status() == QueryStatus::Success).await;
    assert_eq!(node.data().as_deref(), Some(&1));

    let empty = QueryBuilder::from_stream((), |(), _| {
        futures_util::stream::empty::<Result<i32, String>>()
    })
    .build()
    .unwrap();
    eventually(|| empty.is_error()).await;
    assert_eq!(
        empty.error().as_deref(),
        Some("producer stream ended before yielding a value")
    );
}

/// Test that one signal drives several queries independently.
#[tokio::test]
async fn shared_signal_drives_every_query() {
    let input = Signal::new(2);
    let doubled = QueryBuilder::new(input.clone(), |v, _| async move { Ok::<_, String>(v * 2) })
        .build()
        .unwrap();
    let squared = QueryBuilder::new(input.clone(), |v, _| async move { Ok::<_, String>(v * v) })
        .build()
        .unwrap();

    input.write(5);
    eventually(|| doubled.data().as_deref() == Some(&10)).await;
    eventually(|| squared.data().as_deref() == Some(&25)).await;

    doubled.dispose();
    input.write(6);
    eventually(|| squared.data().as_deref() == Some(&36)).await;
    assert_eq!(doubled.data().as_deref(), Some(&10));
    assert_eq!(input.subscriber_count(), 1);
}

/// Test that a producer can stop early when its attempt is superseded.
#[tokio::test]
async fn producer_observes_cancellation() {
    let stopped = Arc::new(AtomicBool::new(false));
    let calls = Arc::new(AtomicUsize::new(0));

    let flag = Arc::clone(&stopped);
    let counter = Arc::clone(&calls);
    let node = QueryBuilder::new((), move |(), token: CancellationToken| {
        let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
        let flag = Arc::clone(&flag);
        async move {
            if first {
                token.cancelled().await;
                flag.store(true, Ordering::SeqCst);
                Err("cancelled".to_string())
            } else {
                Ok(2)
            }
        }
    })
    .build()
    .unwrap();

    eventually(|| calls.load(Ordering::SeqCst) == 1).await;
    node.refetch();

    eventually(|| node.status() == QueryStatus::Success).await;
    eventually(|| stopped.load(Ordering::SeqCst)).await;
    settle_tasks().await;

    assert_eq!(node.data().as_deref(), Some(&2));
    assert!(!node.is_error());
}

/// Test that the watch view replays the current snapshot to async consumers.
#[tokio::test]
async fn watch_sees_settled_state() {
    let node = QueryBuilder::new((), |(), _| async { Ok::<_, String>("ready") })
        .build()
        .unwrap();

    let mut rx = node.watch();
    let state = rx
        .wait_for(|state| state.status().is_settled())
        .await
        .unwrap()
        .clone();

    assert!(state.is_success());
    assert_eq!(state.data().map(|v| **v), Some("ready"));
}
