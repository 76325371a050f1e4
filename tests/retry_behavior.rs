use futures::stream;
use millstream::{unicast, Backoff, Failure, Flow, FlowProbe, Retry};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn flaky(message: &str) -> Failure {
    Failure::msg(message)
}

#[tokio::test]
async fn a_failing_chain_is_rerun_to_the_retry_limit() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let flow = Flow::from_factory(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        stream::iter(vec![Err::<i32, _>(flaky("connection reset"))])
    })
    .map(|n| n + 1);

    let failure = flow.retry_n(2).collect().await.unwrap_err();

    // Initial attempt plus two retries, each rebuilding the full chain.
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(failure.to_string(), "connection reset");
}

#[tokio::test]
async fn eventual_success_restarts_delivery_from_the_top() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let flow = Flow::from_factory(move || {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            stream::iter(vec![Ok(1), Err(flaky("flaky fetch"))])
        } else {
            stream::iter(vec![Ok(1), Ok(2), Ok(3)])
        }
    });

    let items = flow.retry(Retry::max(5)).collect().await.unwrap();

    // Each reattempt re-subscribes the cold source, so the prefix repeats.
    assert_eq!(items, vec![1, 1, 1, 2, 3]);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn an_unbroken_run_of_failures_exhausts_a_row_limit() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let flow = Flow::from_factory(move || {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            stream::iter(vec![Ok(1), Err(flaky("first outage"))])
        } else {
            stream::iter(vec![Err(flaky("still down"))])
        }
    });

    FlowProbe::new(flow.retry(Retry::max_in_a_row(2)))
        .expect_next(1)
        .expect_error_message("still down")
        .verify()
        .await;

    // The item delivered on the first attempt does not excuse the two
    // consecutive failures that follow it.
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn constant_backoff_spaces_reattempts() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let flow = Flow::from_factory(move || {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            stream::iter(vec![Err(flaky("not yet"))])
        } else {
            stream::iter(vec![Ok(42)])
        }
    });

    let start = tokio::time::Instant::now();
    let policy = Retry::max(5).with_backoff(Backoff::constant(Duration::from_millis(100)));
    let items = flow.retry(policy).collect().await.unwrap();

    assert_eq!(items, vec![42]);
    assert_eq!(start.elapsed(), Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn protocol_violations_bypass_the_retry_policy() {
    let (emitter, flow) = unicast::<i32>();
    emitter.complete().unwrap();
    assert_eq!(flow.clone().collect().await.unwrap(), Vec::<i32>::new());

    // An hour of backoff per retry would show up on the paused clock; a
    // protocol violation must surface without consulting the policy at all.
    let start = tokio::time::Instant::now();
    let policy = Retry::max(5).with_backoff(Backoff::constant(Duration::from_secs(3600)));
    let failure = flow.retry(policy).collect().await.unwrap_err();

    assert!(failure.is_protocol());
    assert_eq!(start.elapsed(), Duration::ZERO);
}
