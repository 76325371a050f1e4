use futures::stream;
use millstream::{Disposable, Disposition, Flow, Scheduler};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Tracks how many gated callbacks overlap in time.
#[derive(Default)]
struct Overlap {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Overlap {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

fn deliver_through(gate: Scheduler, pipelines: usize, overlap: &Arc<Overlap>) -> Vec<Disposable> {
    (0..pipelines)
        .map(|_| {
            let overlap = Arc::clone(overlap);
            Flow::range(0, 6).run_on(gate.clone()).subscribe_each(move |signal| {
                if signal.is_next() {
                    overlap.enter();
                    std::thread::sleep(Duration::from_millis(2));
                    overlap.exit();
                }
            })
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_shared_single_scheduler_never_overlaps_deliveries() {
    let gate = Scheduler::single();
    let overlap = Arc::new(Overlap::default());

    for disposable in deliver_through(gate, 4, &overlap) {
        assert_eq!(disposable.join().await, Disposition::Completed);
    }

    assert_eq!(overlap.peak(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_shared_pool_bounds_concurrent_deliveries() {
    let gate = Scheduler::pool(2);
    let overlap = Arc::new(Overlap::default());

    for disposable in deliver_through(gate, 4, &overlap) {
        assert_eq!(disposable.join().await, Disposition::Completed);
    }

    assert!((1..=2).contains(&overlap.peak()), "peak was {}", overlap.peak());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn the_scheduler_nearest_the_subscriber_wins() {
    let gate = Scheduler::single();
    let overlap = Arc::new(Overlap::default());

    let disposables: Vec<_> = (0..4)
        .map(|_| {
            let overlap = Arc::clone(&overlap);
            Flow::range(0, 6)
                .run_on(Scheduler::pool(8))
                .run_on(gate.clone())
                .subscribe_each(move |signal| {
                    if signal.is_next() {
                        overlap.enter();
                        std::thread::sleep(Duration::from_millis(2));
                        overlap.exit();
                    }
                })
        })
        .collect();

    for disposable in disposables {
        assert_eq!(disposable.join().await, Disposition::Completed);
    }

    // The wide pool upstream does not loosen the serial gate at the consumer.
    assert_eq!(overlap.peak(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_worker_pool_admits_jobs_in_parallel() {
    let gate = Scheduler::pool(2);
    let barrier = Arc::new(std::sync::Barrier::new(2));

    // Each delivery parks until its partner arrives, so completion proves
    // two jobs really were in flight at once.
    let disposables: Vec<_> = (0..2)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            Flow::just(1).run_on(gate.clone()).subscribe_each(move |signal| {
                if signal.is_next() {
                    barrier.wait();
                }
            })
        })
        .collect();

    for disposable in disposables {
        let disposition = tokio::time::timeout(Duration::from_secs(5), disposable.join())
            .await
            .unwrap();
        assert_eq!(disposition, Disposition::Completed);
    }
}

#[tokio::test]
async fn a_full_queue_surfaces_as_an_error_signal() {
    let gate = Scheduler::pool_with_queue(1, 1);
    let (release, parked) = tokio::sync::watch::channel(false);
    let polled = Arc::new(AtomicUsize::new(0));

    // Two pipelines whose sources park until released: the first occupies
    // the only worker, the second the only queue slot.
    let mut held = Vec::new();
    for _ in 0..2 {
        let parked = parked.clone();
        let polled = Arc::clone(&polled);
        let flow = Flow::from_factory(move || {
            let mut parked = parked.clone();
            let polled = Arc::clone(&polled);
            stream::once(async move {
                polled.fetch_add(1, Ordering::SeqCst);
                while !*parked.borrow_and_update() {
                    if parked.changed().await.is_err() {
                        break;
                    }
                }
                Ok(1)
            })
        })
        .produce_on(gate.clone());
        held.push(tokio::spawn(flow.collect()));
    }

    for _ in 0..512 {
        if polled.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(polled.load(Ordering::SeqCst) > 0, "held sources were never polled");
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }

    let failure = Flow::just(9)
        .produce_on(gate)
        .collect()
        .await
        .unwrap_err();
    assert_eq!(failure.to_string(), "scheduler queue full (capacity 1)");

    release.send(true).unwrap();
    for handle in held {
        assert_eq!(handle.await.unwrap().unwrap(), vec![1]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn admission_gating_preserves_item_order() {
    let items = Flow::range(0, 100)
        .run_on(Scheduler::pool(4))
        .collect()
        .await
        .unwrap();

    assert_eq!(items, (0..100).collect::<Vec<i64>>());
}
