//! Cold, demand-driven pipelines of zero or more items.
//!
//! A [`Flow`] describes a sequence: a factory that is invoked once per
//! subscriber, so every subscription observes the sequence from the start
//! and side effects re-run per subscription. Nothing is produced until
//! [`subscribe`](Flow::subscribe) (or a collector such as
//! [`collect`](Flow::collect)) attaches a consumer.
//!
//! Delivery follows the signal protocol: `on_subscribe` once, then zero or
//! more `on_next` items, then at most one terminal (`on_error` or
//! `on_complete`), and nothing after a terminal or after cancellation. An
//! item is only delivered after one unit of demand has been claimed from
//! the consumer's [`Subscription`]; terminals need no demand.
//!
//! ```rust
//! use millstream::Flow;
//!
//! #[tokio::main]
//! async fn main() {
//!     let flow = Flow::from_iter([1, 2, 3]).map(|n| n * 10);
//!     assert_eq!(flow.collect().await.unwrap(), vec![10, 20, 30]);
//! }
//! ```

use crate::error::Failure;
use crate::hooks;
use crate::scheduler::Scheduler;
use crate::signal::{Disposition, Signal};
use crate::subscription::{Disposable, Subscription};
use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Items buffered between schedulers by [`Flow::run_on`] and
/// [`Flow::produce_on`] before the producer side is made to wait.
const PREFETCH: usize = 32;

/// Per-subscriber stream factory. The subscription is the one handed to the
/// subscriber, so push-style sources can watch its demand and cancellation.
pub(crate) type SourceFn<T> =
    dyn Fn(&Subscription) -> BoxStream<'static, Result<T, Failure>> + Send + Sync;

/// Consumer of a [`Flow`].
///
/// `on_subscribe` runs first and receives the [`Subscription`] used to
/// request items and cancel; the default implementation requests unbounded
/// demand, so only backpressure-aware consumers need to override it. After
/// that, `on_next` runs once per item and exactly one of `on_error` or
/// `on_complete` ends the sequence, unless it is cancelled first.
///
/// The default `on_error` forwards the failure to the process-wide
/// dropped-error hook. See [`crate::hooks`].
pub trait Subscriber<T>: Send + 'static {
    fn on_subscribe(&mut self, subscription: &Subscription) {
        subscription.request_unbounded();
    }

    fn on_next(&mut self, item: T);

    fn on_error(&mut self, failure: Failure) {
        hooks::dropped_error(&failure);
    }

    fn on_complete(&mut self) {}
}

/// A cold, composable sequence of items ending in completion or a failure.
///
/// Cloning a `Flow` clones the description, not a running sequence; each
/// clone still produces independently per subscriber.
pub struct Flow<T> {
    pub(crate) source: Arc<SourceFn<T>>,
    pub(crate) ctx: Scheduler,
    /// True when demand is claimed at the producer side (push-style
    /// sources); the delivery loop then skips its own claim.
    pub(crate) demand_prepaid: bool,
}

impl<T> Clone for Flow<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            ctx: self.ctx.clone(),
            demand_prepaid: self.demand_prepaid,
        }
    }
}

impl<T> std::fmt::Debug for Flow<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("scheduler", &self.ctx.name())
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Flow<T> {
    pub(crate) fn from_parts(
        source: Arc<SourceFn<T>>,
        ctx: Scheduler,
        demand_prepaid: bool,
    ) -> Self {
        Self { source, ctx, demand_prepaid }
    }

    /// Wrap a factory that ignores the subscription, which is every cold
    /// source.
    pub(crate) fn cold<F>(factory: F) -> Self
    where
        F: Fn() -> BoxStream<'static, Result<T, Failure>> + Send + Sync + 'static,
    {
        Self::from_parts(
            Arc::new(move |_: &Subscription| factory()),
            Scheduler::default(),
            false,
        )
    }

    /// Build a flow from a stream factory. The factory runs once per
    /// subscriber, which is what makes the flow cold.
    pub fn from_factory<S, F>(factory: F) -> Self
    where
        S: Stream<Item = Result<T, Failure>> + Send + 'static,
        F: Fn() -> S + Send + Sync + 'static,
    {
        Self::cold(move || factory().boxed())
    }

    /// A flow of exactly one item.
    pub fn just(item: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::cold(move || {
            let item = item.clone();
            stream::once(future::ready(Ok(item))).boxed()
        })
    }

    /// A flow over the items of `iter`, replayed from the start for every
    /// subscriber.
    pub fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Clone + Sync,
    {
        let items: Arc<[T]> = iter.into_iter().collect();
        Self::cold(move || {
            let items = Arc::clone(&items);
            let len = items.len();
            stream::iter((0..len).map(move |i| Ok(items[i].clone()))).boxed()
        })
    }

    /// A flow that completes without items.
    pub fn empty() -> Self {
        Self::cold(|| stream::empty().boxed())
    }

    /// A flow that fails immediately.
    pub fn error(failure: Failure) -> Self {
        Self::cold(move || stream::once(future::ready(Err(failure.clone()))).boxed())
    }

    /// Defer building the flow until subscribe time. Each subscriber gets
    /// the flow the factory returns for it.
    pub fn defer<F>(factory: F) -> Self
    where
        F: Fn() -> Flow<T> + Send + Sync + 'static,
    {
        Self::from_parts(
            Arc::new(move |subscription: &Subscription| (factory().source)(subscription)),
            Scheduler::default(),
            false,
        )
    }

    /// A flow driven by a step function. Each pull invokes `step` with an
    /// [`Outlet`], which must emit exactly one signal: an item, an error,
    /// or completion. Emitting none or more than one fails the sequence.
    ///
    /// The step runs synchronously during the pull, so it must be quick.
    /// State captured by the closure is shared across subscriptions, which
    /// lets re-subscribing policies such as [`retry`](Flow::retry) resume
    /// from where the last attempt stopped.
    pub fn generate<F>(step: F) -> Self
    where
        F: Fn(&mut Outlet<T>) + Send + Sync + 'static,
    {
        let step = Arc::new(step);
        Self::cold(move || {
            let step = Arc::clone(&step);
            let mut done = false;
            stream::iter(std::iter::from_fn(move || {
                if done {
                    return None;
                }
                let mut outlet = Outlet::new();
                (step)(&mut outlet);
                match outlet.into_signal() {
                    Ok(Signal::Next(item)) => Some(Ok(item)),
                    Ok(Signal::Complete) => {
                        done = true;
                        None
                    }
                    Ok(Signal::Error(failure)) | Err(failure) => {
                        done = true;
                        Some(Err(failure))
                    }
                }
            }))
            .boxed()
        })
    }

    /// Scheduler that delivery callbacks currently run on.
    pub fn scheduler(&self) -> &Scheduler {
        &self.ctx
    }

    /// Move everything downstream of this point onto `scheduler`: a
    /// hand-off buffer decouples the upstream producer from consumers, and
    /// delivery callbacks run under the new scheduler's admission gate.
    ///
    /// The scheduler nearest the subscriber wins, so the last `run_on` in a
    /// chain decides where `on_next` and the terminal callbacks run.
    pub fn run_on(self, scheduler: Scheduler) -> Self {
        let Flow { source, ctx, demand_prepaid } = self;
        Self::from_parts(
            Arc::new(move |subscription: &Subscription| {
                pump((source)(subscription), ctx.clone())
            }),
            scheduler,
            demand_prepaid,
        )
    }

    /// Run upstream production under `scheduler` without moving delivery.
    /// Each upstream pull counts as one job against the scheduler's gate,
    /// and a hand-off buffer decouples it from the consumer side.
    pub fn produce_on(self, scheduler: Scheduler) -> Self {
        let Flow { source, ctx, demand_prepaid } = self;
        Self::from_parts(
            Arc::new(move |subscription: &Subscription| {
                pump((source)(subscription), scheduler.clone())
            }),
            ctx,
            demand_prepaid,
        )
    }

    /// Wrap this flow's per-subscriber stream in another stream transform,
    /// keeping scheduler and demand accounting untouched. Every operator
    /// stage is built through here.
    pub(crate) fn stage<U, F>(self, build: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(BoxStream<'static, Result<T, Failure>>) -> BoxStream<'static, Result<U, Failure>>
            + Send
            + Sync
            + 'static,
    {
        let Flow { source, ctx, demand_prepaid } = self;
        Flow::from_parts(
            Arc::new(move |subscription: &Subscription| build((source)(subscription))),
            ctx,
            demand_prepaid,
        )
    }

    /// Attach a subscriber and start the sequence on a background task.
    ///
    /// The returned [`Disposable`] cancels the sequence on
    /// [`dispose`](Disposable::dispose); merely dropping it does not.
    pub fn subscribe<S>(self, subscriber: S) -> Disposable
    where
        S: Subscriber<T>,
    {
        let Flow { source, ctx, demand_prepaid } = self;
        let subscription = Subscription::new();
        let task_sub = subscription.clone();
        let driver = tokio::spawn(async move {
            let mut subscriber = subscriber;
            let mut stream = (source)(&task_sub);
            subscriber.on_subscribe(&task_sub);
            loop {
                // Pull before claiming demand so terminals can arrive while
                // the consumer still owes no requests.
                let next = tokio::select! {
                    biased;
                    _ = task_sub.cancelled_wait() => return Disposition::Cancelled,
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(item)) => {
                        if demand_prepaid {
                            if task_sub.is_cancelled() {
                                return Disposition::Cancelled;
                            }
                        } else if !task_sub.await_demand().await {
                            return Disposition::Cancelled;
                        }
                        if let Err(full) = ctx.run(async { subscriber.on_next(item) }).await {
                            subscriber.on_error(Failure::operator(full));
                            return Disposition::Errored;
                        }
                    }
                    Some(Err(failure)) => {
                        let delivered =
                            ctx.run(async { subscriber.on_error(failure.clone()) }).await;
                        if delivered.is_err() {
                            // The gate refused the job; deliver inline
                            // rather than lose the terminal.
                            subscriber.on_error(failure);
                        }
                        return Disposition::Errored;
                    }
                    None => {
                        if ctx.run(async { subscriber.on_complete() }).await.is_err() {
                            subscriber.on_complete();
                        }
                        return Disposition::Completed;
                    }
                }
            }
        });
        Disposable::new(subscription, driver)
    }

    /// Subscribe with a single closure that receives every [`Signal`],
    /// with unbounded demand.
    pub fn subscribe_each<F>(self, each: F) -> Disposable
    where
        F: FnMut(Signal<T>) + Send + 'static,
    {
        struct Each<F>(F);
        impl<T, F> Subscriber<T> for Each<F>
        where
            T: Send + 'static,
            F: FnMut(Signal<T>) + Send + 'static,
        {
            fn on_next(&mut self, item: T) {
                (self.0)(Signal::Next(item));
            }
            fn on_error(&mut self, failure: Failure) {
                (self.0)(Signal::Error(failure));
            }
            fn on_complete(&mut self) {
                (self.0)(Signal::Complete);
            }
        }
        self.subscribe(Each(each))
    }

    /// Drive the whole flow and gather its items.
    pub async fn collect(self) -> Result<Vec<T>, Failure> {
        struct Collector<T> {
            items: Vec<T>,
            done: Option<tokio::sync::oneshot::Sender<Result<Vec<T>, Failure>>>,
        }
        impl<T: Send + 'static> Subscriber<T> for Collector<T> {
            fn on_next(&mut self, item: T) {
                self.items.push(item);
            }
            fn on_error(&mut self, failure: Failure) {
                if let Some(done) = self.done.take() {
                    let _ = done.send(Err(failure));
                }
            }
            fn on_complete(&mut self) {
                if let Some(done) = self.done.take() {
                    let _ = done.send(Ok(std::mem::take(&mut self.items)));
                }
            }
        }

        let (done, outcome) = tokio::sync::oneshot::channel();
        let disposable = self.subscribe(Collector { items: Vec::new(), done: Some(done) });
        match outcome.await {
            Ok(result) => result,
            Err(_) => {
                // No terminal was sent: the driver died. Join to surface a
                // panic from a consumer callback.
                disposable.join().await;
                Err(Failure::msg("pipeline ended without a terminal signal"))
            }
        }
    }

    /// Escape hatch: the raw per-subscriber stream with unbounded demand
    /// and no scheduler involvement, for bridging into stream combinators.
    pub fn into_stream(self) -> BoxStream<'static, Result<T, Failure>> {
        open(&self.source)
    }
}

impl Flow<i64> {
    /// Integers `start, start+1, ...` with `count` items.
    pub fn range(start: i64, count: u32) -> Self {
        Self::cold(move || {
            stream::iter((0..i64::from(count)).map(move |i| Ok(start.saturating_add(i)))).boxed()
        })
    }
}

/// Open a source with a fresh unbounded subscription. Operator stages pull
/// inner flows through here; demand is accounted once, at the outermost
/// subscriber.
pub(crate) fn open<T>(source: &Arc<SourceFn<T>>) -> BoxStream<'static, Result<T, Failure>> {
    let subscription = Subscription::new();
    subscription.request_unbounded();
    (source)(&subscription)
}

/// Move items across an admission gate: a background task pulls the
/// upstream, one gated job per pull, and a bounded channel hands items to
/// the consumer side. The channel going away (subscriber cancelled) stops
/// the task.
fn pump<T: Send + 'static>(
    mut upstream: BoxStream<'static, Result<T, Failure>>,
    gate: Scheduler,
) -> BoxStream<'static, Result<T, Failure>> {
    let (tx, rx) = mpsc::channel::<Result<T, Failure>>(PREFETCH);
    tokio::spawn(async move {
        loop {
            let pulled = match gate.run(async { upstream.next().await }).await {
                Ok(pulled) => pulled,
                Err(full) => {
                    let _ = tx.send(Err(Failure::operator(full))).await;
                    return;
                }
            };
            match pulled {
                Some(signal) => {
                    let terminal_error = signal.is_err();
                    if tx.send(signal).await.is_err() || terminal_error {
                        return;
                    }
                }
                None => return,
            }
        }
    });
    Box::pin(RecvStream { rx })
}

struct RecvStream<T> {
    rx: mpsc::Receiver<Result<T, Failure>>,
}

impl<T> Stream for RecvStream<T> {
    type Item = Result<T, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// One-shot sink handed to each [`Flow::generate`] step.
#[derive(Debug)]
pub struct Outlet<T> {
    slot: Option<Signal<T>>,
    overflowed: bool,
}

impl<T> Outlet<T> {
    fn new() -> Self {
        Self { slot: None, overflowed: false }
    }

    /// Emit one item.
    pub fn next(&mut self, item: T) {
        self.put(Signal::Next(item));
    }

    /// Fail the sequence.
    pub fn error(&mut self, failure: Failure) {
        self.put(Signal::Error(failure));
    }

    /// End the sequence.
    pub fn complete(&mut self) {
        self.put(Signal::Complete);
    }

    fn put(&mut self, signal: Signal<T>) {
        if self.slot.is_some() {
            self.overflowed = true;
        } else {
            self.slot = Some(signal);
        }
    }

    fn into_signal(self) -> Result<Signal<T>, Failure> {
        if self.overflowed {
            return Err(Failure::msg("generate step emitted more than one signal"));
        }
        self.slot
            .ok_or_else(|| Failure::msg("generate step emitted no signal"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[tokio::test]
    async fn just_delivers_one_item() {
        assert_eq!(Flow::just(7).collect().await.unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn from_iter_replays_for_every_subscriber() {
        let flow = Flow::from_iter(vec!["a", "b", "c"]);
        assert_eq!(flow.clone().collect().await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(flow.collect().await.unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn empty_completes_without_items() {
        let items = Flow::<i32>::empty().collect().await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn error_flow_fails_immediately() {
        let err = Flow::<i32>::error(Failure::msg("boom")).collect().await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn defer_builds_per_subscriber() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let flow = Flow::defer(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Flow::just(1)
        });

        assert_eq!(builds.load(Ordering::SeqCst), 0);
        flow.clone().collect().await.unwrap();
        flow.collect().await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn generate_runs_until_complete() {
        let counter = Arc::new(AtomicUsize::new(0));
        let state = Arc::clone(&counter);
        let flow = Flow::generate(move |outlet| {
            let i = state.fetch_add(1, Ordering::SeqCst);
            if i < 3 {
                outlet.next(i);
            } else {
                outlet.complete();
            }
        });
        assert_eq!(flow.collect().await.unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn generate_step_must_emit_exactly_one_signal() {
        let silent = Flow::<i32>::generate(|_| {});
        let err = silent.collect().await.unwrap_err();
        assert!(err.to_string().contains("no signal"));

        let chatty = Flow::generate(|outlet| {
            outlet.next(1);
            outlet.next(2);
        });
        let err = chatty.collect().await.unwrap_err();
        assert!(err.to_string().contains("more than one signal"));
    }

    #[tokio::test]
    async fn range_counts_from_start() {
        assert_eq!(Flow::range(1, 6).collect().await.unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn subscribe_each_sees_items_then_complete() {
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let disposable = Flow::from_iter([1, 2]).subscribe_each(move |signal| {
            let entry = match signal {
                Signal::Next(n) => format!("next {n}"),
                Signal::Error(failure) => format!("error {failure}"),
                Signal::Complete => "complete".to_string(),
            };
            sink.lock().unwrap().push(entry);
        });

        assert_eq!(disposable.join().await, Disposition::Completed);
        assert_eq!(*log.lock().unwrap(), vec!["next 1", "next 2", "complete"]);
    }

    #[tokio::test]
    async fn collect_surfaces_mid_stream_failure() {
        let flow = Flow::from_factory(|| {
            stream::iter(vec![Ok(1), Ok(2), Err(Failure::msg("cut short"))])
        });
        let err = flow.collect().await.unwrap_err();
        assert_eq!(err.to_string(), "cut short");
    }

    #[tokio::test]
    async fn dispose_before_demand_cancels() {
        struct NoDemand;
        impl Subscriber<i64> for NoDemand {
            fn on_subscribe(&mut self, _subscription: &Subscription) {}
            fn on_next(&mut self, _item: i64) {
                panic!("received an item without demand");
            }
        }

        let disposable = Flow::range(0, 100).subscribe(NoDemand);
        disposable.dispose();
        assert_eq!(disposable.join().await, Disposition::Cancelled);
    }

    #[tokio::test]
    async fn run_on_preserves_items_and_rebinds_scheduler() {
        let flow = Flow::from_iter([1, 2, 3]).run_on(Scheduler::single());
        assert_eq!(flow.scheduler().name(), "single");
        assert_eq!(flow.collect().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn produce_on_leaves_delivery_scheduler_alone() {
        let flow = Flow::from_iter([1, 2, 3]).produce_on(Scheduler::pool(2));
        assert_eq!(flow.scheduler().name(), "immediate");
        assert_eq!(flow.collect().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn into_stream_yields_raw_results() {
        let mut stream = Flow::from_iter([5, 6]).into_stream();
        assert_eq!(stream.next().await.unwrap().unwrap(), 5);
        assert_eq!(stream.next().await.unwrap().unwrap(), 6);
        assert!(stream.next().await.is_none());
    }
}
