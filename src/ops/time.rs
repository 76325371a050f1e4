//! Time-driven sources and pacing operators.
//!
//! Everything here waits through a [`Timer`](crate::timer::Timer) rather
//! than sleeping a thread, so a cancelled pipeline drops its pending wait
//! instead of stranding a worker. The plain constructors use the tokio
//! clock; the `_with` variants accept an injected timer.

use crate::error::Failure;
use crate::flow::Flow;
use crate::timer::{Timer, TokioTimer};
use futures::stream::{self, BoxStream, StreamExt};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::time::Instant;

impl Flow<u64> {
    /// Tick `0, 1, 2, ...` forever, one tick per `period`. The first tick
    /// arrives one full period after subscription.
    ///
    /// The sequence never completes on its own; bound it with
    /// [`take`](Flow::take) or [`take_duration`](Flow::take_duration).
    pub fn interval(period: Duration) -> Flow<u64> {
        Self::interval_with(period, Arc::new(TokioTimer))
    }

    /// [`interval`](Flow::interval) paced by the given timer.
    pub fn interval_with(period: Duration, timer: Arc<dyn Timer>) -> Flow<u64> {
        Flow::cold(move || {
            let timer = Arc::clone(&timer);
            stream::unfold(0u64, move |tick| {
                let wait = timer.delay(period);
                async move {
                    wait.await;
                    Some((Ok(tick), tick + 1))
                }
            })
            .boxed()
        })
    }
}

impl<T: Send + 'static> Flow<T> {
    /// Hold off subscribing to the upstream until `delay` has elapsed.
    /// The upstream stays cold in the meantime: its production starts only
    /// after the wait.
    pub fn delay_subscription(self, delay: Duration) -> Flow<T> {
        self.delay_subscription_with(delay, Arc::new(TokioTimer))
    }

    /// [`delay_subscription`](Flow::delay_subscription) waited through the
    /// given timer.
    pub fn delay_subscription_with(self, delay: Duration, timer: Arc<dyn Timer>) -> Flow<T> {
        let Flow { source, ctx, demand_prepaid } = self;
        Flow::from_parts(
            Arc::new(move |subscription: &crate::subscription::Subscription| {
                let source = Arc::clone(&source);
                let subscription = subscription.clone();
                let wait = timer.delay(delay);
                stream::once(async move {
                    wait.await;
                    (source)(&subscription)
                })
                .flatten()
                .boxed()
            }),
            ctx,
            demand_prepaid,
        )
    }

    /// Pace the sequence: each item is emitted one `period` after the
    /// previous one (and the first one `period` after subscription).
    /// Terminal signals pass through unpaced.
    pub fn delay_items(self, period: Duration) -> Flow<T> {
        self.delay_items_with(period, Arc::new(TokioTimer))
    }

    /// [`delay_items`](Flow::delay_items) waited through the given timer.
    pub fn delay_items_with(self, period: Duration, timer: Arc<dyn Timer>) -> Flow<T> {
        self.stage(move |upstream| {
            let timer = Arc::clone(&timer);
            upstream
                .then(move |signal| {
                    let wait = signal.is_ok().then(|| timer.delay(period));
                    async move {
                        if let Some(wait) = wait {
                            wait.await;
                        }
                        signal
                    }
                })
                .boxed()
        })
    }

    /// Pair every item with the time since the previous emission, or since
    /// subscription for the first item. Measured on the tokio clock, so a
    /// paused-clock test observes exact durations.
    pub fn elapsed(self) -> Flow<(Duration, T)> {
        self.stage(|upstream| ElapsedStage { upstream, last: Instant::now() }.boxed())
    }
}

struct ElapsedStage<T> {
    upstream: BoxStream<'static, Result<T, Failure>>,
    last: Instant,
}

impl<T> Stream for ElapsedStage<T> {
    type Item = Result<(Duration, T), Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Poll::Ready(match ready!(this.upstream.poll_next_unpin(cx)) {
            Some(Ok(item)) => {
                let now = Instant::now();
                let gap = now.saturating_duration_since(this.last);
                this.last = now;
                Some(Ok((gap, item)))
            }
            Some(Err(failure)) => Some(Err(failure)),
            None => None,
        })
    }
}
