//! Prefix and suffix trimming, by count and by time window.

use crate::error::Failure;
use crate::flow::Flow;
use futures::stream::{BoxStream, StreamExt};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::time::{sleep, Instant, Sleep};

impl<T: Send + 'static> Flow<T> {
    /// Drop the first `count` items.
    pub fn skip(self, count: u64) -> Flow<T> {
        self.stage(move |upstream| SkipStage { upstream, remaining: count }.boxed())
    }

    /// Deliver at most `count` items, then complete and drop the upstream.
    /// `take(0)` completes without pulling the upstream at all.
    pub fn take(self, count: u64) -> Flow<T> {
        self.stage(move |upstream| {
            let upstream = (count > 0).then_some(upstream);
            TakeStage { upstream, remaining: count }.boxed()
        })
    }

    /// Drop items arriving within `window` of subscription.
    pub fn skip_duration(self, window: Duration) -> Flow<T> {
        self.stage(move |upstream| {
            SkipDurationStage { upstream, deadline: Instant::now() + window }.boxed()
        })
    }

    /// Complete when `window` elapses after subscription, dropping the
    /// upstream even mid-wait.
    pub fn take_duration(self, window: Duration) -> Flow<T> {
        self.stage(move |upstream| {
            TakeDurationStage { upstream: Some(upstream), timeout: Box::pin(sleep(window)) }
                .boxed()
        })
    }
}

struct SkipStage<T> {
    upstream: BoxStream<'static, Result<T, Failure>>,
    remaining: u64,
}

impl<T> Stream for SkipStage<T> {
    type Item = Result<T, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match ready!(this.upstream.poll_next_unpin(cx)) {
                Some(Ok(item)) => {
                    if this.remaining == 0 {
                        return Poll::Ready(Some(Ok(item)));
                    }
                    this.remaining -= 1;
                }
                Some(Err(failure)) => return Poll::Ready(Some(Err(failure))),
                None => return Poll::Ready(None),
            }
        }
    }
}

struct TakeStage<T> {
    upstream: Option<BoxStream<'static, Result<T, Failure>>>,
    remaining: u64,
}

impl<T> Stream for TakeStage<T> {
    type Item = Result<T, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(upstream) = this.upstream.as_mut() else {
            return Poll::Ready(None);
        };
        match ready!(upstream.poll_next_unpin(cx)) {
            Some(Ok(item)) => {
                this.remaining -= 1;
                if this.remaining == 0 {
                    // Done with the upstream; releasing it here is what
                    // stops an infinite source.
                    this.upstream = None;
                }
                Poll::Ready(Some(Ok(item)))
            }
            Some(Err(failure)) => {
                this.upstream = None;
                Poll::Ready(Some(Err(failure)))
            }
            None => {
                this.upstream = None;
                Poll::Ready(None)
            }
        }
    }
}

struct SkipDurationStage<T> {
    upstream: BoxStream<'static, Result<T, Failure>>,
    deadline: Instant,
}

impl<T> Stream for SkipDurationStage<T> {
    type Item = Result<T, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match ready!(this.upstream.poll_next_unpin(cx)) {
                Some(Ok(item)) => {
                    if Instant::now() >= this.deadline {
                        return Poll::Ready(Some(Ok(item)));
                    }
                }
                Some(Err(failure)) => return Poll::Ready(Some(Err(failure))),
                None => return Poll::Ready(None),
            }
        }
    }
}

struct TakeDurationStage<T> {
    upstream: Option<BoxStream<'static, Result<T, Failure>>>,
    timeout: Pin<Box<Sleep>>,
}

impl<T> Stream for TakeDurationStage<T> {
    type Item = Result<T, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(upstream) = this.upstream.as_mut() else {
            return Poll::Ready(None);
        };
        if this.timeout.as_mut().poll(cx).is_ready() {
            this.upstream = None;
            return Poll::Ready(None);
        }
        match ready!(upstream.poll_next_unpin(cx)) {
            Some(Ok(item)) => Poll::Ready(Some(Ok(item))),
            Some(Err(failure)) => {
                this.upstream = None;
                Poll::Ready(Some(Err(failure)))
            }
            None => {
                this.upstream = None;
                Poll::Ready(None)
            }
        }
    }
}
