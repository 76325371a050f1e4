//! Error recovery, side-effect taps, and resource-scoped flows.

use crate::error::Failure;
use crate::flow::Flow;
use crate::signal::Disposition;
use futures::stream::{BoxStream, StreamExt};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

impl<T: Send + 'static> Flow<T> {
    /// Replace a failure with one final item, then complete.
    pub fn on_error_return(self, fallback: T) -> Flow<T>
    where
        T: Clone + Sync,
    {
        self.stage(move |upstream| {
            OnErrorReturnStage { upstream: Some(upstream), fallback: Some(fallback.clone()) }
                .boxed()
        })
    }

    /// Switch to a fallback flow built from the failure.
    pub fn on_error_resume<F>(self, fallback_of: F) -> Flow<T>
    where
        F: Fn(&Failure) -> Flow<T> + Send + Sync + 'static,
    {
        let fallback_of: Arc<dyn Fn(&Failure) -> Flow<T> + Send + Sync> = Arc::new(fallback_of);
        self.stage(move |upstream| {
            OnErrorResumeStage {
                upstream: Some(upstream),
                fallback_of: Arc::clone(&fallback_of),
                current: None,
            }
            .boxed()
        })
    }

    /// Rewrite the failure while still terminating the sequence with it.
    pub fn on_error_map<F>(self, rewrite: F) -> Flow<T>
    where
        F: Fn(Failure) -> Failure + Send + Sync + 'static,
    {
        let rewrite: Arc<dyn Fn(Failure) -> Failure + Send + Sync> = Arc::new(rewrite);
        self.stage(move |upstream| {
            OnErrorMapStage { upstream, rewrite: Arc::clone(&rewrite) }.boxed()
        })
    }

    /// Observe every item without changing it.
    pub fn do_on_next<F>(self, observe: F) -> Flow<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let observe: Arc<dyn Fn(&T) + Send + Sync> = Arc::new(observe);
        self.stage(move |upstream| {
            TapStage {
                upstream,
                on_item: Some(Arc::clone(&observe)),
                on_failure: None,
                on_completion: None,
            }
            .boxed()
        })
    }

    /// Observe a failure as it passes through.
    pub fn do_on_error<F>(self, observe: F) -> Flow<T>
    where
        F: Fn(&Failure) + Send + Sync + 'static,
    {
        let observe: Arc<dyn Fn(&Failure) + Send + Sync> = Arc::new(observe);
        self.stage(move |upstream| {
            TapStage {
                upstream,
                on_item: None,
                on_failure: Some(Arc::clone(&observe)),
                on_completion: None,
            }
            .boxed()
        })
    }

    /// Observe normal completion.
    pub fn do_on_complete<F>(self, observe: F) -> Flow<T>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let observe: Arc<dyn Fn() + Send + Sync> = Arc::new(observe);
        self.stage(move |upstream| {
            TapStage {
                upstream,
                on_item: None,
                on_failure: None,
                on_completion: Some(Arc::clone(&observe)),
            }
            .boxed()
        })
    }

    /// Run `finish` exactly once when the sequence ends, with the
    /// [`Disposition`] that ended it. Cancellation is observed when the
    /// stage is dropped without having seen a terminal.
    pub fn do_finally<F>(self, finish: F) -> Flow<T>
    where
        F: Fn(Disposition) + Send + Sync + 'static,
    {
        let finish: Arc<dyn Fn(Disposition) + Send + Sync> = Arc::new(finish);
        self.stage(move |upstream| {
            FinallyStage { upstream, finish: Some(Arc::clone(&finish)) }.boxed()
        })
    }

    /// Scope a resource to one subscription: `acquire` runs at subscribe,
    /// the flow is built over the resource, and `release` runs when the
    /// sequence terminates or is cancelled.
    pub fn using<R, A, B, C>(acquire: A, flow_of: B, release: C) -> Flow<T>
    where
        R: Send + 'static,
        A: Fn() -> R + Send + Sync + 'static,
        B: Fn(&R) -> Flow<T> + Send + Sync + 'static,
        C: Fn(R) + Send + Sync + 'static,
    {
        let release: Arc<dyn Fn(R) + Send + Sync> = Arc::new(release);
        Flow::cold(move || {
            let resource = acquire();
            let inner = flow_of(&resource).into_stream();
            UsingStage { inner, guard: Some((resource, Arc::clone(&release))) }.boxed()
        })
    }

    /// Log every signal at debug level under `label`.
    pub fn log(self, label: impl Into<Arc<str>>) -> Flow<T>
    where
        T: std::fmt::Debug,
    {
        let label: Arc<str> = label.into();
        self.stage(move |upstream| LogStage { upstream, label: Arc::clone(&label) }.boxed())
    }
}

struct OnErrorReturnStage<T> {
    upstream: Option<BoxStream<'static, Result<T, Failure>>>,
    fallback: Option<T>,
}

// The fallback slot is a plain value accessed through &mut; nothing is
// pinned inside.
impl<T> Unpin for OnErrorReturnStage<T> {}

impl<T> Stream for OnErrorReturnStage<T> {
    type Item = Result<T, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(upstream) = this.upstream.as_mut() else {
            return Poll::Ready(None);
        };
        match ready!(upstream.poll_next_unpin(cx)) {
            Some(Ok(item)) => Poll::Ready(Some(Ok(item))),
            Some(Err(_)) => {
                this.upstream = None;
                match this.fallback.take() {
                    Some(item) => Poll::Ready(Some(Ok(item))),
                    None => Poll::Ready(None),
                }
            }
            None => {
                this.upstream = None;
                Poll::Ready(None)
            }
        }
    }
}

struct OnErrorResumeStage<T> {
    upstream: Option<BoxStream<'static, Result<T, Failure>>>,
    fallback_of: Arc<dyn Fn(&Failure) -> Flow<T> + Send + Sync>,
    current: Option<BoxStream<'static, Result<T, Failure>>>,
}

impl<T: Send + 'static> Stream for OnErrorResumeStage<T> {
    type Item = Result<T, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(current) = this.current.as_mut() {
                return current.poll_next_unpin(cx);
            }
            let Some(upstream) = this.upstream.as_mut() else {
                return Poll::Ready(None);
            };
            match ready!(upstream.poll_next_unpin(cx)) {
                Some(Ok(item)) => return Poll::Ready(Some(Ok(item))),
                Some(Err(failure)) => {
                    this.upstream = None;
                    this.current = Some((this.fallback_of)(&failure).into_stream());
                }
                None => {
                    this.upstream = None;
                    return Poll::Ready(None);
                }
            }
        }
    }
}

struct OnErrorMapStage<T> {
    upstream: BoxStream<'static, Result<T, Failure>>,
    rewrite: Arc<dyn Fn(Failure) -> Failure + Send + Sync>,
}

impl<T> Stream for OnErrorMapStage<T> {
    type Item = Result<T, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Poll::Ready(match ready!(this.upstream.poll_next_unpin(cx)) {
            Some(Ok(item)) => Some(Ok(item)),
            Some(Err(failure)) => Some(Err((this.rewrite)(failure))),
            None => None,
        })
    }
}

struct TapStage<T> {
    upstream: BoxStream<'static, Result<T, Failure>>,
    on_item: Option<Arc<dyn Fn(&T) + Send + Sync>>,
    on_failure: Option<Arc<dyn Fn(&Failure) + Send + Sync>>,
    on_completion: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl<T> Stream for TapStage<T> {
    type Item = Result<T, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Poll::Ready(match ready!(this.upstream.poll_next_unpin(cx)) {
            Some(Ok(item)) => {
                if let Some(observe) = &this.on_item {
                    observe(&item);
                }
                Some(Ok(item))
            }
            Some(Err(failure)) => {
                if let Some(observe) = &this.on_failure {
                    observe(&failure);
                }
                Some(Err(failure))
            }
            None => {
                if let Some(observe) = this.on_completion.take() {
                    observe();
                }
                None
            }
        })
    }
}

struct FinallyStage<T> {
    upstream: BoxStream<'static, Result<T, Failure>>,
    finish: Option<Arc<dyn Fn(Disposition) + Send + Sync>>,
}

impl<T> FinallyStage<T> {
    fn fire(&mut self, disposition: Disposition) {
        if let Some(finish) = self.finish.take() {
            finish(disposition);
        }
    }
}

impl<T> Stream for FinallyStage<T> {
    type Item = Result<T, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match ready!(this.upstream.poll_next_unpin(cx)) {
            Some(Ok(item)) => Poll::Ready(Some(Ok(item))),
            Some(Err(failure)) => {
                this.fire(Disposition::Errored);
                Poll::Ready(Some(Err(failure)))
            }
            None => {
                this.fire(Disposition::Completed);
                Poll::Ready(None)
            }
        }
    }
}

impl<T> Drop for FinallyStage<T> {
    fn drop(&mut self) {
        // Dropped without a terminal means the subscription was cancelled.
        self.fire(Disposition::Cancelled);
    }
}

struct UsingStage<T, R> {
    inner: BoxStream<'static, Result<T, Failure>>,
    guard: Option<(R, Arc<dyn Fn(R) + Send + Sync>)>,
}

// The guarded resource is a plain value accessed through &mut; nothing is
// pinned inside.
impl<T, R> Unpin for UsingStage<T, R> {}

impl<T, R> UsingStage<T, R> {
    fn release_now(&mut self) {
        if let Some((resource, release)) = self.guard.take() {
            release(resource);
        }
    }
}

impl<T, R> Stream for UsingStage<T, R> {
    type Item = Result<T, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match ready!(this.inner.poll_next_unpin(cx)) {
            Some(Ok(item)) => Poll::Ready(Some(Ok(item))),
            Some(Err(failure)) => {
                this.release_now();
                Poll::Ready(Some(Err(failure)))
            }
            None => {
                this.release_now();
                Poll::Ready(None)
            }
        }
    }
}

impl<T, R> Drop for UsingStage<T, R> {
    fn drop(&mut self) {
        self.release_now();
    }
}

struct LogStage<T> {
    upstream: BoxStream<'static, Result<T, Failure>>,
    label: Arc<str>,
}

impl<T: std::fmt::Debug> Stream for LogStage<T> {
    type Item = Result<T, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Poll::Ready(match ready!(this.upstream.poll_next_unpin(cx)) {
            Some(Ok(item)) => {
                tracing::debug!(flow = %this.label, item = ?item, "Next");
                Some(Ok(item))
            }
            Some(Err(failure)) => {
                tracing::debug!(flow = %this.label, %failure, "Error");
                Some(Err(failure))
            }
            None => {
                tracing::debug!(flow = %this.label, "Complete");
                None
            }
        })
    }
}
