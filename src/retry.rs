//! Retry policies over cold re-subscription.
//!
//! Retrying a [`Flow`] means re-subscribing to it: the cold source restarts
//! from its initial state and every operator between the source and the
//! retry point is rebuilt, so no accumulated operator state leaks across
//! attempts.
//!
//! Semantics:
//! - On an error signal the policy receives a [`RetrySignal`] whose counters
//!   reflect retries *already performed*; the first failure is seen with
//!   both counters at zero. [`Retry::max(n)`](Retry::max) therefore gives a
//!   permanently failing source exactly `n + 1` subscription attempts.
//! - [`Retry::max_in_a_row`](Retry::max_in_a_row) counts only consecutive
//!   errors. Any delivered item resets the consecutive counter, so unlimited
//!   total errors are tolerated as long as no run exceeds the limit.
//! - An optional [`Backoff`] (plus [`Jitter`]) spaces attempts, waited
//!   through a [`Timer`] so tests can observe delays without sleeping. The
//!   backoff index is the consecutive-failure count, meaning a success
//!   resets the escalation as well as the counter.
//!
//! Invariants:
//! - Protocol violations are programming errors and are never retried,
//!   whatever the policy says.
//! - A policy that answers "stop" propagates the original failure, not a
//!   wrapper.
//!
//! Example
//! ```rust
//! use millstream::{Failure, Flow, Retry};
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let calls = Arc::new(AtomicU32::new(0));
//! let counter = Arc::clone(&calls);
//! let flaky = Flow::defer(move || {
//!     if counter.fetch_add(1, Ordering::SeqCst) < 2 {
//!         Flow::error(Failure::msg("transient"))
//!     } else {
//!         Flow::just("ready")
//!     }
//! });
//!
//! let items = flaky.retry(Retry::max(3)).collect().await.unwrap();
//! assert_eq!(items, vec!["ready"]);
//! assert_eq!(calls.load(Ordering::SeqCst), 3);
//! # });
//! ```

use crate::backoff::Backoff;
use crate::error::Failure;
use crate::flow::{Flow, SourceFn};
use crate::jitter::Jitter;
use crate::subscription::Subscription;
use crate::timer::{Timer, TokioTimer};
use futures::stream::{BoxStream, StreamExt};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

/// Per-attempt record handed to a retry policy on each error signal.
///
/// Counters are retries already performed when the failure arrived, so the
/// first failure of a subscription is always seen as `{0, 0}`.
#[derive(Debug, Clone)]
pub struct RetrySignal {
    /// Retries performed since the outer subscription began.
    pub total_retries: u64,
    /// Retries performed since the last delivered item.
    pub total_retries_in_a_row: u64,
    /// The failure under consideration.
    pub failure: Failure,
}

#[derive(Clone)]
enum Limit {
    Never,
    Max(u64),
    MaxInARow(u64),
    Custom(Arc<dyn Fn(&RetrySignal) -> bool + Send + Sync>),
}

impl std::fmt::Debug for Limit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Limit::Never => f.write_str("Never"),
            Limit::Max(n) => f.debug_tuple("Max").field(n).finish(),
            Limit::MaxInARow(k) => f.debug_tuple("MaxInARow").field(k).finish(),
            Limit::Custom(_) => f.write_str("Custom(<predicate>)"),
        }
    }
}

/// Retry policy combining a limit, backoff, jitter, and timer.
#[derive(Clone)]
pub struct Retry {
    limit: Limit,
    backoff: Option<Backoff>,
    jitter: Jitter,
    timer: Arc<dyn Timer>,
}

impl std::fmt::Debug for Retry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retry")
            .field("limit", &self.limit)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl Retry {
    fn new(limit: Limit) -> Self {
        Self { limit, backoff: None, jitter: Jitter::None, timer: Arc::new(TokioTimer) }
    }

    /// Retry at most `retries` times in total. A permanently failing source
    /// is attempted exactly `retries + 1` times.
    pub fn max(retries: u64) -> Self {
        Self::new(Limit::Max(retries))
    }

    /// Retry at most `retries` *consecutive* times. A delivered item resets
    /// the run, so the total across a subscription is unbounded for sources
    /// whose failures interleave with successes.
    pub fn max_in_a_row(retries: u64) -> Self {
        Self::new(Limit::MaxInARow(retries))
    }

    /// Never retry; every failure propagates immediately.
    pub fn never() -> Self {
        Self::new(Limit::Never)
    }

    /// Retry while the predicate answers `true` for the [`RetrySignal`].
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&RetrySignal) -> bool + Send + Sync + 'static,
    {
        Self::new(Limit::Custom(Arc::new(predicate)))
    }

    /// Space attempts with the given backoff. Without one, re-subscription
    /// is immediate.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Randomize each backoff delay.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Wait through the given timer instead of the tokio clock.
    pub fn with_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = timer;
        self
    }

    fn should_retry(&self, signal: &RetrySignal) -> bool {
        match &self.limit {
            Limit::Never => false,
            Limit::Max(n) => signal.total_retries < *n,
            Limit::MaxInARow(k) => signal.total_retries_in_a_row < *k,
            Limit::Custom(predicate) => predicate(signal),
        }
    }

    /// The wait before the retry whose consecutive-failure index is `run`
    /// (1-based), if a backoff is configured.
    fn wait_before(&self, run: u64) -> Option<Pin<Box<dyn Future<Output = ()> + Send>>> {
        let backoff = self.backoff.as_ref()?;
        let delay = self.jitter.apply(backoff.delay_for(run));
        Some(self.timer.delay(delay))
    }
}

impl<T: Send + 'static> Flow<T> {
    /// Re-subscribe on failure for as long as `policy` allows. Each attempt
    /// restarts the cold upstream, including every operator below the retry
    /// point.
    pub fn retry(self, policy: Retry) -> Flow<T> {
        let Flow { source, ctx, demand_prepaid } = self;
        Flow::from_parts(
            Arc::new(move |subscription: &Subscription| {
                RetryStage {
                    source: Arc::clone(&source),
                    subscription: subscription.clone(),
                    policy: policy.clone(),
                    current: Some((source)(subscription)),
                    wait: None,
                    total_retries: 0,
                    retries_in_a_row: 0,
                    done: false,
                }
                .boxed()
            }),
            ctx,
            demand_prepaid,
        )
    }

    /// [`retry`](Flow::retry) with a plain total-count policy.
    pub fn retry_n(self, retries: u64) -> Flow<T> {
        self.retry(Retry::max(retries))
    }
}

struct RetryStage<T> {
    source: Arc<SourceFn<T>>,
    subscription: Subscription,
    policy: Retry,
    current: Option<BoxStream<'static, Result<T, Failure>>>,
    wait: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
    total_retries: u64,
    retries_in_a_row: u64,
    done: bool,
}

impl<T> Stream for RetryStage<T> {
    type Item = Result<T, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.done {
                return Poll::Ready(None);
            }
            if let Some(wait) = this.wait.as_mut() {
                ready!(wait.as_mut().poll(cx));
                this.wait = None;
                this.current = Some((this.source)(&this.subscription));
            }
            let Some(current) = this.current.as_mut() else {
                this.done = true;
                return Poll::Ready(None);
            };
            match ready!(current.poll_next_unpin(cx)) {
                Some(Ok(item)) => {
                    this.retries_in_a_row = 0;
                    return Poll::Ready(Some(Ok(item)));
                }
                Some(Err(failure)) => {
                    this.current = None;
                    if failure.is_protocol() {
                        this.done = true;
                        return Poll::Ready(Some(Err(failure)));
                    }
                    let signal = RetrySignal {
                        total_retries: this.total_retries,
                        total_retries_in_a_row: this.retries_in_a_row,
                        failure,
                    };
                    if !this.policy.should_retry(&signal) {
                        this.done = true;
                        return Poll::Ready(Some(Err(signal.failure)));
                    }
                    this.total_retries += 1;
                    this.retries_in_a_row += 1;
                    tracing::debug!(
                        total_retries = this.total_retries,
                        in_a_row = this.retries_in_a_row,
                        failure = %signal.failure,
                        "Retrying after failure"
                    );
                    match this.policy.wait_before(this.retries_in_a_row) {
                        Some(wait) => this.wait = Some(wait),
                        None => this.current = Some((this.source)(&this.subscription)),
                    }
                }
                None => {
                    this.done = true;
                    return Poll::Ready(None);
                }
            }
        }
    }
}
