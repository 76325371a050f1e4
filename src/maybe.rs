//! Optional single results: sequences of zero or one item.
//!
//! A [`Maybe`] resolves to `Ok(Some(item))`, `Ok(None)` for an empty
//! result, or `Err` on failure. Like [`Flow`](crate::flow::Flow) it is
//! cold: the factory runs once per [`resolve`](Maybe::resolve) or per
//! subscriber after [`into_flow`](Maybe::into_flow).
//!
//! ```rust
//! use millstream::Maybe;
//!
//! #[tokio::main]
//! async fn main() {
//!     let found = Maybe::just(21).map(|n| n * 2).resolve().await.unwrap();
//!     assert_eq!(found, Some(42));
//!
//!     let missing = Maybe::<i32>::empty().resolve().await.unwrap();
//!     assert_eq!(missing, None);
//! }
//! ```

use crate::error::Failure;
use crate::flow::Flow;
use crate::scheduler::Scheduler;
use crate::subscription::Subscription;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

type MaybeSource<T> = dyn Fn() -> BoxFuture<'static, Result<Option<T>, Failure>> + Send + Sync;

/// A cold, optional single result.
pub struct Maybe<T> {
    source: Arc<MaybeSource<T>>,
    ctx: Scheduler,
}

impl<T> Clone for Maybe<T> {
    fn clone(&self) -> Self {
        Self { source: Arc::clone(&self.source), ctx: self.ctx.clone() }
    }
}

impl<T> std::fmt::Debug for Maybe<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Maybe").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Maybe<T> {
    /// Build from an async factory that runs once per resolution.
    pub fn from_async<Fut, F>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>, Failure>> + Send + 'static,
    {
        Self {
            source: Arc::new(move || factory().boxed()),
            ctx: Scheduler::default(),
        }
    }

    /// A present result.
    pub fn just(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_async(move || {
            let value = value.clone();
            async move { Ok(Some(value)) }
        })
    }

    /// An absent result.
    pub fn empty() -> Self {
        Self::from_async(|| async { Ok(None) })
    }

    /// A failed result.
    pub fn error(failure: Failure) -> Self {
        Self::from_async(move || {
            let failure = failure.clone();
            async move { Err(failure) }
        })
    }

    /// Defer building until resolution time.
    pub fn defer<F>(factory: F) -> Self
    where
        F: Fn() -> Maybe<T> + Send + Sync + 'static,
    {
        Self {
            source: Arc::new(move || (factory().source)()),
            ctx: Scheduler::default(),
        }
    }

    /// Transform the item, if present.
    pub fn map<U, F>(self, transform: F) -> Maybe<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let source = self.source;
        let transform = Arc::new(transform);
        Maybe {
            source: Arc::new(move || {
                let pending = (source)();
                let transform = Arc::clone(&transform);
                async move { Ok(pending.await?.map(|item| transform(item))) }.boxed()
            }),
            ctx: self.ctx,
        }
    }

    /// Turn a present item the predicate rejects into an absent result.
    pub fn filter<F>(self, keep: F) -> Maybe<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let source = self.source;
        let keep = Arc::new(keep);
        Maybe {
            source: Arc::new(move || {
                let pending = (source)();
                let keep = Arc::clone(&keep);
                async move { Ok(pending.await?.filter(|item| keep(item))) }.boxed()
            }),
            ctx: self.ctx,
        }
    }

    /// Substitute `value` when the result is absent.
    pub fn default_if_empty(self, value: T) -> Maybe<T>
    where
        T: Clone + Sync,
    {
        let source = self.source;
        Maybe {
            source: Arc::new(move || {
                let pending = (source)();
                let value = value.clone();
                async move { Ok(Some(pending.await?.unwrap_or(value))) }.boxed()
            }),
            ctx: self.ctx,
        }
    }

    /// Swallow a failure and resolve present with `value` instead.
    pub fn on_error_return(self, value: T) -> Maybe<T>
    where
        T: Clone + Sync,
    {
        let source = self.source;
        Maybe {
            source: Arc::new(move || {
                let pending = (source)();
                let value = value.clone();
                async move {
                    match pending.await {
                        Ok(found) => Ok(found),
                        Err(_) => Ok(Some(value)),
                    }
                }
                .boxed()
            }),
            ctx: self.ctx,
        }
    }

    /// Swap a failure for the result of a fallback.
    pub fn on_error_resume<F>(self, fallback: F) -> Maybe<T>
    where
        F: Fn(&Failure) -> Maybe<T> + Send + Sync + 'static,
    {
        let source = self.source;
        let fallback = Arc::new(fallback);
        Maybe {
            source: Arc::new(move || {
                let pending = (source)();
                let fallback = Arc::clone(&fallback);
                async move {
                    match pending.await {
                        Ok(found) => Ok(found),
                        Err(failure) => fallback(&failure).resolve().await,
                    }
                }
                .boxed()
            }),
            ctx: self.ctx,
        }
    }

    /// Run the factory and wait for the outcome.
    pub async fn resolve(self) -> Result<Option<T>, Failure> {
        (self.source)().await
    }

    /// View as a flow of zero or one item.
    pub fn into_flow(self) -> Flow<T> {
        let source = self.source;
        Flow::from_parts(
            Arc::new(move |_: &Subscription| {
                stream::once((source)())
                    .filter_map(|outcome| async move {
                        match outcome {
                            Ok(Some(item)) => Some(Ok(item)),
                            Ok(None) => None,
                            Err(failure) => Some(Err(failure)),
                        }
                    })
                    .boxed()
            }),
            self.ctx,
            false,
        )
    }
}
