//! Per-item transforms: map, filter, dedup, expansion.

use crate::error::Failure;
use crate::flow::Flow;
use futures::stream::{BoxStream, StreamExt};
use futures::Stream;
use std::collections::HashSet;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

/// Inner sequences a `flat_map` drains concurrently before it stops
/// pulling the outer sequence.
const FLAT_MAP_LIMIT: usize = 16;

impl<T: Send + 'static> Flow<T> {
    /// Transform every item.
    pub fn map<U, F>(self, transform: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let transform: Arc<dyn Fn(T) -> U + Send + Sync> = Arc::new(transform);
        self.stage(move |upstream| {
            MapStage { upstream, transform: Arc::clone(&transform) }.boxed()
        })
    }

    /// Transform every item fallibly; an `Err` fails the sequence with an
    /// operator failure.
    pub fn try_map<U, E, F>(self, transform: F) -> Flow<U>
    where
        U: Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
    {
        let transform: Arc<dyn Fn(T) -> Result<U, E> + Send + Sync> = Arc::new(transform);
        self.stage(move |upstream| {
            TryMapStage { upstream, transform: Arc::clone(&transform) }.boxed()
        })
    }

    /// Keep only items the predicate accepts.
    pub fn filter<F>(self, keep: F) -> Flow<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let keep: Arc<dyn Fn(&T) -> bool + Send + Sync> = Arc::new(keep);
        self.stage(move |upstream| FilterStage { upstream, keep: Arc::clone(&keep) }.boxed())
    }

    /// Drop items that already appeared earlier in the sequence.
    pub fn distinct(self) -> Flow<T>
    where
        T: Eq + Hash + Clone,
    {
        self.stage(|upstream| DistinctStage { upstream, seen: HashSet::new() }.boxed())
    }

    /// Pair every item with its zero-based position.
    pub fn index(self) -> Flow<(u64, T)> {
        self.stage(|upstream| IndexStage { upstream, next: 0 }.boxed())
    }

    /// Expand each item into a flow and interleave the results, draining up
    /// to a fixed number of inner flows at a time.
    ///
    /// Inner items keep their relative order per inner flow but interleave
    /// across flows. Use [`concat_map`](Flow::concat_map) when overall
    /// order must be preserved.
    pub fn flat_map<U, F>(self, expand: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flow<U> + Send + Sync + 'static,
    {
        self.flat_map_limited(FLAT_MAP_LIMIT, expand)
    }

    /// [`flat_map`](Flow::flat_map) with an explicit concurrency cap.
    ///
    /// # Panics
    ///
    /// Panics if `limit` is zero.
    pub fn flat_map_limited<U, F>(self, limit: usize, expand: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flow<U> + Send + Sync + 'static,
    {
        assert!(limit > 0, "flat_map limit must be at least one");
        let expand: Arc<dyn Fn(T) -> Flow<U> + Send + Sync> = Arc::new(expand);
        self.stage(move |upstream| {
            FlatMapStage {
                upstream: Some(upstream),
                expand: Arc::clone(&expand),
                active: Vec::new(),
                cursor: 0,
                limit,
            }
            .boxed()
        })
    }

    /// Expand each item into a flow and drain it to completion before
    /// touching the next item.
    pub fn concat_map<U, F>(self, expand: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flow<U> + Send + Sync + 'static,
    {
        let expand: Arc<dyn Fn(T) -> Flow<U> + Send + Sync> = Arc::new(expand);
        self.stage(move |upstream| {
            ConcatMapStage {
                upstream: Some(upstream),
                expand: Arc::clone(&expand),
                current: None,
            }
            .boxed()
        })
    }
}

struct MapStage<T, U> {
    upstream: BoxStream<'static, Result<T, Failure>>,
    transform: Arc<dyn Fn(T) -> U + Send + Sync>,
}

impl<T, U> Stream for MapStage<T, U> {
    type Item = Result<U, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Poll::Ready(match ready!(this.upstream.poll_next_unpin(cx)) {
            Some(Ok(item)) => Some(Ok((this.transform)(item))),
            Some(Err(failure)) => Some(Err(failure)),
            None => None,
        })
    }
}

struct TryMapStage<T, U, E> {
    upstream: BoxStream<'static, Result<T, Failure>>,
    transform: Arc<dyn Fn(T) -> Result<U, E> + Send + Sync>,
}

impl<T, U, E> Stream for TryMapStage<T, U, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    type Item = Result<U, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Poll::Ready(match ready!(this.upstream.poll_next_unpin(cx)) {
            Some(Ok(item)) => match (this.transform)(item) {
                Ok(mapped) => Some(Ok(mapped)),
                Err(err) => Some(Err(Failure::operator(err))),
            },
            Some(Err(failure)) => Some(Err(failure)),
            None => None,
        })
    }
}

struct FilterStage<T> {
    upstream: BoxStream<'static, Result<T, Failure>>,
    keep: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T> Stream for FilterStage<T> {
    type Item = Result<T, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match ready!(this.upstream.poll_next_unpin(cx)) {
                Some(Ok(item)) => {
                    if (this.keep)(&item) {
                        return Poll::Ready(Some(Ok(item)));
                    }
                }
                Some(Err(failure)) => return Poll::Ready(Some(Err(failure))),
                None => return Poll::Ready(None),
            }
        }
    }
}

struct DistinctStage<T> {
    upstream: BoxStream<'static, Result<T, Failure>>,
    seen: HashSet<T>,
}

// All fields are used through plain `&mut` access; nothing is
// structurally pinned, so the stage is `Unpin` regardless of `T`.
impl<T> Unpin for DistinctStage<T> {}

impl<T: Eq + Hash + Clone> Stream for DistinctStage<T> {
    type Item = Result<T, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match ready!(this.upstream.poll_next_unpin(cx)) {
                Some(Ok(item)) => {
                    if this.seen.insert(item.clone()) {
                        return Poll::Ready(Some(Ok(item)));
                    }
                }
                Some(Err(failure)) => return Poll::Ready(Some(Err(failure))),
                None => return Poll::Ready(None),
            }
        }
    }
}

struct IndexStage<T> {
    upstream: BoxStream<'static, Result<T, Failure>>,
    next: u64,
}

impl<T> Stream for IndexStage<T> {
    type Item = Result<(u64, T), Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Poll::Ready(match ready!(this.upstream.poll_next_unpin(cx)) {
            Some(Ok(item)) => {
                let index = this.next;
                this.next += 1;
                Some(Ok((index, item)))
            }
            Some(Err(failure)) => Some(Err(failure)),
            None => None,
        })
    }
}

struct FlatMapStage<T, U> {
    upstream: Option<BoxStream<'static, Result<T, Failure>>>,
    expand: Arc<dyn Fn(T) -> Flow<U> + Send + Sync>,
    active: Vec<BoxStream<'static, Result<U, Failure>>>,
    cursor: usize,
    limit: usize,
}

impl<T, U: Send + 'static> Stream for FlatMapStage<T, U> {
    type Item = Result<U, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            // Admit inner flows until the cap is reached or the outer
            // sequence has nothing ready.
            while this.active.len() < this.limit {
                let Some(upstream) = this.upstream.as_mut() else { break };
                match upstream.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(item))) => {
                        this.active.push((this.expand)(item).into_stream());
                    }
                    Poll::Ready(Some(Err(failure))) => {
                        this.upstream = None;
                        this.active.clear();
                        return Poll::Ready(Some(Err(failure)));
                    }
                    Poll::Ready(None) => {
                        this.upstream = None;
                        break;
                    }
                    Poll::Pending => break,
                }
            }

            if this.active.is_empty() {
                return match this.upstream {
                    None => Poll::Ready(None),
                    Some(_) => Poll::Pending,
                };
            }

            // Rotate over the active set so one busy inner flow cannot
            // starve the others.
            let mut removed = false;
            for offset in 0..this.active.len() {
                let idx = (this.cursor + offset) % this.active.len();
                match this.active[idx].poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(item))) => {
                        this.cursor = (idx + 1) % this.active.len();
                        return Poll::Ready(Some(Ok(item)));
                    }
                    Poll::Ready(Some(Err(failure))) => {
                        this.upstream = None;
                        this.active.clear();
                        return Poll::Ready(Some(Err(failure)));
                    }
                    Poll::Ready(None) => {
                        let _ = this.active.swap_remove(idx);
                        removed = true;
                        break;
                    }
                    Poll::Pending => {}
                }
            }
            if !removed {
                return Poll::Pending;
            }
        }
    }
}

struct ConcatMapStage<T, U> {
    upstream: Option<BoxStream<'static, Result<T, Failure>>>,
    expand: Arc<dyn Fn(T) -> Flow<U> + Send + Sync>,
    current: Option<BoxStream<'static, Result<U, Failure>>>,
}

impl<T, U: Send + 'static> Stream for ConcatMapStage<T, U> {
    type Item = Result<U, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(current) = this.current.as_mut() {
                match ready!(current.poll_next_unpin(cx)) {
                    Some(Ok(item)) => return Poll::Ready(Some(Ok(item))),
                    Some(Err(failure)) => {
                        this.current = None;
                        this.upstream = None;
                        return Poll::Ready(Some(Err(failure)));
                    }
                    None => this.current = None,
                }
                continue;
            }
            let Some(upstream) = this.upstream.as_mut() else {
                return Poll::Ready(None);
            };
            match ready!(upstream.poll_next_unpin(cx)) {
                Some(Ok(item)) => this.current = Some((this.expand)(item).into_stream()),
                Some(Err(failure)) => {
                    this.upstream = None;
                    return Poll::Ready(Some(Err(failure)));
                }
                None => this.upstream = None,
            }
        }
    }
}
