//! Aggregation: chunking and terminal collectors that reduce a flow to a
//! [`Maybe`].

use crate::error::Failure;
use crate::flow::Flow;
use crate::maybe::Maybe;
use futures::stream::{BoxStream, StreamExt};
use futures::Stream;
use std::collections::HashMap;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

impl<T: Send + 'static> Flow<T> {
    /// Group items into chunks of `size`. A final partial chunk is emitted
    /// on completion; nothing buffered survives an error.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn buffer(self, size: usize) -> Flow<Vec<T>> {
        assert!(size > 0, "buffer size must be at least one");
        self.stage(move |upstream| {
            BufferStage { upstream, size, pending: Vec::with_capacity(size), done: false }.boxed()
        })
    }

    /// Gather every item into one list. An empty flow yields an empty
    /// list, not an absent result.
    pub fn collect_list(self) -> Maybe<Vec<T>> {
        Maybe::from_async(move || {
            let flow = self.clone();
            async move { flow.collect().await.map(Some) }
        })
    }

    /// Gather items into a map keyed by `key_of`. Later items overwrite
    /// earlier ones with the same key.
    pub fn collect_map<K, F>(self, key_of: F) -> Maybe<HashMap<K, T>>
    where
        K: Eq + Hash + Send + 'static,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        let key_of = Arc::new(key_of);
        Maybe::from_async(move || {
            let flow = self.clone();
            let key_of = Arc::clone(&key_of);
            async move {
                let items = flow.collect().await?;
                let mut map = HashMap::with_capacity(items.len());
                for item in items {
                    map.insert(key_of(&item), item);
                }
                Ok(Some(map))
            }
        })
    }

    /// True when every item satisfies the predicate. Short-circuits on the
    /// first counterexample; an empty flow is vacuously true.
    pub fn all<F>(self, predicate: F) -> Maybe<bool>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        Maybe::from_async(move || {
            let flow = self.clone();
            let predicate = Arc::clone(&predicate);
            async move {
                let mut stream = flow.into_stream();
                while let Some(next) = stream.next().await {
                    if !predicate(&next?) {
                        return Ok(Some(false));
                    }
                }
                Ok(Some(true))
            }
        })
    }

    /// True when some item satisfies the predicate. Short-circuits on the
    /// first witness; an empty flow yields false.
    pub fn any<F>(self, predicate: F) -> Maybe<bool>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        Maybe::from_async(move || {
            let flow = self.clone();
            let predicate = Arc::clone(&predicate);
            async move {
                let mut stream = flow.into_stream();
                while let Some(next) = stream.next().await {
                    if predicate(&next?) {
                        return Ok(Some(true));
                    }
                }
                Ok(Some(false))
            }
        })
    }

    /// The first item, absent when the flow completes empty. The rest of
    /// the sequence is dropped unconsumed.
    pub fn first(self) -> Maybe<T> {
        Maybe::from_async(move || {
            let flow = self.clone();
            async move {
                let mut stream = flow.into_stream();
                match stream.next().await {
                    Some(Ok(item)) => Ok(Some(item)),
                    Some(Err(failure)) => Err(failure),
                    None => Ok(None),
                }
            }
        })
    }

    /// The final item, absent when the flow completes empty.
    pub fn last(self) -> Maybe<T> {
        Maybe::from_async(move || {
            let flow = self.clone();
            async move {
                let mut stream = flow.into_stream();
                let mut latest = None;
                while let Some(next) = stream.next().await {
                    latest = Some(next?);
                }
                Ok(latest)
            }
        })
    }
}

struct BufferStage<T> {
    upstream: BoxStream<'static, Result<T, Failure>>,
    size: usize,
    pending: Vec<T>,
    done: bool,
}

// All fields are used through plain `&mut` access; nothing is
// structurally pinned, so the stage is `Unpin` regardless of `T`.
impl<T> Unpin for BufferStage<T> {}

impl<T> Stream for BufferStage<T> {
    type Item = Result<Vec<T>, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        loop {
            match ready!(this.upstream.poll_next_unpin(cx)) {
                Some(Ok(item)) => {
                    this.pending.push(item);
                    if this.pending.len() == this.size {
                        let chunk = std::mem::replace(
                            &mut this.pending,
                            Vec::with_capacity(this.size),
                        );
                        return Poll::Ready(Some(Ok(chunk)));
                    }
                }
                Some(Err(failure)) => {
                    this.pending.clear();
                    this.done = true;
                    return Poll::Ready(Some(Err(failure)));
                }
                None => {
                    this.done = true;
                    if this.pending.is_empty() {
                        return Poll::Ready(None);
                    }
                    return Poll::Ready(Some(Ok(std::mem::take(&mut this.pending))));
                }
            }
        }
    }
}
