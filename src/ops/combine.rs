//! Combining several flows: interleave, pair, race, prefix.

use crate::error::Failure;
use crate::flow::{open, Flow, SourceFn};
use crate::subscription::Subscription;
use futures::stream::{self, BoxStream, StreamExt};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

impl<T: Send + 'static> Flow<T> {
    /// Interleave this flow with another. Items surface in arrival order;
    /// the merged flow completes only after both inputs complete, and the
    /// first error wins, dropping the surviving input.
    pub fn merge(self, other: Flow<T>) -> Flow<T> {
        let rival = other.source;
        self.stage(move |upstream| {
            MergeStage { inputs: vec![upstream, open(&rival)], cursor: 0 }.boxed()
        })
    }

    /// Interleave any number of flows. The scheduler binding comes from
    /// the first flow; an empty set completes immediately.
    pub fn merge_all(flows: Vec<Flow<T>>) -> Flow<T> {
        let ctx = flows.first().map(|flow| flow.ctx.clone()).unwrap_or_default();
        let sources: Vec<Arc<SourceFn<T>>> = flows.into_iter().map(|flow| flow.source).collect();
        Flow::from_parts(
            Arc::new(move |_: &Subscription| {
                let inputs = sources.iter().map(|source| open(source)).collect();
                MergeStage { inputs, cursor: 0 }.boxed()
            }),
            ctx,
            false,
        )
    }

    /// Pair items positionally with another flow. The pair stream is as
    /// long as the shorter input; once either side completes, both are
    /// dropped and unpaired leftovers from the longer side are discarded.
    pub fn zip<U: Send + 'static>(self, other: Flow<U>) -> Flow<(T, U)> {
        let rival = other.source;
        self.stage(move |upstream| {
            ZipStage {
                left: Some(upstream),
                right: Some(open(&rival)),
                left_slot: None,
                right_slot: None,
            }
            .boxed()
        })
    }

    /// [`zip`](Flow::zip) through a combining function.
    pub fn zip_with<U, V, F>(self, other: Flow<U>, combine: F) -> Flow<V>
    where
        U: Send + 'static,
        V: Send + 'static,
        F: Fn(T, U) -> V + Send + Sync + 'static,
    {
        self.zip(other).map(move |(left, right)| combine(left, right))
    }

    /// Mirror whichever flow signals first, item or terminal alike; the
    /// loser is dropped.
    pub fn race(self, other: Flow<T>) -> Flow<T> {
        Flow::first_to_signal(vec![self, other])
    }

    /// N-way [`race`](Flow::race). The scheduler binding comes from the
    /// first flow; an empty set completes immediately.
    pub fn first_to_signal(flows: Vec<Flow<T>>) -> Flow<T> {
        let ctx = flows.first().map(|flow| flow.ctx.clone()).unwrap_or_default();
        let sources: Vec<Arc<SourceFn<T>>> = flows.into_iter().map(|flow| flow.source).collect();
        Flow::from_parts(
            Arc::new(move |_: &Subscription| {
                let contenders = sources.iter().map(|source| open(source)).collect();
                RaceStage { contenders, winner: None, done: false }.boxed()
            }),
            ctx,
            false,
        )
    }

    /// Emit the given items before anything from this flow.
    pub fn start_with<I>(self, items: I) -> Flow<T>
    where
        I: IntoIterator<Item = T>,
        T: Clone + Sync,
    {
        let prefix: Arc<[T]> = items.into_iter().collect();
        self.stage(move |upstream| {
            let prefix = Arc::clone(&prefix);
            let len = prefix.len();
            stream::iter((0..len).map(move |i| Ok(prefix[i].clone())))
                .chain(upstream)
                .boxed()
        })
    }
}

struct MergeStage<T> {
    inputs: Vec<BoxStream<'static, Result<T, Failure>>>,
    cursor: usize,
}

impl<T> Stream for MergeStage<T> {
    type Item = Result<T, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.inputs.is_empty() {
                return Poll::Ready(None);
            }
            let mut removed = false;
            for offset in 0..this.inputs.len() {
                let idx = (this.cursor + offset) % this.inputs.len();
                match this.inputs[idx].poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(item))) => {
                        // Rotate so a firehose input cannot starve the rest.
                        this.cursor = (idx + 1) % this.inputs.len();
                        return Poll::Ready(Some(Ok(item)));
                    }
                    Poll::Ready(Some(Err(failure))) => {
                        this.inputs.clear();
                        return Poll::Ready(Some(Err(failure)));
                    }
                    Poll::Ready(None) => {
                        let _ = this.inputs.swap_remove(idx);
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

struct ZipStage<A, B> {
    left: Option<BoxStream<'static, Result<A, Failure>>>,
    right: Option<BoxStream<'static, Result<B, Failure>>>,
    left_slot: Option<A>,
    right_slot: Option<B>,
}

// Item slots are plain values accessed through &mut; nothing is pinned
// inside, so the stage moves freely whatever A and B are.
impl<A, B> Unpin for ZipStage<A, B> {}

impl<A, B> ZipStage<A, B> {
    fn close(&mut self) {
        self.left = None;
        self.right = None;
        self.left_slot = None;
        self.right_slot = None;
    }
}

impl<A, B> Stream for ZipStage<A, B> {
    type Item = Result<(A, B), Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let mut pending = false;
            if this.left_slot.is_none() {
                if let Some(left) = this.left.as_mut() {
                    match left.poll_next_unpin(cx) {
                        Poll::Ready(Some(Ok(item))) => this.left_slot = Some(item),
                        Poll::Ready(Some(Err(failure))) => {
                            this.close();
                            return Poll::Ready(Some(Err(failure)));
                        }
                        Poll::Ready(None) => this.left = None,
                        Poll::Pending => pending = true,
                    }
                }
            }
            if this.right_slot.is_none() {
                if let Some(right) = this.right.as_mut() {
                    match right.poll_next_unpin(cx) {
                        Poll::Ready(Some(Ok(item))) => this.right_slot = Some(item),
                        Poll::Ready(Some(Err(failure))) => {
                            this.close();
                            return Poll::Ready(Some(Err(failure)));
                        }
                        Poll::Ready(None) => this.right = None,
                        Poll::Pending => pending = true,
                    }
                }
            }
            match (this.left_slot.take(), this.right_slot.take()) {
                (Some(left), Some(right)) => return Poll::Ready(Some(Ok((left, right)))),
                (left, right) => {
                    this.left_slot = left;
                    this.right_slot = right;
                }
            }
            // A side that completed with its slot empty can never pair
            // again, so the whole zip is over.
            let left_dead = this.left.is_none() && this.left_slot.is_none();
            let right_dead = this.right.is_none() && this.right_slot.is_none();
            if left_dead || right_dead {
                this.close();
                return Poll::Ready(None);
            }
            if pending {
                return Poll::Pending;
            }
        }
    }
}

struct RaceStage<T> {
    contenders: Vec<BoxStream<'static, Result<T, Failure>>>,
    winner: Option<BoxStream<'static, Result<T, Failure>>>,
    done: bool,
}

impl<T> Stream for RaceStage<T> {
    type Item = Result<T, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        if let Some(winner) = this.winner.as_mut() {
            return winner.poll_next_unpin(cx);
        }
        if this.contenders.is_empty() {
            this.done = true;
            return Poll::Ready(None);
        }
        for idx in 0..this.contenders.len() {
            match this.contenders[idx].poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(item))) => {
                    let winner = this.contenders.swap_remove(idx);
                    this.contenders.clear();
                    this.winner = Some(winner);
                    return Poll::Ready(Some(Ok(item)));
                }
                Poll::Ready(Some(Err(failure))) => {
                    this.contenders.clear();
                    this.done = true;
                    return Poll::Ready(Some(Err(failure)));
                }
                Poll::Ready(None) => {
                    this.contenders.clear();
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => {}
            }
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn merge_counts_items_and_completes_once() {
        let merged = Flow::from_iter([1, 2, 3]).merge(Flow::from_iter([10, 20]));
        let mut items = merged.collect().await.unwrap();
        items.sort_unstable();
        assert_eq!(items, vec![1, 2, 3, 10, 20]);
    }

    #[tokio::test]
    async fn merge_first_error_drops_the_survivor() {
        let merged = Flow::<i32>::error(Failure::msg("left boom")).merge(Flow::from_iter([1, 2]));
        assert!(merged.collect().await.is_err());
    }

    #[tokio::test]
    async fn merge_all_of_nothing_completes() {
        let items = Flow::<i32>::merge_all(Vec::new()).collect().await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn zip_is_as_long_as_the_shorter_side() {
        let letters = Flow::from_iter(["A", "B", "C", "D"]);
        let numbers = Flow::from_iter([1, 2, 3]);
        let pairs = letters.zip(numbers).collect().await.unwrap();
        assert_eq!(pairs, vec![("A", 1), ("B", 2), ("C", 3)]);
    }

    #[tokio::test]
    async fn zip_with_combines_pairs() {
        let joined = Flow::from_iter(["A", "B"])
            .zip_with(Flow::from_iter([1, 2]), |letter, number| format!("{letter}->{number}"))
            .collect()
            .await
            .unwrap();
        assert_eq!(joined, vec!["A->1", "B->2"]);
    }

    #[tokio::test]
    async fn zip_against_empty_is_empty() {
        let pairs = Flow::from_iter([1, 2, 3]).zip(Flow::<i32>::empty()).collect().await.unwrap();
        assert!(pairs.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn race_picks_the_faster_flow() {
        let slow = Flow::interval(Duration::from_millis(100)).map(|_| "slow");
        let fast = Flow::interval(Duration::from_millis(10)).map(|_| "fast");
        let winner = slow.race(fast).take(2).collect().await.unwrap();
        assert_eq!(winner, vec!["fast", "fast"]);
    }

    #[tokio::test]
    async fn race_complete_beats_slow_items() {
        let never_quick = Flow::interval(Duration::from_secs(60)).map(|_| 1);
        let finished = never_quick.race(Flow::empty()).collect().await.unwrap();
        assert!(finished.is_empty());
    }

    #[tokio::test]
    async fn start_with_prefixes_items() {
        let items = Flow::from_iter([3, 4]).start_with([1, 2]).collect().await.unwrap();
        assert_eq!(items, vec![1, 2, 3, 4]);
    }
}
