//! Hot unicast source: push items into a pipeline by hand.
//!
//! [`unicast`] builds the bridge between imperative code and a [`Flow`]: the
//! returned [`Emitter`] pushes signals, the returned flow delivers them to
//! exactly one subscriber. Unlike a cold flow there is no per-subscriber
//! replay; signals emitted here happen once.
//!
//! Demand is enforced at the push side. Every [`Emitter::emit`] claims one
//! unit of the subscriber's outstanding demand, and a push past the granted
//! demand fails fast: the sequence is poisoned with a
//! [`ProtocolViolation::DemandOverrun`] failure and the emit returns
//! [`EmitError::Overrun`]. Slowing down or buffering on behalf of the
//! producer is out of scope; a producer that cannot respect demand should
//! see that immediately rather than grow an invisible queue.

use crate::error::{EmitError, Failure, ProtocolViolation};
use crate::flow::Flow;
use crate::scheduler::Scheduler;
use crate::signal::Signal;
use crate::subscription::Subscription;
use arc_swap::ArcSwapOption;
use futures::future;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

struct Shared<T> {
    tx: mpsc::UnboundedSender<Signal<T>>,
    attached: ArcSwapOption<Subscription>,
    terminated: AtomicBool,
}

/// Push side of a [`unicast`] pair. Clones share the same sequence, so
/// several producer tasks may feed one subscriber.
pub struct Emitter<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<T> std::fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("attached", &self.shared.attached.load().is_some())
            .field("terminated", &self.shared.terminated.load(Ordering::Acquire))
            .finish()
    }
}

/// A hot sequence fed by hand.
///
/// The flow side accepts exactly one subscriber; any further subscription
/// fails with [`ProtocolViolation::AlreadySubscribed`]. Until a subscriber
/// attaches and requests, [`Emitter::emit`] refuses items, so nothing is
/// produced into the void.
pub fn unicast<T: Send + 'static>() -> (Emitter<T>, Flow<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        tx,
        attached: ArcSwapOption::empty(),
        terminated: AtomicBool::new(false),
    });
    let slot: ArcSwapOption<mpsc::UnboundedReceiver<Signal<T>>> =
        ArcSwapOption::from_pointee(rx);

    let emitter = Emitter { shared: Arc::clone(&shared) };
    let flow = Flow::from_parts(
        Arc::new(move |subscription: &Subscription| {
            let taken = slot.swap(None).and_then(|rx| Arc::try_unwrap(rx).ok());
            let Some(rx) = taken else {
                return stream::once(future::ready(Err(Failure::protocol(
                    ProtocolViolation::AlreadySubscribed,
                ))))
                .boxed();
            };
            shared.attached.store(Some(Arc::new(subscription.clone())));
            stream::unfold((rx, false), |(mut rx, done)| async move {
                if done {
                    return None;
                }
                match rx.recv().await {
                    Some(Signal::Next(item)) => Some((Ok(item), (rx, false))),
                    Some(Signal::Error(failure)) => Some((Err(failure), (rx, true))),
                    // A dropped emitter without a terminal counts as
                    // completion.
                    Some(Signal::Complete) | None => None,
                }
            })
            .boxed()
        }),
        Scheduler::default(),
        // Demand is claimed here at emit time, not by the delivery loop.
        true,
    );
    (emitter, flow)
}

impl<T: Send + 'static> Emitter<T> {
    /// Push one item, claiming one unit of outstanding demand.
    ///
    /// Fails with [`EmitError::Overrun`] when no demand is outstanding; the
    /// subscriber then receives a [`ProtocolViolation::DemandOverrun`]
    /// failure and the sequence is over.
    pub fn emit(&self, item: T) -> Result<(), EmitError> {
        if self.shared.terminated.load(Ordering::Acquire) {
            return Err(EmitError::Terminated);
        }
        let attached = self.shared.attached.load();
        let Some(subscription) = attached.as_deref() else {
            return Err(EmitError::NotSubscribed);
        };
        if subscription.is_cancelled() {
            return Err(EmitError::Cancelled);
        }
        if !subscription.try_claim() {
            self.shared.terminated.store(true, Ordering::Release);
            let _ = self
                .shared
                .tx
                .send(Signal::Error(Failure::protocol(ProtocolViolation::DemandOverrun)));
            return Err(EmitError::Overrun);
        }
        if self.shared.tx.send(Signal::Next(item)).is_err() {
            return Err(EmitError::Cancelled);
        }
        Ok(())
    }

    /// Fail the sequence. Terminal signals consume no demand.
    pub fn error(&self, failure: Failure) -> Result<(), EmitError> {
        if self.shared.terminated.swap(true, Ordering::AcqRel) {
            return Err(EmitError::Terminated);
        }
        if self.shared.tx.send(Signal::Error(failure)).is_err() {
            return Err(EmitError::Cancelled);
        }
        Ok(())
    }

    /// End the sequence. Terminal signals consume no demand.
    pub fn complete(&self) -> Result<(), EmitError> {
        if self.shared.terminated.swap(true, Ordering::AcqRel) {
            return Err(EmitError::Terminated);
        }
        if self.shared.tx.send(Signal::Complete).is_err() {
            return Err(EmitError::Cancelled);
        }
        Ok(())
    }

    /// Demand currently outstanding, zero while no subscriber is attached.
    pub fn requested(&self) -> u64 {
        self.shared.attached.load().as_deref().map_or(0, Subscription::requested)
    }

    /// True once the subscriber has cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.shared.attached.load().as_deref().is_some_and(Subscription::is_cancelled)
    }

    /// True once a terminal signal has been pushed or an overrun poisoned
    /// the sequence.
    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::Acquire)
    }
}
