//! Demand ledger and cancel gate shared between producer and consumer.
//!
//! A [`Subscription`] is the pull/cancel handle created for every subscriber.
//! It carries a non-negative demand counter with an unbounded sentinel and a
//! monotonic cancel flag. Producers deliver an item only after claiming one
//! unit of demand, so a subscriber can never receive more items than it asked
//! for. Cancellation wakes the delivery loop so it stops within one unit of
//! scheduled work.

use crate::signal::Disposition;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// The pull/cancel handle a consumer holds on a producer.
///
/// Cloning is cheap; the clones share one demand ledger, so a subscriber may
/// keep a copy from [`on_subscribe`](crate::flow::Subscriber::on_subscribe)
/// and request more items later from any task.
#[derive(Debug, Clone)]
pub struct Subscription {
    state: Arc<State>,
}

#[derive(Debug)]
struct State {
    requested: AtomicU64,
    cancelled: AtomicBool,
    wake: Notify,
}

impl Subscription {
    /// Demand sentinel meaning "no limit".
    ///
    /// Requests that would overflow the counter saturate to this value, which
    /// matches treating overflowing demand as effectively unbounded.
    pub const UNBOUNDED: u64 = u64::MAX;

    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(State {
                requested: AtomicU64::new(0),
                cancelled: AtomicBool::new(false),
                wake: Notify::new(),
            }),
        }
    }

    /// Add `n` units of demand. Requests of zero are ignored.
    pub fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        let mut current = self.state.requested.load(Ordering::Acquire);
        loop {
            if current == Self::UNBOUNDED {
                return;
            }
            let next = current.saturating_add(n);
            match self.state.requested.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.state.wake.notify_one();
    }

    /// Request the unbounded sentinel: the producer may deliver freely.
    pub fn request_unbounded(&self) {
        self.state.requested.store(Self::UNBOUNDED, Ordering::Release);
        self.state.wake.notify_one();
    }

    /// Outstanding demand not yet consumed by deliveries.
    pub fn requested(&self) -> u64 {
        self.state.requested.load(Ordering::Acquire)
    }

    /// Stop the sequence. Idempotent; once cancelled, a subscription stays
    /// cancelled and no further signals are delivered.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        self.state.wake.notify_one();
    }

    /// Check whether `cancel` was called.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Debit one unit of demand. Returns false when none is outstanding.
    /// The unbounded sentinel is never decremented.
    pub(crate) fn try_claim(&self) -> bool {
        let mut current = self.state.requested.load(Ordering::Acquire);
        loop {
            if current == Self::UNBOUNDED {
                return true;
            }
            if current == 0 {
                return false;
            }
            match self.state.requested.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Wait until one unit of demand is claimed or the subscription is
    /// cancelled. Returns false on cancellation.
    ///
    /// Single-waiter protocol: the delivery loop is the only task that ever
    /// waits here, and `notify_one` stores a permit when nobody is waiting,
    /// so a request or cancel arriving between the check and the wait is
    /// never lost.
    pub(crate) async fn await_demand(&self) -> bool {
        loop {
            if self.is_cancelled() {
                return false;
            }
            if self.try_claim() {
                return true;
            }
            self.state.wake.notified().await;
        }
    }

    /// Resolve once the subscription is cancelled.
    pub(crate) async fn cancelled_wait(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            self.state.wake.notified().await;
        }
    }
}

/// Handle to a running subscription.
///
/// Dropping the handle does not cancel the sequence; call
/// [`dispose`](Disposable::dispose) to stop it, or
/// [`join`](Disposable::join) to wait for its terminal disposition.
#[derive(Debug)]
pub struct Disposable {
    subscription: Subscription,
    driver: JoinHandle<Disposition>,
}

impl Disposable {
    pub(crate) fn new(subscription: Subscription, driver: JoinHandle<Disposition>) -> Self {
        Self { subscription, driver }
    }

    /// Cancel the underlying subscription. Idempotent.
    pub fn dispose(&self) {
        self.subscription.cancel();
    }

    /// True once the subscription is cancelled or has terminated.
    pub fn is_disposed(&self) -> bool {
        self.subscription.is_cancelled() || self.driver.is_finished()
    }

    /// The subscription handle, for issuing demand or checking state.
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Wait for the delivery loop to finish and report how it ended.
    pub async fn join(self) -> Disposition {
        match self.driver.await {
            Ok(disposition) => disposition,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Disposition::Cancelled,
        }
    }
}
