//! Timer abstraction used by time-based operators and retry backoff.
//!
//! Every wait in this crate goes through a [`Timer`] rather than blocking a
//! thread, so pipelines remain cancellable mid-wait and tests can observe or
//! fabricate delays.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Source of awaitable delays.
///
/// Implementations must not block the calling thread; the returned future is
/// dropped when the surrounding pipeline is cancelled, which aborts the wait.
pub trait Timer: Send + Sync + std::fmt::Debug {
    /// Resolve after `duration` has elapsed.
    fn delay(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Production timer backed by the tokio runtime clock.
///
/// Respects `tokio::time::pause` in tests, so paused-clock tests can advance
/// through delays instantly.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn delay(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Test timer that records each requested delay and resolves immediately.
#[derive(Debug, Clone, Default)]
pub struct TrackingTimer {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order.
    pub fn recorded(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }

    /// Number of delays requested so far.
    pub fn count(&self) -> usize {
        self.delays.lock().unwrap().len()
    }
}

impl Timer for TrackingTimer {
    fn delay(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        self.delays.lock().unwrap().push(duration);
        Box::pin(std::future::ready(()))
    }
}
