//! Execution contexts that bound how densely pipeline work may run.
//!
//! A [`Scheduler`] does not own threads. It is an admission gate: every
//! signal-delivery step and every hand-off pull a pipeline performs is run
//! as one short job through [`Scheduler::run`], and the gate decides how
//! many such jobs may be in flight at once.
//!
//! - [`immediate`](Scheduler::immediate): no gate, the job runs inline on
//!   the calling task.
//! - [`single`](Scheduler::single): one job at a time across every pipeline
//!   sharing the scheduler, so their callbacks never overlap.
//! - [`pool`](Scheduler::pool): at most `n` jobs at a time; waiting jobs
//!   queue without bound.
//! - [`pool_with_queue`](Scheduler::pool_with_queue): at most `n` jobs at a
//!   time and at most `capacity` waiting; admission beyond that is rejected
//!   with [`QueueFull`], which a pipeline surfaces as an error signal.
//! - [`parallel`](Scheduler::parallel): a pool sized to the number of
//!   available CPU cores.
//!
//! Schedulers are cheap to clone and clones share the same gate.
//!
//! ```rust
//! use millstream::{Flow, Scheduler};
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = Scheduler::pool(4);
//!     let doubled = Flow::from_iter(1..=10)
//!         .run_on(pool)
//!         .map(|n| n * 2)
//!         .collect()
//!         .await
//!         .unwrap();
//!     assert_eq!(doubled.len(), 10);
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Admission gate for pipeline work. See the module docs.
#[derive(Debug, Clone)]
pub struct Scheduler {
    lane: Lane,
}

#[derive(Debug, Clone)]
enum Lane {
    Immediate,
    Gated(Arc<Gate>),
}

#[derive(Debug)]
struct Gate {
    label: &'static str,
    workers: Semaphore,
    worker_count: usize,
    queue: Option<QueueSlots>,
}

#[derive(Debug)]
struct QueueSlots {
    slots: Semaphore,
    capacity: usize,
}

/// A capped scheduler refused a job because all workers were busy and the
/// wait queue was already at capacity.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("scheduler queue full (capacity {capacity})")]
pub struct QueueFull {
    /// The configured queue capacity that was exhausted.
    pub capacity: usize,
}

impl Scheduler {
    /// Run jobs inline on the calling task with no admission control.
    pub fn immediate() -> Self {
        Self { lane: Lane::Immediate }
    }

    /// Serialize jobs: one at a time across all pipelines sharing this
    /// scheduler, in admission order. Waiting jobs queue without bound.
    pub fn single() -> Self {
        Self::gated("single", 1, None)
    }

    /// Allow up to `workers` jobs at a time. Waiting jobs queue without
    /// bound.
    ///
    /// # Panics
    ///
    /// Panics if `workers` is zero.
    pub fn pool(workers: usize) -> Self {
        assert!(workers > 0, "pool requires at least one worker");
        Self::gated("pool", workers, None)
    }

    /// Like [`pool`](Self::pool), but with a bounded wait queue. A job that
    /// arrives while all workers are busy and `capacity` jobs are already
    /// waiting is rejected with [`QueueFull`].
    ///
    /// # Panics
    ///
    /// Panics if `workers` or `capacity` is zero.
    pub fn pool_with_queue(workers: usize, capacity: usize) -> Self {
        assert!(workers > 0, "pool requires at least one worker");
        assert!(capacity > 0, "queue capacity must be at least one slot");
        Self::gated("pool", workers, Some(capacity))
    }

    /// A pool sized to the number of CPU cores visible to this process.
    pub fn parallel() -> Self {
        let workers = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        Self::gated("parallel", workers, None)
    }

    fn gated(label: &'static str, workers: usize, capacity: Option<usize>) -> Self {
        Self {
            lane: Lane::Gated(Arc::new(Gate {
                label,
                workers: Semaphore::new(workers),
                worker_count: workers,
                queue: capacity.map(|capacity| QueueSlots {
                    slots: Semaphore::new(capacity),
                    capacity,
                }),
            })),
        }
    }

    /// The scheduler's kind: `"immediate"`, `"single"`, `"pool"`, or
    /// `"parallel"`.
    pub fn name(&self) -> &'static str {
        match &self.lane {
            Lane::Immediate => "immediate",
            Lane::Gated(gate) => gate.label,
        }
    }

    /// Maximum number of jobs that may run at once, or `None` when
    /// unrestricted.
    pub fn worker_limit(&self) -> Option<usize> {
        match &self.lane {
            Lane::Immediate => None,
            Lane::Gated(gate) => Some(gate.worker_count),
        }
    }

    /// The wait-queue bound, when one is configured.
    pub fn queue_capacity(&self) -> Option<usize> {
        match &self.lane {
            Lane::Immediate => None,
            Lane::Gated(gate) => gate.queue.as_ref().map(|queue| queue.capacity),
        }
    }

    /// Run one job under this scheduler's admission gate.
    ///
    /// The job executes on the calling task; the gate only controls when it
    /// may start. Holding the worker permit across the whole job is what
    /// bounds concurrency.
    pub(crate) async fn run<F: Future>(&self, job: F) -> Result<F::Output, QueueFull> {
        match &self.lane {
            Lane::Immediate => Ok(job.await),
            Lane::Gated(gate) => gate.admit(job).await,
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::immediate()
    }
}

impl Gate {
    async fn admit<F: Future>(&self, job: F) -> Result<F::Output, QueueFull> {
        if let Ok(_permit) = self.workers.try_acquire() {
            return Ok(job.await);
        }
        match &self.queue {
            None => match self.workers.acquire().await {
                Ok(_permit) => Ok(job.await),
                // Semaphore is never closed; treat a closed gate as ungated.
                Err(_) => Ok(job.await),
            },
            Some(queue) => {
                let Ok(slot) = queue.slots.try_acquire() else {
                    tracing::debug!(
                        lane = self.label,
                        capacity = queue.capacity,
                        "Scheduler queue full, rejecting job"
                    );
                    return Err(QueueFull { capacity: queue.capacity });
                };
                let permit = self.workers.acquire().await;
                drop(slot);
                match permit {
                    Ok(_permit) => Ok(job.await),
                    Err(_) => Ok(job.await),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn immediate_runs_inline() {
        let scheduler = Scheduler::immediate();
        let out = scheduler.run(async { 41 + 1 }).await;
        assert_eq!(out, Ok(42));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn single_never_overlaps_jobs() {
        let scheduler = Scheduler::single();
        let current = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let scheduler = scheduler.clone();
            let current = Arc::clone(&current);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                scheduler
                    .run(async {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("admitted");
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pool_bounds_concurrency_at_worker_count() {
        let scheduler = Scheduler::pool(2);
        let current = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let scheduler = scheduler.clone();
            let current = Arc::clone(&current);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                scheduler
                    .run(async {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("admitted");
        }

        let peak = max_seen.load(Ordering::SeqCst);
        assert!(peak <= 2, "saw {peak} concurrent jobs on a pool of 2");
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn capped_queue_rejects_overflow() {
        let scheduler = Scheduler::pool_with_queue(1, 1);
        let (hold_tx, hold_rx) = tokio::sync::oneshot::channel::<()>();

        // First job occupies the only worker until released.
        let busy = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                scheduler
                    .run(async {
                        let _ = hold_rx.await;
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        // Second job fills the single queue slot.
        let queued = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run(async {}).await })
        };
        tokio::task::yield_now().await;

        // Third job has nowhere to go.
        let rejected = scheduler.run(async {}).await;
        assert_eq!(rejected, Err(QueueFull { capacity: 1 }));

        hold_tx.send(()).expect("release");
        busy.await.expect("join").expect("admitted");
        queued.await.expect("join").expect("admitted");

        // With the gate drained, admission works again.
        assert_eq!(scheduler.run(async { 7 }).await, Ok(7));
    }

    #[test]
    fn accessors_report_configuration() {
        assert_eq!(Scheduler::immediate().name(), "immediate");
        assert_eq!(Scheduler::immediate().worker_limit(), None);
        assert_eq!(Scheduler::immediate().queue_capacity(), None);

        assert_eq!(Scheduler::single().name(), "single");
        assert_eq!(Scheduler::single().worker_limit(), Some(1));

        let pool = Scheduler::pool_with_queue(3, 16);
        assert_eq!(pool.name(), "pool");
        assert_eq!(pool.worker_limit(), Some(3));
        assert_eq!(pool.queue_capacity(), Some(16));

        let parallel = Scheduler::parallel();
        assert_eq!(parallel.name(), "parallel");
        assert!(parallel.worker_limit().unwrap() >= 1);
    }

    #[test]
    fn clones_share_the_gate() {
        let scheduler = Scheduler::pool(2);
        let clone = scheduler.clone();
        assert_eq!(clone.worker_limit(), Some(2));
        match (&scheduler.lane, &clone.lane) {
            (Lane::Gated(a), Lane::Gated(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected gated lanes"),
        }
    }

    #[test]
    #[should_panic(expected = "at least one worker")]
    fn zero_worker_pool_panics() {
        let _ = Scheduler::pool(0);
    }

    #[test]
    #[should_panic(expected = "at least one slot")]
    fn zero_capacity_queue_panics() {
        let _ = Scheduler::pool_with_queue(1, 0);
    }
}
