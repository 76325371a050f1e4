//! Convenient re-exports for common Millstream types.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_BACKOFF},
    error::{EmitError, Failure, FailureKind, ProtocolViolation, RepoError},
    flow::{Flow, Outlet, Subscriber},
    hooks::{on_dropped_error, reset_dropped_error},
    hot::{unicast, Emitter},
    jitter::Jitter,
    maybe::Maybe,
    probe::FlowProbe,
    repo::{MemoryRepository, Repository, User},
    rest::{CrudService, Request, Response, Status},
    retry::{Retry, RetrySignal},
    scheduler::{QueueFull, Scheduler},
    signal::{Disposition, Signal},
    subscription::{Disposable, Subscription},
    timer::{Timer, TokioTimer, TrackingTimer},
};
