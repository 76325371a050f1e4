#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Millstream 🌊
//!
//! Pull-based reactive pipelines for Rust: cold flows, demand-driven
//! backpressure, retry over re-subscription, and scheduler admission gates.
//!
//! ## Features
//!
//! - **Cold sequences** with [`Flow`] (zero or more items) and [`Maybe`]
//!   (zero or one), restarted per subscriber
//! - **Demand-driven delivery**: subscribers request, producers honor it,
//!   hot sources fail fast on overrun
//! - **Operator inventory** for transforming, slicing, combining,
//!   collecting, recovering, and timing sequences
//! - **Retry policies** over cold re-subscription with backoff and jitter
//! - **Schedulers** as admission gates (immediate, single, pool, parallel)
//! - **Step verification** of live sequences with [`FlowProbe`]
//! - **CRUD transport** over an in-memory repository as a tower service
//!
//! ## Quick Start
//!
//! ```rust
//! use millstream::Flow;
//!
//! #[tokio::main]
//! async fn main() {
//!     let doubled = Flow::range(1, 5)
//!         .map(|n| n * 2)
//!         .filter(|n| *n > 4)
//!         .collect()
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(doubled, vec![6, 8, 10]);
//! }
//! ```

pub mod backoff;
pub mod error;
pub mod flow;
pub mod hooks;
pub mod hot;
pub mod jitter;
pub mod maybe;
mod ops;
pub mod prelude;
pub mod probe;
pub mod repo;
pub mod rest;
pub mod retry;
pub mod scheduler;
pub mod signal;
pub mod subscription;
pub mod timer;

// Re-exports
pub use backoff::{Backoff, BackoffError, MAX_BACKOFF};
pub use error::{EmitError, Failure, FailureKind, ProtocolViolation, RepoError};
pub use flow::{Flow, Outlet, Subscriber};
pub use hooks::{on_dropped_error, reset_dropped_error};
pub use hot::{unicast, Emitter};
pub use jitter::Jitter;
pub use maybe::Maybe;
pub use probe::FlowProbe;
pub use repo::{MemoryRepository, Repository, User};
pub use rest::{CrudService, Request, Response, Status};
pub use retry::{Retry, RetrySignal};
pub use scheduler::{QueueFull, Scheduler};
pub use signal::{Disposition, Signal};
pub use subscription::{Disposable, Subscription};
pub use timer::{Timer, TokioTimer, TrackingTimer};
