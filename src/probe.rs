//! Scripted verification of flow behavior, for tests.
//!
//! A [`FlowProbe`] records an expected signal script, then
//! [`verify`](FlowProbe::verify) subscribes with unbounded demand and checks
//! the live sequence against it step by step, panicking with the failing
//! step index on the first divergence. After an expected error it polls once
//! more and fails if any signal follows the terminal.
//!
//! ```rust
//! use millstream::{Flow, FlowProbe};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! FlowProbe::new(Flow::range(1, 3))
//!     .expect_next(1)
//!     .expect_next(2)
//!     .expect_next(3)
//!     .expect_complete()
//!     .verify()
//!     .await;
//! # });
//! ```

use crate::error::Failure;
use crate::flow::Flow;
use futures::StreamExt;
use std::time::Duration;

enum Step<T> {
    Item {
        expectation: String,
        matches: Box<dyn FnOnce(&T) -> bool + Send>,
    },
    Error {
        expectation: String,
        matches: Box<dyn FnOnce(&Failure) -> bool + Send>,
    },
    Complete,
    Silence(Duration),
}

/// Step-by-step assertion harness for a [`Flow`].
pub struct FlowProbe<T> {
    flow: Flow<T>,
    steps: Vec<Step<T>>,
}

impl<T> std::fmt::Debug for FlowProbe<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowProbe").field("steps", &self.steps.len()).finish()
    }
}

impl<T: Send + 'static> FlowProbe<T> {
    pub fn new(flow: Flow<T>) -> Self {
        Self { flow, steps: Vec::new() }
    }

    /// Expect the next signal to be exactly this item.
    pub fn expect_next(mut self, item: T) -> Self
    where
        T: PartialEq + std::fmt::Debug,
    {
        self.steps.push(Step::Item {
            expectation: format!("item {item:?}"),
            matches: Box::new(move |got| *got == item),
        });
        self
    }

    /// Expect the next signal to be an item accepted by `predicate`.
    pub fn expect_next_matches<F>(mut self, predicate: F) -> Self
    where
        F: FnOnce(&T) -> bool + Send + 'static,
    {
        self.steps.push(Step::Item {
            expectation: "a matching item".to_string(),
            matches: Box::new(predicate),
        });
        self
    }

    /// Expect the sequence to fail next, with any failure.
    pub fn expect_error(mut self) -> Self {
        self.steps.push(Step::Error {
            expectation: "a failure".to_string(),
            matches: Box::new(|_| true),
        });
        self
    }

    /// Expect the sequence to fail next with a failure accepted by
    /// `predicate`.
    pub fn expect_error_matches<F>(mut self, predicate: F) -> Self
    where
        F: FnOnce(&Failure) -> bool + Send + 'static,
    {
        self.steps.push(Step::Error {
            expectation: "a matching failure".to_string(),
            matches: Box::new(predicate),
        });
        self
    }

    /// Expect the sequence to fail next with exactly this display message.
    pub fn expect_error_message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.steps.push(Step::Error {
            expectation: format!("a failure with message {message:?}"),
            matches: Box::new(move |failure| failure.to_string() == message),
        });
        self
    }

    /// Expect the sequence to complete next.
    pub fn expect_complete(mut self) -> Self {
        self.steps.push(Step::Complete);
        self
    }

    /// Expect no signal at all for the given window. Runs on the tokio
    /// clock, so paused-clock tests pass through the window instantly.
    pub fn expect_no_signal_for(mut self, window: Duration) -> Self {
        self.steps.push(Step::Silence(window));
        self
    }
}

impl<T: Send + std::fmt::Debug + 'static> FlowProbe<T> {
    /// Subscribe with unbounded demand and check the script.
    ///
    /// Panics on the first divergence, naming the zero-based step index.
    pub async fn verify(self) {
        let mut stream = self.flow.into_stream();
        let mut terminated = false;
        for (index, step) in self.steps.into_iter().enumerate() {
            if terminated {
                panic!("step {index}: expectation after a terminal step");
            }
            match step {
                Step::Item { expectation, matches } => match stream.next().await {
                    Some(Ok(item)) => {
                        if !matches(&item) {
                            panic!("step {index}: expected {expectation}, got item {item:?}");
                        }
                    }
                    other => {
                        panic!(
                            "step {index}: expected {expectation}, got {}",
                            describe(&other)
                        )
                    }
                },
                Step::Error { expectation, matches } => {
                    match stream.next().await {
                        Some(Err(failure)) => {
                            if !matches(&failure) {
                                panic!(
                                    "step {index}: expected {expectation}, got failure \"{failure}\""
                                );
                            }
                        }
                        other => {
                            panic!(
                                "step {index}: expected {expectation}, got {}",
                                describe(&other)
                            )
                        }
                    }
                    // An error is terminal; nothing may follow it.
                    let trailing = stream.next().await;
                    if trailing.is_some() {
                        panic!(
                            "step {index}: {} arrived after the error terminal",
                            describe(&trailing)
                        );
                    }
                    terminated = true;
                }
                Step::Complete => {
                    let signal = stream.next().await;
                    if signal.is_some() {
                        panic!("step {index}: expected completion, got {}", describe(&signal));
                    }
                    terminated = true;
                }
                Step::Silence(window) => {
                    if let Ok(signal) = tokio::time::timeout(window, stream.next()).await {
                        panic!(
                            "step {index}: expected no signal for {window:?}, got {}",
                            describe(&signal)
                        );
                    }
                }
            }
        }
    }
}

fn describe<T: std::fmt::Debug>(signal: &Option<Result<T, Failure>>) -> String {
    match signal {
        Some(Ok(item)) => format!("item {item:?}"),
        Some(Err(failure)) => format!("failure \"{failure}\""),
        None => "completion".to_string(),
    }
}
