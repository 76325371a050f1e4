//! Error types for reactive pipelines
use std::fmt;
use std::sync::Arc;

/// Classifies where in a pipeline a failure originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The upstream producer failed while generating items.
    Source,
    /// A fallible transform failed mid-chain.
    Operator,
    /// The signal protocol was violated. Fatal; never retried.
    Protocol,
}

/// Terminal error carried by an error signal.
///
/// Cheap to clone: retry bookkeeping, fallback combinators, and the
/// dropped-error hook may all hold the same failure without duplicating the
/// underlying cause.
#[derive(Debug, Clone)]
pub struct Failure {
    kind: FailureKind,
    inner: Arc<dyn std::error::Error + Send + Sync + 'static>,
}

/// Production failure built from a bare message.
#[derive(thiserror::Error, Debug)]
#[error("{0}")]
struct Message(String);

impl Failure {
    /// Wrap a causal error as an upstream production failure.
    pub fn source(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self { kind: FailureKind::Source, inner: Arc::new(err) }
    }

    /// Wrap a causal error as an operator-local failure.
    pub fn operator(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self { kind: FailureKind::Operator, inner: Arc::new(err) }
    }

    /// Production failure from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::Source, inner: Arc::new(Message(message.into())) }
    }

    /// Record a protocol violation. Violations terminate the sequence and are
    /// exempt from retry.
    pub fn protocol(violation: ProtocolViolation) -> Self {
        Self { kind: FailureKind::Protocol, inner: Arc::new(violation) }
    }

    /// Where the failure originated.
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Check if this failure came from the upstream producer.
    pub fn is_source(&self) -> bool {
        self.kind == FailureKind::Source
    }

    /// Check if this failure came from a fallible transform.
    pub fn is_operator(&self) -> bool {
        self.kind == FailureKind::Operator
    }

    /// Check if this failure is a protocol violation.
    pub fn is_protocol(&self) -> bool {
        self.kind == FailureKind::Protocol
    }

    /// Borrow the underlying cause.
    pub fn cause(&self) -> &(dyn std::error::Error + 'static) {
        let inner: &(dyn std::error::Error + 'static) = &*self.inner;
        inner
    }

    /// Downcast the underlying cause to a concrete error type.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.cause().downcast_ref::<E>()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause())
    }
}

impl From<ProtocolViolation> for Failure {
    fn from(violation: ProtocolViolation) -> Self {
        Failure::protocol(violation)
    }
}

/// Breaches of the signal protocol.
///
/// These indicate a programming error in a producer, not a transient
/// condition, so retry policies refuse to retry them.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolViolation {
    /// An item was delivered with zero outstanding demand.
    #[error("demand overrun: item delivered with no outstanding demand")]
    DemandOverrun,
    /// A signal arrived after Error or Complete already ended the sequence.
    #[error("signal after terminal: sequence already ended")]
    SignalAfterTerminal,
    /// A second subscriber attached to a single-subscriber sequence.
    #[error("already subscribed: unicast sources accept one subscriber")]
    AlreadySubscribed,
}

/// Errors returned by the push-side emitter of a unicast sequence.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum EmitError {
    /// No subscriber is attached yet.
    #[error("no subscriber attached")]
    NotSubscribed,
    /// The subscriber cancelled; the emitter should stop producing.
    #[error("subscriber cancelled")]
    Cancelled,
    /// The sequence already carried a terminal signal.
    #[error("sequence already terminated")]
    Terminated,
    /// The push outran granted demand; the sequence has been failed.
    #[error("demand overrun")]
    Overrun,
}

/// Errors surfaced by persistence adapters.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RepoError {
    /// Insert attempted with an id that already exists.
    #[error("duplicate id: {0}")]
    DuplicateId(String),
}
