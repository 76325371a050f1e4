//! The three-valued event model flowing from producer to consumer.

use crate::error::Failure;

/// A single event in a sequence.
///
/// A sequence is any number of [`Signal::Next`] events followed by exactly one
/// terminal signal, either [`Signal::Error`] or [`Signal::Complete`]. Nothing
/// follows a terminal signal.
#[derive(Debug, Clone)]
pub enum Signal<T> {
    /// An item.
    Next(T),
    /// Terminal failure.
    Error(Failure),
    /// Terminal success.
    Complete,
}

impl<T> Signal<T> {
    /// Check if this signal carries an item.
    pub fn is_next(&self) -> bool {
        matches!(self, Self::Next(_))
    }

    /// Check if this signal is a terminal failure.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Check if this signal is a terminal success.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Check if this signal ends the sequence.
    pub fn is_terminal(&self) -> bool {
        !self.is_next()
    }

    /// Borrow the item if this is a `Next` signal.
    pub fn item(&self) -> Option<&T> {
        match self {
            Self::Next(item) => Some(item),
            _ => None,
        }
    }

    /// Extract the item if this is a `Next` signal.
    pub fn into_item(self) -> Option<T> {
        match self {
            Self::Next(item) => Some(item),
            _ => None,
        }
    }

    /// Borrow the failure if this is an `Error` signal.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Error(failure) => Some(failure),
            _ => None,
        }
    }

    /// Transform the carried item, leaving terminal signals untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Signal<U> {
        match self {
            Self::Next(item) => Signal::Next(f(item)),
            Self::Error(failure) => Signal::Error(failure),
            Self::Complete => Signal::Complete,
        }
    }
}

/// How a subscription ended.
///
/// Passed to [`do_finally`](crate::flow::Flow::do_finally) callbacks and
/// returned by [`Disposable::join`](crate::subscription::Disposable::join).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The sequence delivered `Complete`.
    Completed,
    /// The sequence delivered `Error`.
    Errored,
    /// The subscriber cancelled before any terminal signal.
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_classify_variants() {
        let next: Signal<u32> = Signal::Next(7);
        assert!(next.is_next());
        assert!(!next.is_terminal());

        let error: Signal<u32> = Signal::Error(Failure::msg("boom"));
        assert!(error.is_error());
        assert!(error.is_terminal());

        let complete: Signal<u32> = Signal::Complete;
        assert!(complete.is_complete());
        assert!(complete.is_terminal());
    }

    #[test]
    fn item_accessors() {
        let next = Signal::Next("a");
        assert_eq!(next.item(), Some(&"a"));
        assert_eq!(next.into_item(), Some("a"));
        assert_eq!(Signal::<&str>::Complete.into_item(), None);
    }

    #[test]
    fn failure_accessor_only_on_error() {
        let error: Signal<u32> = Signal::Error(Failure::msg("bad"));
        assert_eq!(error.failure().map(|f| f.to_string()), Some("bad".to_string()));
        assert!(Signal::Next(1).failure().is_none());
    }

    #[test]
    fn map_transforms_items_and_preserves_terminals() {
        assert_eq!(Signal::Next(2).map(|n| n * 10).into_item(), Some(20));
        assert!(Signal::<u32>::Complete.map(|n| n * 10).is_complete());
        let mapped = Signal::<u32>::Error(Failure::msg("oops")).map(|n| n * 10);
        assert!(mapped.is_error());
    }
}
