//! Backoff strategies for spacing retry attempts.
//!
//! A strategy maps a retry index to a wait duration. Index `0` is the
//! initial attempt and never waits; retries start at index `1`. Every
//! strategy saturates at its configured ceiling and at [`MAX_BACKOFF`], so
//! the arithmetic cannot overflow however many retries accumulate.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use millstream::Backoff;
//!
//! let backoff = Backoff::exponential(
//!     Duration::from_millis(100),
//!     Duration::from_secs(2),
//! )?;
//! assert_eq!(backoff.delay_for(0), Duration::ZERO); // initial attempt
//! assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
//! assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
//! assert_eq!(backoff.delay_for(6), Duration::from_secs(2)); // capped
//! # Ok::<(), millstream::BackoffError>(())
//! ```

use std::time::Duration;

/// Hard ceiling on any computed delay (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// How long to wait before each retry attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The same delay before every retry.
    Constant { delay: Duration },
    /// Delay grows linearly with the retry index, capped at `max`.
    Linear { base: Duration, max: Duration },
    /// Delay doubles with each retry, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

/// Rejected backoff configuration.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum BackoffError {
    #[error("backoff base must be greater than zero")]
    ZeroBase,
    #[error("backoff max must be greater than zero")]
    ZeroMax,
    #[error("backoff max {max:?} must not be less than base {base:?}")]
    MaxLessThanBase { base: Duration, max: Duration },
}

impl Backoff {
    /// Wait the same `delay` before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self::Constant { delay }
    }

    /// Wait `base * attempt`, capped at `max`.
    pub fn linear(base: Duration, max: Duration) -> Result<Self, BackoffError> {
        Self::validate(base, max)?;
        Ok(Self::Linear { base, max })
    }

    /// Wait `base * 2^(attempt - 1)`, capped at `max`.
    pub fn exponential(base: Duration, max: Duration) -> Result<Self, BackoffError> {
        Self::validate(base, max)?;
        Ok(Self::Exponential { base, max })
    }

    fn validate(base: Duration, max: Duration) -> Result<(), BackoffError> {
        if base.is_zero() {
            return Err(BackoffError::ZeroBase);
        }
        if max.is_zero() {
            return Err(BackoffError::ZeroMax);
        }
        if max < base {
            return Err(BackoffError::MaxLessThanBase { base, max });
        }
        Ok(())
    }

    /// Delay before the given attempt (0-based; 0 = initial attempt, no delay).
    pub fn delay_for(&self, attempt: u64) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay = match self {
            Self::Constant { delay } => *delay,
            Self::Linear { base, max } => {
                let factor = u32::try_from(attempt).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(*max)
            }
            Self::Exponential { base, max } => {
                // Exact in nanoseconds so a tiny base still doubles
                // precisely instead of jumping to the cap.
                let exponent = u32::try_from(attempt - 1).unwrap_or(u32::MAX);
                let factor = 2u128.saturating_pow(exponent);
                let nanos = base.as_nanos().saturating_mul(factor);
                Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64).min(*max)
            }
        };
        delay.min(MAX_BACKOFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_attempt_never_waits() {
        let strategies = [
            Backoff::constant(Duration::from_secs(1)),
            Backoff::linear(Duration::from_secs(1), Duration::from_secs(10)).unwrap(),
            Backoff::exponential(Duration::from_secs(1), Duration::from_secs(10)).unwrap(),
        ];
        for backoff in strategies {
            assert_eq!(backoff.delay_for(0), Duration::ZERO);
        }
    }

    #[test]
    fn constant_returns_same_delay() {
        let backoff = Backoff::constant(Duration::from_millis(500));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(100), Duration::from_millis(500));
    }

    #[test]
    fn linear_increases_then_caps() {
        let backoff =
            Backoff::linear(Duration::from_millis(100), Duration::from_millis(350)).unwrap();
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(300));
        assert_eq!(backoff.delay_for(4), Duration::from_millis(350));
        assert_eq!(backoff.delay_for(u64::MAX), Duration::from_millis(350));
    }

    #[test]
    fn exponential_doubles_each_time() {
        let backoff =
            Backoff::exponential(Duration::from_millis(100), Duration::from_secs(60)).unwrap();
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100)); // 100 * 2^0
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200)); // 100 * 2^1
        assert_eq!(backoff.delay_for(3), Duration::from_millis(400)); // 100 * 2^2
        assert_eq!(backoff.delay_for(4), Duration::from_millis(800)); // 100 * 2^3
    }

    #[test]
    fn exponential_respects_max() {
        let backoff =
            Backoff::exponential(Duration::from_millis(100), Duration::from_secs(1)).unwrap();
        assert_eq!(backoff.delay_for(4), Duration::from_millis(800));
        assert_eq!(backoff.delay_for(5), Duration::from_secs(1)); // capped
        assert_eq!(backoff.delay_for(10), Duration::from_secs(1)); // still capped
    }

    #[test]
    fn tiny_base_doubles_exactly_past_u32_factors() {
        let backoff = Backoff::exponential(Duration::from_nanos(1), MAX_BACKOFF).unwrap();
        assert_eq!(backoff.delay_for(33), Duration::from_nanos(1 << 32));
    }

    #[test]
    fn huge_attempt_saturates() {
        let backoff = Backoff::exponential(Duration::from_secs(2), MAX_BACKOFF).unwrap();
        assert_eq!(backoff.delay_for(1_000_000_000), MAX_BACKOFF);

        let backoff = Backoff::linear(Duration::from_secs(u64::MAX / 2), MAX_BACKOFF).unwrap();
        assert_eq!(backoff.delay_for(1_000_000_000), MAX_BACKOFF);
    }

    #[test]
    fn constant_is_clamped_to_max_backoff() {
        let backoff = Backoff::constant(Duration::from_secs(1_000_000));
        assert_eq!(backoff.delay_for(1), MAX_BACKOFF);
    }

    #[test]
    fn zero_base_is_rejected() {
        assert_eq!(
            Backoff::linear(Duration::ZERO, Duration::from_secs(1)),
            Err(BackoffError::ZeroBase)
        );
        assert_eq!(
            Backoff::exponential(Duration::ZERO, Duration::from_secs(1)),
            Err(BackoffError::ZeroBase)
        );
    }

    #[test]
    fn zero_max_is_rejected() {
        assert_eq!(
            Backoff::exponential(Duration::from_secs(1), Duration::ZERO),
            Err(BackoffError::ZeroMax)
        );
    }

    #[test]
    fn max_below_base_is_rejected() {
        let err = Backoff::linear(Duration::from_secs(100), Duration::from_secs(50)).unwrap_err();
        assert_eq!(
            err,
            BackoffError::MaxLessThanBase {
                base: Duration::from_secs(100),
                max: Duration::from_secs(50),
            }
        );
    }
}
