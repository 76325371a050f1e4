//! Jitter strategies for de-synchronizing retry storms.
//!
//! Applied on top of a [`Backoff`](crate::Backoff) delay so that many
//! pipelines retrying against the same failed source do not wake in
//! lockstep.
//!
//! - `None`: deterministic delays, the right choice for tests.
//! - `Full`: uniform in `[0, delay]`, spreads load the widest.
//! - `Equal`: uniform in `[delay/2, delay]`, keeps a floor under the wait.
//!
//! Uses the `rand` thread-local RNG; a deterministic RNG can be injected
//! through `apply_with_rng`. Millisecond conversions saturate rather than
//! panic on absurd durations.

use rand::{rng, Rng};
use std::time::Duration;

/// Randomization applied to each retry delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Jitter {
    /// Use the exact backoff delay.
    #[default]
    None,
    /// Random between zero and the delay.
    Full,
    /// Random between half the delay and the delay.
    Equal,
}

impl Jitter {
    /// Randomize `delay` with the thread-local RNG.
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rng();
        self.apply_with_rng(delay, &mut rng)
    }

    /// Randomize `delay` with a caller-supplied RNG (for testing).
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let millis = as_millis_saturated(delay);
        match self {
            Jitter::None => delay,
            Jitter::Full if millis == 0 => Duration::ZERO,
            Jitter::Full => Duration::from_millis(rng.random_range(0..=millis)),
            Jitter::Equal if millis == 0 => Duration::ZERO,
            Jitter::Equal => Duration::from_millis(rng.random_range(millis / 2..=millis)),
        }
    }
}

fn as_millis_saturated(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}
