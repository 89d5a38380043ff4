//! Reconnection policy with exponential backoff and jitter, shared by the
//! three event-stream workers (orders, positions, quotes).

use std::time::{Duration, Instant};

use rand::Rng;

/// Reconnection policy: exponential backoff capped at `max_backoff`, with
/// +/-20% jitter applied to the capped value.
#[derive(Debug)]
pub struct ReconnectPolicy {
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    current_attempt: u32,
    last_attempt: Option<Instant>,
}

impl ReconnectPolicy {
    /// Builds a policy with the spec defaults: 1s initial, 30s cap, 2.0
    /// multiplier.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_params(Duration::from_secs(1), Duration::from_secs(30), 2.0)
    }

    /// Builds a policy with custom parameters.
    #[must_use]
    pub const fn with_params(initial_backoff: Duration, max_backoff: Duration, multiplier: f64) -> Self {
        Self {
            initial_backoff,
            max_backoff,
            multiplier,
            current_attempt: 0,
            last_attempt: None,
        }
    }

    /// Computes the next backoff duration with +/-20% jitter. Reconnection
    /// is unbounded: this never returns `None`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn next_backoff(&mut self) -> Duration {
        let base_ms = self.initial_backoff.as_millis() as f64;
        let exponential = base_ms * self.multiplier.powi(i32::try_from(self.current_attempt).unwrap_or(i32::MAX));
        let capped = exponential.min(self.max_backoff.as_millis() as f64);

        let jitter_factor = rand::rng().random_range(0.8..=1.2);
        let jittered = (capped * jitter_factor).max(0.0);

        self.current_attempt += 1;
        self.last_attempt = Some(Instant::now());

        Duration::from_millis(jittered as u64)
    }

    /// Resets the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.current_attempt = 0;
        self.last_attempt = None;
    }

    /// Current attempt count since the last reset.
    #[must_use]
    pub const fn current_attempt(&self) -> u32 {
        self.current_attempt
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_stays_within_jitter_band_of_cap() {
        let mut policy =
            ReconnectPolicy::with_params(Duration::from_secs(1), Duration::from_secs(30), 2.0);
        for _ in 0..10 {
            let backoff = policy.next_backoff();
            assert!(backoff <= Duration::from_millis(36_000));
        }
    }

    #[test]
    fn reset_zeroes_attempt_counter() {
        let mut policy = ReconnectPolicy::new();
        let _ = policy.next_backoff();
        let _ = policy.next_backoff();
        assert_eq!(policy.current_attempt(), 2);
        policy.reset();
        assert_eq!(policy.current_attempt(), 0);
    }

    #[test]
    fn first_backoff_is_near_initial() {
        let mut policy =
            ReconnectPolicy::with_params(Duration::from_millis(100), Duration::from_secs(10), 2.0);
        let first = policy.next_backoff();
        assert!(first >= Duration::from_millis(80));
        assert!(first <= Duration::from_millis(120));
    }
}
