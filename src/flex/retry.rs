//! Poll retry/backoff state — exponential backoff with jitter and
//! code-specific floors (`spec.md` §4.2).
//!
//! Grounded in the teacher's `scrapers::binance_session::BackoffState`
//! (`next_backoff`: exponential base, multiplicative cap, jitter factor),
//! generalized here to take the triggering error code so a larger
//! code-specific floor (1009/1018/1019) can override the exponential
//! schedule, and to use a uniform jitter multiplier range rather than a
//! symmetric ± factor, per the spec's `U(jitter_min, jitter_max)` formula.

use super::codes::{retry_floor, Code};
use crate::config::RetryTuning;
use rand::Rng;
use std::time::Duration;

pub struct BackoffState<'a> {
    tuning: &'a RetryTuning,
    attempt: u32,
}

impl<'a> BackoffState<'a> {
    pub fn new(tuning: &'a RetryTuning) -> Self {
        Self { tuning, attempt: 0 }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// `delay = max(floor_for_error_code, clamp(base * 2^attempt, 0, max)) * U(jitter_min, jitter_max)`.
    /// Advances the internal attempt counter.
    pub fn next_delay(&mut self, triggering_code: Code) -> Duration {
        let attempt = self.attempt;
        self.attempt += 1;

        let exponential = self
            .tuning
            .backoff_base
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
            .min(self.tuning.backoff_max);
        let floor = retry_floor(triggering_code);
        let base_delay = exponential.max(floor);

        let jitter = rand::thread_rng()
            .gen_range(self.tuning.jitter_min_multiplier..=self.tuning.jitter_max_multiplier);
        base_delay.mul_f64(jitter)
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.tuning.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuning() -> RetryTuning {
        RetryTuning {
            initial_wait: Duration::from_secs(1),
            max_attempts: 3,
            backoff_base: Duration::from_secs(10),
            backoff_max: Duration::from_secs(60),
            jitter_min_multiplier: 1.0,
            jitter_max_multiplier: 1.0,
        }
    }

    #[test]
    fn delay_grows_exponentially_up_to_cap() {
        let tuning = tuning();
        let mut backoff = BackoffState::new(&tuning);
        assert_eq!(backoff.next_delay(Code(0)), Duration::from_secs(10));
        assert_eq!(backoff.next_delay(Code(0)), Duration::from_secs(20));
        assert_eq!(backoff.next_delay(Code(0)), Duration::from_secs(40));
        assert_eq!(backoff.next_delay(Code(0)), Duration::from_secs(60));
    }

    #[test]
    fn code_specific_floor_overrides_small_exponential_delay() {
        let tuning = tuning();
        let mut backoff = BackoffState::new(&tuning);
        // attempt 0 => exponential = base = 10s, but 1018's floor is 30s.
        assert_eq!(backoff.next_delay(super::super::codes::RATE_LIMITED), Duration::from_secs(30));
    }

    #[test]
    fn exhausted_after_max_attempts() {
        let tuning = tuning();
        let mut backoff = BackoffState::new(&tuning);
        assert!(!backoff.exhausted());
        for _ in 0..3 {
            backoff.next_delay(Code(0));
        }
        assert!(backoff.exhausted());
    }
}
