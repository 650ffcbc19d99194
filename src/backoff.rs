//! Retry delay computation: exponential growth, jitter, and a ceiling.

use std::time::Duration;

use rand::Rng;

use crate::config::{StreamConfig, DEFAULT_JITTER_FRAC};

/// Exponent cap so the shift below cannot overflow; the ceiling applies
/// long before this matters for any realistic configuration.
const MAX_EXPONENT: u32 = 32;

/// Computes retry delays as `min(base * 2^attempt, max) + jitter`.
///
/// Jitter is a uniformly random fraction of the computed (capped) value,
/// redrawn on every call so that a fleet of clients does not retry in
/// lockstep.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
    jitter_frac: f64,
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_frac: DEFAULT_JITTER_FRAC,
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.base_delay, config.max_delay).with_jitter_frac(config.jitter_frac)
    }

    pub fn with_jitter_frac(mut self, jitter_frac: f64) -> Self {
        self.jitter_frac = jitter_frac.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;

        let scaled = base_ms.saturating_mul(1u64 << attempt.min(MAX_EXPONENT));
        let capped = scaled.min(max_ms);

        let jitter_span = (capped as f64 * self.jitter_frac) as u64;
        let jitter = if jitter_span == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..jitter_span)
        };

        Duration::from_millis(capped + jitter)
    }
}
