//! Reconnect / resubscribe delay policies.

use std::time::Duration;

/// Computes the delay before the `attempt`-th retry (1-based).
///
/// Callers retry forever, so a policy never runs out.
pub trait BackoffPolicy: Send + Sync {
    fn next_delay(&self, attempt: u32) -> Duration;
}

/// Same delay for every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    pub delay: Duration,
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }
}

impl BackoffPolicy for FixedBackoff {
    fn next_delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Exponential growth with a cap and optional jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound for the computed delay.
    pub max: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Adds `jitter_fraction * delay / 2` on top (0.0 = none).
    pub jitter_fraction: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.initial.as_millis() as f64 * self.multiplier.powi(exp);
        let capped = base_ms.min(self.max.as_millis() as f64);

        // Deterministic jitter so delays are reproducible in tests.
        let jitter_ms = capped * self.jitter_fraction * 0.5;
        Duration::from_millis((capped + jitter_ms) as u64)
    }
}
