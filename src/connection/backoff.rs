//! Exponential reconnect backoff with jitter

use std::time::Duration;

use rand::Rng;

use crate::config::ConnectionConfig;

/// Largest usable jitter; anything above would allow a zero or negative factor
const MAX_JITTER: f64 = 0.99;

/// Reconnect delay policy: `min(base * 2^n, max) * U[1 - jitter, 1 + jitter]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

impl From<&ConnectionConfig> for BackoffPolicy {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            max_attempts: config.max_attempts,
            jitter: config.jitter,
        }
    }
}

impl BackoffPolicy {
    /// Delay before capping and jitter, in milliseconds
    pub fn capped_delay_ms(&self, attempt: u32) -> u64 {
        std::cmp::min(
            self.base_delay_ms
                .saturating_mul(2u64.saturating_pow(attempt)),
            self.max_delay_ms,
        )
    }

    /// Delay before retry number `attempt` (0-based).
    /// The jitter factor is drawn fresh on every call.
    pub fn delay(&self, attempt: u32) -> Duration {
        let capped = self.capped_delay_ms(attempt) as f64;
        let jitter = self.effective_jitter();
        let factor = if jitter > 0.0 {
            rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter))
        } else {
            1.0
        };
        Duration::from_secs_f64((capped * factor).max(0.0) / 1000.0)
    }

    /// Jitter clamped into `[0, MAX_JITTER]`; non-finite values disable it
    pub fn effective_jitter(&self) -> f64 {
        if self.jitter.is_finite() {
            self.jitter.clamp(0.0, MAX_JITTER)
        } else {
            0.0
        }
    }

    /// Whether `failed_attempts` consecutive failures exhaust the policy
    pub fn is_exhausted(&self, failed_attempts: u32) -> bool {
        failed_attempts >= self.max_attempts
    }
}
