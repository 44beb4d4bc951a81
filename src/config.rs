//! Configuration for the connection manager and event processor

use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::types::{SyncError, SyncResult};

/// Reconnect policy for the [`ConnectionManager`](crate::connection::ConnectionManager)
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff before jitter (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Consecutive failed retries before giving up with `failed`
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Jitter factor is drawn from `[1 - jitter, 1 + jitter]`
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            jitter: default_jitter(),
        }
    }
}

/// Dedup, gap tracking and batching for the [`EventProcessor`](crate::processor::EventProcessor)
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProcessorConfig {
    /// Quiet period after the last event before a batch is flushed (unit: milliseconds)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Maximum number of remembered event ids
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    /// How many of the oldest ids are dropped at once when the set is full
    #[serde(default = "default_dedup_evict_batch")]
    pub dedup_evict_batch: usize,

    /// Maximum number of entities whose last sequence is tracked
    #[serde(default = "default_dedup_capacity")]
    pub sequence_capacity: usize,

    /// Force a flush once this many events are buffered (unset: only the quiet period flushes)
    #[serde(default)]
    pub max_batch_size: Option<usize>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            dedup_capacity: default_dedup_capacity(),
            dedup_evict_batch: default_dedup_evict_batch(),
            sequence_capacity: default_dedup_capacity(),
            max_batch_size: None,
        }
    }
}

impl ProcessorConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SyncConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
}

impl SyncConfig {
    /// Create from environment variables on top of the defaults
    ///
    /// Environment:
    /// - REALTIME_BASE_DELAY_MS: backoff base (default 1000)
    /// - REALTIME_MAX_DELAY_MS: backoff cap (default 30000)
    /// - REALTIME_MAX_ATTEMPTS: retries before `failed` (default 10)
    /// - REALTIME_DEBOUNCE_MS: batch quiet period (default 300)
    /// - REALTIME_DEDUP_CAPACITY: remembered event ids (default 1000, evicts half when full)
    ///
    /// Values that do not parse are ignored with a warning.
    pub fn from_env() -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(ms) = env_parse("REALTIME_BASE_DELAY_MS") {
            config.connection.base_delay_ms = ms;
        }
        if let Some(ms) = env_parse("REALTIME_MAX_DELAY_MS") {
            config.connection.max_delay_ms = ms;
        }
        if let Some(attempts) = env_parse("REALTIME_MAX_ATTEMPTS") {
            config.connection.max_attempts = attempts;
        }
        if let Some(ms) = env_parse("REALTIME_DEBOUNCE_MS") {
            config.processor.debounce_ms = ms;
        }
        if let Some(capacity) = env_parse::<usize>("REALTIME_DEDUP_CAPACITY") {
            config.processor.dedup_capacity = capacity;
            config.processor.dedup_evict_batch = (capacity / 2).max(1);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the core cannot operate with
    pub fn validate(&self) -> SyncResult<()> {
        let c = &self.connection;
        if c.base_delay_ms == 0 || c.base_delay_ms > c.max_delay_ms {
            return Err(SyncError::InvalidConfig(format!(
                "base_delay_ms must be in 1..={} (got {})",
                c.max_delay_ms, c.base_delay_ms
            )));
        }
        if !(0.0..1.0).contains(&c.jitter) {
            return Err(SyncError::InvalidConfig(format!(
                "jitter must be in [0, 1) (got {})",
                c.jitter
            )));
        }

        let p = &self.processor;
        if p.dedup_capacity == 0 || p.sequence_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "dedup_capacity and sequence_capacity must be non-zero".to_string(),
            ));
        }
        if p.dedup_evict_batch == 0 || p.dedup_evict_batch > p.dedup_capacity {
            return Err(SyncError::InvalidConfig(format!(
                "dedup_evict_batch must be in 1..={} (got {})",
                p.dedup_capacity, p.dedup_evict_batch
            )));
        }
        if p.max_batch_size == Some(0) {
            return Err(SyncError::InvalidConfig(
                "max_batch_size must be non-zero when set".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    10
}
fn default_jitter() -> f64 {
    0.2
}
fn default_debounce_ms() -> u64 {
    300
}
fn default_dedup_capacity() -> usize {
    1000
}
fn default_dedup_evict_batch() -> usize {
    500
}
