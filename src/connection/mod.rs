//! Connection lifecycle for the org-scoped event topic
//!
//! ## Features
//! - One subscription per (organization, user) pair, `connect()` is idempotent
//! - Reconnect with exponential backoff (1s base, 30s cap, ±20% jitter, 10 attempts)
//! - Status callback on every transition
//! - Outbound events stamped with a per-instance tab id; own echoes are filtered
//! - `Outbox` for callers that want offline broadcasts replayed later

mod backoff;
mod manager;
mod outbox;

pub use backoff::BackoffPolicy;
pub use manager::{BroadcastOutcome, ConnectionCallbacks, ConnectionManager, OnEvent, OnStatusChange};
pub use outbox::Outbox;
