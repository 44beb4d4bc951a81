//! Data types for the synchronization core
//!
//! This module contains the wire model, connection status, invalidation keys
//! and the error taxonomy shared by every other module.

mod error;
mod event;
mod invalidation;
mod status;

pub use error::{SyncError, SyncResult, TransportError};
pub use event::{ActorType, BroadcastEvent, EntityType, EventType};
pub use invalidation::{keys_for, union_keys, InvalidationKey, InvalidationSet};
pub use status::ConnectionStatus;

#[cfg(test)]
pub(crate) use event::fixtures;

/// Current wall-clock time in milliseconds, the source of event sequences
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
