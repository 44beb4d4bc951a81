//! Taskboard Realtime
//!
//! The real-time synchronization core of a project/task tracker: one resilient
//! subscription per organization, and a processor that turns noisy change
//! notifications into a few deduplicated, debounced cache-invalidation batches.
//!
//! # Features
//!
//! - **Resilient connection**: exponential backoff with ±20% jitter, status callbacks
//! - **Self-filtering**: per-instance tab id, own echoes are never processed
//! - **Dedup**: bounded event-id window with batch eviction
//! - **Gap detection**: per-entity sequence jumps are flagged
//! - **Debounce**: bursts coalesce into one invalidation batch after 300ms of quiet
//!
//! # Modules
//!
//! - `types`: Wire model, connection status, invalidation keys, errors
//! - `config`: Reconnect and processing settings
//! - `transport`: Pub/sub abstraction and an in-process implementation
//! - `connection`: Connection manager, backoff, outbox
//! - `processor`: Dedup, gap detection, batching
//! - `emitter`: Server-side event construction and publishing
//! - `sync`: Connection manager wired to the processor
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use taskboard_realtime::{InMemoryTransport, RealtimeSync, SyncConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let transport = Arc::new(InMemoryTransport::new());
//!     let sync = RealtimeSync::new(
//!         transport,
//!         &SyncConfig::default(),
//!         |status| println!("status: {}", status),
//!         |batch| {
//!             for key in &batch.invalidation_keys {
//!                 println!("refetch {}", key);
//!             }
//!         },
//!     )
//!     .unwrap();
//!
//!     sync.connect("acme", "user-1").await;
//! }
//! ```

pub mod config;
pub mod connection;
pub mod emitter;
pub mod processor;
pub mod sync;
pub mod transport;
pub mod types;

// Re-export commonly used items at crate root
pub use config::{ConnectionConfig, ProcessorConfig, SyncConfig};
pub use connection::{BackoffPolicy, BroadcastOutcome, ConnectionCallbacks, ConnectionManager, Outbox};
pub use emitter::{EventDraft, EventEmitter};
pub use processor::{EventProcessor, ProcessedBatch, ProcessorStats, SequenceGap};
pub use sync::RealtimeSync;
pub use transport::{topic_key, InMemoryTransport, Transport};
pub use types::{
    ActorType, BroadcastEvent, ConnectionStatus, EntityType, EventType, InvalidationKey,
    SyncError, SyncResult, TransportError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
