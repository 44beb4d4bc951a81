//! Event processing: from raw change notifications to invalidation batches
//!
//! ## Pipeline
//! - Dedup by event id (bounded at 1000 ids, evicting the oldest 500 at once)
//! - Per-entity sequence gap detection (advisory)
//! - Debounce: flush only after a 300ms quiet period
//! - Map every event to invalidation keys and union them per batch

mod bounded;
mod pipeline;
mod worker;

pub use self::bounded::BatchEvictingMap;
pub use self::pipeline::{Ingest, ProcessedBatch, ProcessorCore, ProcessorStats, SequenceGap};
pub use self::worker::{EventProcessor, OnEventsProcessed};
