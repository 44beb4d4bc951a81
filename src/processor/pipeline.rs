//! Synchronous processing state: dedup, gap detection and the batch buffer
//!
//! Timing lives in the worker; everything here is deterministic.

use serde::Serialize;
use tracing::debug;

use super::bounded::BatchEvictingMap;
use crate::config::ProcessorConfig;
use crate::types::{union_keys, BroadcastEvent, InvalidationSet};

/// A jump in an entity's sequence that suggests a missed event.
/// Advisory only: the event is processed normally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceGap {
    /// `entityType:entityId`
    pub entity_key: String,
    pub event_id: String,
    pub previous: i64,
    pub received: i64,
}

impl SequenceGap {
    /// Sequence values skipped between the two events
    pub fn skipped(&self) -> i64 {
        self.received
            .saturating_sub(self.previous)
            .saturating_sub(1)
    }
}

/// Outcome of feeding one event to the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingest {
    Accepted { gap: Option<SequenceGap> },
    Duplicate,
}

/// One debounced flush: everything that arrived in the quiet-period window
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedBatch {
    /// Events in arrival order
    pub events: Vec<BroadcastEvent>,
    /// Union of the invalidation keys of all events
    pub invalidation_keys: InvalidationSet,
    /// Gaps flagged while the batch accumulated
    pub gaps: Vec<SequenceGap>,
}

/// Counters and sizes for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    pub seen_ids: usize,
    pub tracked_entities: usize,
    pub buffered: usize,
    pub accepted: u64,
    pub duplicates: u64,
    pub gaps: u64,
    pub malformed: u64,
    pub flushes: u64,
}

#[derive(Debug)]
pub struct ProcessorCore {
    seen: BatchEvictingMap<()>,
    sequences: BatchEvictingMap<i64>,
    buffer: Vec<BroadcastEvent>,
    pending_gaps: Vec<SequenceGap>,
    stats: ProcessorStats,
}

impl ProcessorCore {
    pub fn new(config: &ProcessorConfig) -> Self {
        Self {
            seen: BatchEvictingMap::new(config.dedup_capacity, config.dedup_evict_batch),
            sequences: BatchEvictingMap::new(
                config.sequence_capacity,
                (config.sequence_capacity / 2).max(1),
            ),
            buffer: Vec::new(),
            pending_gaps: Vec::new(),
            stats: ProcessorStats::default(),
        }
    }

    /// Dedup, gap-check and buffer one event
    pub fn ingest(&mut self, event: BroadcastEvent) -> Ingest {
        if self.seen.contains_key(&event.event_id) {
            self.stats.duplicates += 1;
            debug!(event_id = %event.event_id, "duplicate event ignored");
            return Ingest::Duplicate;
        }
        self.seen.insert(event.event_id.clone(), ());

        let gap = self.check_sequence(&event);
        if let Some(gap) = &gap {
            self.pending_gaps.push(gap.clone());
        }

        self.stats.accepted += 1;
        self.buffer.push(event);
        Ingest::Accepted { gap }
    }

    /// Record the event's sequence and report a gap if one was skipped.
    /// The stored sequence is always replaced, even when it moves backwards.
    pub fn check_sequence(&mut self, event: &BroadcastEvent) -> Option<SequenceGap> {
        let key = event.entity_key();
        let previous = self.sequences.insert(key.clone(), event.sequence);

        match previous {
            Some(previous) if event.sequence > previous.saturating_add(1) => {
                self.stats.gaps += 1;
                debug!(
                    entity = %key,
                    previous,
                    received = event.sequence,
                    "sequence gap detected"
                );
                Some(SequenceGap {
                    entity_key: key,
                    event_id: event.event_id.clone(),
                    previous,
                    received: event.sequence,
                })
            }
            _ => None,
        }
    }

    pub fn record_malformed(&mut self) {
        self.stats.malformed += 1;
    }

    /// Drain the buffer into a batch, `None` when nothing is pending
    pub fn take_batch(&mut self) -> Option<ProcessedBatch> {
        if self.buffer.is_empty() {
            return None;
        }

        let events = std::mem::take(&mut self.buffer);
        let invalidation_keys = union_keys(&events);
        let gaps = std::mem::take(&mut self.pending_gaps);
        self.stats.flushes += 1;

        Some(ProcessedBatch {
            events,
            invalidation_keys,
            gaps,
        })
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn has_seen(&self, event_id: &str) -> bool {
        self.seen.contains_key(event_id)
    }

    pub fn last_sequence(&self, entity_key: &str) -> Option<i64> {
        self.sequences.get(entity_key).copied()
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            seen_ids: self.seen.len(),
            tracked_entities: self.sequences.len(),
            buffered: self.buffer.len(),
            ..self.stats.clone()
        }
    }
}
