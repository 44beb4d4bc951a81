//! Caller-side queue for broadcasts made while offline
//!
//! The manager never buffers. Callers that want their writes announced once
//! the connection comes back park them here. The queue is bounded and drops the
//! oldest entry on overflow.

use std::collections::VecDeque;

use tracing::{debug, warn};

use super::manager::{BroadcastOutcome, ConnectionManager};
use crate::types::BroadcastEvent;

/// Bounded drop-oldest queue of pending broadcasts
#[derive(Debug)]
pub struct Outbox {
    queue: VecDeque<BroadcastEvent>,
    capacity: usize,
    dropped: u64,
}

impl Outbox {
    /// Capacity is clamped to at least one entry
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Queue an event, returning the oldest one if it had to make room
    pub fn push(&mut self, event: BroadcastEvent) -> Option<BroadcastEvent> {
        let evicted = if self.queue.len() >= self.capacity {
            self.dropped += 1;
            self.queue.pop_front()
        } else {
            None
        };
        if let Some(old) = &evicted {
            warn!(event_id = %old.event_id, "outbox full, dropping oldest pending broadcast");
        }
        self.queue.push_back(event);
        evicted
    }

    /// Send pending events in order. Stops at the first event that could not
    /// be sent and keeps it (and everything after it) queued.
    /// Returns how many were sent.
    pub async fn flush(&mut self, manager: &ConnectionManager) -> usize {
        let mut sent = 0;
        while let Some(event) = self.queue.pop_front() {
            match manager.broadcast(event.clone()).await {
                BroadcastOutcome::Sent => sent += 1,
                outcome => {
                    debug!(?outcome, pending = self.queue.len() + 1, "outbox flush interrupted");
                    self.queue.push_front(event);
                    break;
                }
            }
        }
        sent
    }

    /// Broadcast now if possible, otherwise queue
    pub async fn send_or_queue(&mut self, manager: &ConnectionManager, event: BroadcastEvent) -> BroadcastOutcome {
        if !self.queue.is_empty() {
            // Keep ordering: older pending events go first
            self.flush(manager).await;
        }
        if self.queue.is_empty() {
            let outcome = manager.broadcast(event.clone()).await;
            if outcome == BroadcastOutcome::Sent {
                return outcome;
            }
            self.push(event);
            return outcome;
        }
        self.push(event);
        BroadcastOutcome::NotConnected
    }

    /// Discard everything, e.g. when switching organizations
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Events dropped on overflow since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionCallbacks;
    use crate::transport::{InMemoryTransport, TopicSubscription, Transport, TransportFrame};
    use crate::types::fixtures::event;
    use crate::types::{EntityType, EventType};
    use std::sync::Arc;

    fn task(id: &str) -> BroadcastEvent {
        event(EntityType::Task, id, EventType::Updated)
    }

    async fn next_event(sub: &mut TopicSubscription) -> BroadcastEvent {
        match sub.frames.recv().await {
            Some(TransportFrame::Message(payload)) => BroadcastEvent::from_value(payload).unwrap(),
            other => panic!("expected a message, got {:?}", other),
        }
    }

    #[test]
    fn test_push_drops_oldest_on_overflow() {
        let mut outbox = Outbox::new(2);
        assert!(outbox.push(task("a")).is_none());
        assert!(outbox.push(task("b")).is_none());

        let evicted = outbox.push(task("c")).unwrap();
        assert_eq!(evicted.entity_id, "a");
        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox.dropped(), 1);
    }

    #[tokio::test]
    async fn test_flush_keeps_events_while_disconnected() {
        let transport = Arc::new(InMemoryTransport::new());
        let manager = ConnectionManager::new(transport, ConnectionCallbacks::new());
        let mut outbox = Outbox::new(8);

        let outcome = outbox.send_or_queue(&manager, task("a")).await;
        assert_eq!(outcome, BroadcastOutcome::NotConnected);
        assert_eq!(outbox.flush(&manager).await, 0);
        assert_eq!(outbox.len(), 1);
    }

    #[tokio::test]
    async fn test_flush_sends_in_order_once_connected() {
        let transport = Arc::new(InMemoryTransport::new());
        let mut observer = transport.open_topic("org:o1").await.unwrap();
        let manager = ConnectionManager::new(transport.clone(), ConnectionCallbacks::new());

        let mut outbox = Outbox::new(8);
        outbox.push(task("a"));
        outbox.push(task("b"));

        manager.connect("o1", "u1").await;
        assert_eq!(outbox.flush(&manager).await, 2);
        assert!(outbox.is_empty());

        let first = next_event(&mut observer).await;
        let second = next_event(&mut observer).await;
        assert_eq!(first.entity_id, "a");
        assert_eq!(second.entity_id, "b");
        assert_eq!(first.tab_id, manager.tab_id());
    }
}
