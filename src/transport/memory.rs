//! In-process transport over tokio broadcast channels
//!
//! Every topic is a `broadcast::Sender`; each subscription gets a forwarding
//! task that turns the broadcast receiver into a frame stream. Publishers also
//! receive their own messages, like a real bus does.
//!
//! Fault injection (`fail_next_opens`, `set_fail_sends`, `drop_all`) lets tests
//! and local setups exercise reconnects without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use super::{TopicHandle, TopicSubscription, Transport, TransportFrame};
use crate::types::TransportError;

/// Buffered messages per topic; slow subscribers beyond this lag and lose events
const TOPIC_CAPACITY: usize = 1024;

struct SubscriptionEntry {
    topic: String,
    frames_tx: mpsc::UnboundedSender<TransportFrame>,
    forwarder: JoinHandle<()>,
}

/// Transport that keeps all topics inside the current process
#[derive(Default)]
pub struct InMemoryTransport {
    topics: Mutex<HashMap<String, broadcast::Sender<Value>>>,
    subscriptions: Mutex<HashMap<u64, SubscriptionEntry>>,
    next_handle: AtomicU64,
    failing_opens: AtomicU32,
    fail_sends: AtomicBool,
    open_attempts: AtomicU32,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `open_topic` fail
    pub fn fail_next_opens(&self, n: u32) {
        self.failing_opens.store(n, Ordering::SeqCst);
    }

    /// Make every `send` fail until turned off again
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Drop every open subscription, as if the network went away
    pub fn drop_all(&self, reason: &str) {
        let dropped: Vec<SubscriptionEntry> =
            self.subscriptions.lock().drain().map(|(_, entry)| entry).collect();

        for entry in dropped {
            entry.forwarder.abort();
            let _ = entry.frames_tx.send(TransportFrame::Closed(reason.to_string()));
        }
    }

    /// Publish without holding a subscription (server-side emitters, tests)
    pub fn publish(&self, topic: &str, payload: Value) -> usize {
        let sender = self.topics.lock().get(topic).cloned();
        match sender {
            Some(tx) => tx.send(payload).unwrap_or(0),
            None => 0,
        }
    }

    /// Number of open subscriptions on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscriptions
            .lock()
            .values()
            .filter(|entry| entry.topic == topic)
            .count()
    }

    /// Total `open_topic` calls so far, failed ones included
    pub fn open_attempts(&self) -> u32 {
        self.open_attempts.load(Ordering::SeqCst)
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<Value> {
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn open_topic(&self, topic: &str) -> Result<TopicSubscription, TransportError> {
        self.open_attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::TopicUnavailable(topic.to_string()));
        }

        let rx = self.sender_for(topic).subscribe();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let handle = TopicHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));

        let forward_tx = frames_tx.clone();
        let topic_name = topic.to_string();
        let forwarder = tokio::spawn(async move {
            let mut stream = BroadcastStream::new(rx);
            while let Some(item) = stream.next().await {
                match item {
                    Ok(payload) => {
                        if forward_tx.send(TransportFrame::Message(payload)).is_err() {
                            break; // Subscriber went away
                        }
                    }
                    Err(e) => {
                        warn!(topic = %topic_name, error = %e, "subscriber lagged behind topic");
                    }
                }
            }
        });

        self.subscriptions.lock().insert(
            handle.0,
            SubscriptionEntry {
                topic: topic.to_string(),
                frames_tx,
                forwarder,
            },
        );
        debug!(topic, handle = handle.0, "topic opened");

        Ok(TopicSubscription {
            handle,
            frames: frames_rx,
        })
    }

    async fn send(&self, handle: TopicHandle, payload: Value) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("injected send failure".to_string()));
        }

        let topic = self
            .subscriptions
            .lock()
            .get(&handle.0)
            .map(|entry| entry.topic.clone())
            .ok_or(TransportError::UnknownHandle(handle.0))?;

        // No receivers is not an error for a fire-and-forget bus
        let _ = self.sender_for(&topic).send(payload);
        Ok(())
    }

    async fn close(&self, handle: TopicHandle) {
        if let Some(entry) = self.subscriptions.lock().remove(&handle.0) {
            entry.forwarder.abort();
            debug!(topic = %entry.topic, handle = handle.0, "topic closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribers_receive_published_messages() {
        let transport = InMemoryTransport::new();
        let mut a = transport.open_topic("org:o1").await.unwrap();
        let mut b = transport.open_topic("org:o1").await.unwrap();

        transport.send(a.handle, json!({"n": 1})).await.unwrap();

        assert_eq!(a.frames.recv().await, Some(TransportFrame::Message(json!({"n": 1}))));
        assert_eq!(b.frames.recv().await, Some(TransportFrame::Message(json!({"n": 1}))));
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let transport = InMemoryTransport::new();
        let mut other = transport.open_topic("org:o2").await.unwrap();
        let _mine = transport.open_topic("org:o1").await.unwrap();

        assert_eq!(transport.publish("org:o1", json!(1)), 1);
        assert!(other.frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fail_next_opens() {
        let transport = InMemoryTransport::new();
        transport.fail_next_opens(2);

        assert!(transport.open_topic("org:o1").await.is_err());
        assert!(transport.open_topic("org:o1").await.is_err());
        assert!(transport.open_topic("org:o1").await.is_ok());
        assert_eq!(transport.open_attempts(), 3);
    }

    #[tokio::test]
    async fn test_drop_all_closes_subscriptions() {
        let transport = InMemoryTransport::new();
        let mut sub = transport.open_topic("org:o1").await.unwrap();

        transport.drop_all("network down");

        assert_eq!(
            sub.frames.recv().await,
            Some(TransportFrame::Closed("network down".to_string()))
        );
        assert_eq!(transport.subscriber_count("org:o1"), 0);
        assert_eq!(
            transport.send(sub.handle, json!(1)).await,
            Err(TransportError::UnknownHandle(sub.handle.0))
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let transport = InMemoryTransport::new();
        let sub = transport.open_topic("org:o1").await.unwrap();

        transport.close(sub.handle).await;
        transport.close(sub.handle).await;
        assert_eq!(transport.subscriber_count("org:o1"), 0);
    }
}
