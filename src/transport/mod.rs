//! Pub/sub transport abstraction
//!
//! The hosting real-time message bus is an external collaborator. The core only
//! needs to open an org-scoped topic, send on it, receive its frames and close
//! it again. Authentication of the bus itself is the bus's business.

mod memory;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::types::TransportError;

pub use memory::InMemoryTransport;

/// Topic key for an organization, e.g. `org:acme`
pub fn topic_key(org_id: &str) -> String {
    format!("org:{}", org_id)
}

/// Opaque handle to one open topic subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TopicHandle(pub u64);

/// Something the transport delivered on a subscription
#[derive(Debug, Clone, PartialEq)]
pub enum TransportFrame {
    /// A raw payload published on the topic
    Message(Value),
    /// The subscription dropped; no more frames follow
    Closed(String),
}

/// An open subscription: its handle plus the inbound frame stream
#[derive(Debug)]
pub struct TopicSubscription {
    pub handle: TopicHandle,
    pub frames: mpsc::UnboundedReceiver<TransportFrame>,
}

/// Client of the pub/sub bus.
///
/// A closed `frames` channel is equivalent to a `Closed` frame.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Subscribe to `topic`; resolves once the bus acknowledged the subscription
    async fn open_topic(&self, topic: &str) -> Result<TopicSubscription, TransportError>;

    /// Publish `payload` on the topic behind `handle`
    async fn send(&self, handle: TopicHandle, payload: Value) -> Result<(), TransportError>;

    /// Tear the subscription down. Closing an unknown handle is a no-op.
    async fn close(&self, handle: TopicHandle);
}
