//! Consumer-facing wiring
//!
//! `RealtimeSync` feeds every event the connection manager delivers into an
//! event processor, so the consumer only sees status changes and debounced
//! invalidation batches.

use std::sync::Arc;

use crate::config::SyncConfig;
use crate::connection::{BroadcastOutcome, ConnectionCallbacks, ConnectionManager};
use crate::processor::{EventProcessor, ProcessedBatch, ProcessorStats};
use crate::transport::Transport;
use crate::types::{BroadcastEvent, ConnectionStatus, SyncResult};

/// Connection manager and event processor for one client instance
pub struct RealtimeSync {
    manager: ConnectionManager,
    processor: Arc<EventProcessor>,
}

impl RealtimeSync {
    /// Must be called inside a tokio runtime.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: &SyncConfig,
        on_status_change: impl Fn(ConnectionStatus) + Send + Sync + 'static,
        on_events_processed: impl Fn(ProcessedBatch) + Send + Sync + 'static,
    ) -> SyncResult<Self> {
        config.validate()?;

        let processor = Arc::new(EventProcessor::with_config(
            &config.processor,
            on_events_processed,
        ));

        let sink = Arc::clone(&processor);
        let callbacks = ConnectionCallbacks::new()
            .on_status_change(on_status_change)
            .on_event(move |event| sink.process(event));

        Ok(Self {
            manager: ConnectionManager::with_config(transport, &config.connection, callbacks),
            processor,
        })
    }

    pub async fn connect(&self, org_id: &str, user_id: &str) {
        self.manager.connect(org_id, user_id).await;
    }

    pub async fn disconnect(&self) {
        self.manager.disconnect().await;
    }

    pub async fn broadcast(&self, event: BroadcastEvent) -> BroadcastOutcome {
        self.manager.broadcast(event).await
    }

    pub fn tab_id(&self) -> &str {
        self.manager.tab_id()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.manager.status()
    }

    pub fn stats(&self) -> ProcessorStats {
        self.processor.stats()
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Disconnect, then flush anything still buffered
    pub async fn shutdown(&self) {
        self.manager.disconnect().await;
        self.processor.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryTransport;

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let mut config = SyncConfig::default();
        config.processor.dedup_capacity = 0;

        let result = RealtimeSync::new(
            Arc::new(InMemoryTransport::new()),
            &config,
            |_| {},
            |_| {},
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connect_and_shutdown() {
        let sync = RealtimeSync::new(
            Arc::new(InMemoryTransport::new()),
            &SyncConfig::default(),
            |_| {},
            |_| {},
        )
        .unwrap();

        sync.connect("o1", "u1").await;
        assert_eq!(sync.status(), ConnectionStatus::Connected);

        sync.shutdown().await;
        assert_eq!(sync.status(), ConnectionStatus::Disconnected);
    }
}
