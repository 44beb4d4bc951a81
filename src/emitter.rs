//! Server-side event emitter
//!
//! Mutation handlers describe what changed with an [`EventDraft`]; the emitter
//! stamps it with a fresh event id, a millisecond sequence and a timestamp, and
//! publishes it on the organization topic. Delivery is fire-and-forget.
//!
//! The draft may carry the tab id of the client that made the request so that
//! client can recognize (and skip) the echo of its own change.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::transport::{topic_key, TopicHandle, Transport};
use crate::types::{now_millis, ActorType, BroadcastEvent, EntityType, EventType, SyncResult};

/// Everything about a change except the fields the emitter generates
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub org_id: String,
    pub project_id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub event_type: EventType,
    pub actor_type: ActorType,
    pub actor_name: String,
    pub actor_id: Option<String>,
    pub metadata: Map<String, Value>,
    /// Origin of the request, if the caller knows it
    pub tab_id: Option<String>,
}

impl EventDraft {
    pub fn new(
        org_id: &str,
        project_id: &str,
        entity_type: EntityType,
        entity_id: &str,
        event_type: EventType,
    ) -> Self {
        Self {
            org_id: org_id.to_string(),
            project_id: project_id.to_string(),
            entity_type,
            entity_id: entity_id.to_string(),
            event_type,
            actor_type: ActorType::System,
            actor_name: "system".to_string(),
            actor_id: None,
            metadata: Map::new(),
            tab_id: None,
        }
    }

    /// Attribute the change
    pub fn by(mut self, actor_type: ActorType, actor_name: &str, actor_id: Option<&str>) -> Self {
        self.actor_type = actor_type;
        self.actor_name = actor_name.to_string();
        self.actor_id = actor_id.map(str::to_string);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Tag with the tab id of the requesting client
    pub fn from_tab(mut self, tab_id: &str) -> Self {
        self.tab_id = Some(tab_id.to_string());
        self
    }

    /// Task change; `feature_id` feeds the feature-detail invalidation
    pub fn task(
        org_id: &str,
        project_id: &str,
        task_id: &str,
        event_type: EventType,
        feature_id: Option<&str>,
    ) -> Self {
        let draft = Self::new(org_id, project_id, EntityType::Task, task_id, event_type);
        match feature_id {
            Some(feature_id) => draft.with_metadata("featureId", feature_id),
            None => draft,
        }
    }

    /// Task status change, recording the status it moved away from
    pub fn task_status_changed(
        org_id: &str,
        project_id: &str,
        task_id: &str,
        feature_id: Option<&str>,
        previous_status: &str,
    ) -> Self {
        Self::task(org_id, project_id, task_id, EventType::StatusChanged, feature_id)
            .with_metadata("previousStatus", previous_status)
    }

    pub fn feature(
        org_id: &str,
        project_id: &str,
        feature_id: &str,
        event_type: EventType,
        epic_id: &str,
    ) -> Self {
        Self::new(org_id, project_id, EntityType::Feature, feature_id, event_type)
            .with_metadata("epicId", epic_id)
    }

    pub fn epic(org_id: &str, project_id: &str, epic_id: &str, event_type: EventType) -> Self {
        Self::new(org_id, project_id, EntityType::Epic, epic_id, event_type)
    }

    pub fn comment(
        org_id: &str,
        project_id: &str,
        comment_id: &str,
        event_type: EventType,
        task_id: &str,
    ) -> Self {
        Self::new(org_id, project_id, EntityType::Comment, comment_id, event_type)
            .with_metadata("taskId", task_id)
    }

    /// Complete the draft. `default_tab_id` is used when the draft has none.
    pub fn into_event(self, default_tab_id: &str) -> BroadcastEvent {
        BroadcastEvent {
            event_id: Uuid::new_v4().to_string(),
            sequence: now_millis(),
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            event_type: self.event_type,
            actor_type: self.actor_type,
            actor_name: self.actor_name,
            actor_id: self.actor_id,
            project_id: self.project_id,
            org_id: self.org_id,
            timestamp: Utc::now(),
            metadata: self.metadata,
            tab_id: self.tab_id.unwrap_or_else(|| default_tab_id.to_string()),
        }
    }
}

/// Publishes events on `org:<orgId>` topics, keeping one handle per topic
pub struct EventEmitter {
    transport: Arc<dyn Transport>,
    tab_id: String,
    handles: Mutex<HashMap<String, TopicHandle>>,
}

impl EventEmitter {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            tab_id: format!("server-{}", Uuid::new_v4()),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Tab id stamped on drafts that carry none
    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    /// Build and publish an event, returning what was sent
    pub async fn emit(&self, draft: EventDraft) -> SyncResult<BroadcastEvent> {
        let event = draft.into_event(&self.tab_id);
        event.validate()?;

        let topic = topic_key(&event.org_id);
        let handle = self.handle_for(&topic).await?;

        if let Err(e) = self.transport.send(handle, event.to_value()?).await {
            warn!(topic = %topic, error = %e, "emit failed, dropping cached handle");
            self.handles.lock().remove(&topic);
            self.transport.close(handle).await;
            return Err(e.into());
        }

        debug!(
            topic = %topic,
            event_id = %event.event_id,
            entity = %event.entity_key(),
            event_type = %event.event_type,
            "event emitted"
        );
        Ok(event)
    }

    /// Close every cached topic handle
    pub async fn close_all(&self) {
        let handles: Vec<TopicHandle> = self.handles.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            self.transport.close(handle).await;
        }
    }

    async fn handle_for(&self, topic: &str) -> SyncResult<TopicHandle> {
        let cached = self.handles.lock().get(topic).copied();
        if let Some(handle) = cached {
            return Ok(handle);
        }

        // Inbound frames are of no interest to an emitter
        let subscription = self.transport.open_topic(topic).await?;
        let raced = {
            let mut handles = self.handles.lock();
            match handles.get(topic).copied() {
                Some(existing) => Some(existing),
                None => {
                    handles.insert(topic.to_string(), subscription.handle);
                    None
                }
            }
        };

        match raced {
            Some(existing) => {
                self.transport.close(subscription.handle).await;
                Ok(existing)
            }
            None => Ok(subscription.handle),
        }
    }
}
