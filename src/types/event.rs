//! Broadcast event wire model
//!
//! A `BroadcastEvent` is the fire-and-forget notification that some entity in an
//! organization changed. Events are never persisted; they only drive cache
//! invalidation on the receiving side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{SyncError, SyncResult};

/// Kind of entity an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Task,
    Feature,
    Epic,
    Comment,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityType::Task => write!(f, "task"),
            EntityType::Feature => write!(f, "feature"),
            EntityType::Epic => write!(f, "epic"),
            EntityType::Comment => write!(f, "comment"),
        }
    }
}

/// Nature of the change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Updated,
    Deleted,
    StatusChanged,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Created => write!(f, "created"),
            EventType::Updated => write!(f, "updated"),
            EventType::Deleted => write!(f, "deleted"),
            EventType::StatusChanged => write!(f, "status_changed"),
        }
    }
}

/// Who caused the change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    #[default]
    User,
    /// An AI agent acting on behalf of a user
    Agent,
    System,
}

/// A change notification exchanged between emitters and subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastEvent {
    /// Unique per emission, basis for deduplication
    pub event_id: String,

    /// Wall-clock milliseconds at emission; per-entity ordering hint only
    pub sequence: i64,

    pub entity_type: EntityType,
    pub entity_id: String,
    pub event_type: EventType,

    pub actor_type: ActorType,
    pub actor_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,

    pub project_id: String,
    pub org_id: String,

    pub timestamp: DateTime<Utc>,

    /// Event-specific extras (featureId, epicId, taskId, previousStatus, ...)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,

    /// Origin token of the instance that produced the event.
    /// Filled in by the connection manager on the way out.
    pub tab_id: String,
}

impl BroadcastEvent {
    /// Key used for per-entity sequence tracking, e.g. `task:42`
    pub fn entity_key(&self) -> String {
        format!("{}:{}", self.entity_type, self.entity_id)
    }

    /// Read a string field from metadata
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Attach a metadata field
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Set the origin token
    pub fn with_tab_id(mut self, tab_id: impl Into<String>) -> Self {
        self.tab_id = tab_id.into();
        self
    }

    /// Check the fields serde cannot enforce (non-empty identifiers)
    pub fn validate(&self) -> SyncResult<()> {
        let required = [
            ("eventId", &self.event_id),
            ("entityId", &self.entity_id),
            ("projectId", &self.project_id),
            ("orgId", &self.org_id),
            ("tabId", &self.tab_id),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(SyncError::MalformedEvent(format!("missing {}", field)));
            }
        }
        Ok(())
    }

    /// Decode and validate an event received from the transport
    pub fn from_value(value: Value) -> SyncResult<Self> {
        let event: BroadcastEvent = serde_json::from_value(value)
            .map_err(|e| SyncError::MalformedEvent(e.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    /// Encode for the transport
    pub fn to_value(&self) -> SyncResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}
