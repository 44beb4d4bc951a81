//! Cache invalidation keys
//!
//! Each event maps deterministically to the set of cached views it makes stale.
//! Keys parameterized by a metadata field that the event does not carry are
//! left out rather than rendered with an empty id.

use std::collections::BTreeSet;

use serde::{Serialize, Serializer};

use super::event::{BroadcastEvent, EntityType, EventType};

/// Identifier of a cached view that must be refreshed
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InvalidationKey {
    TaskList { project_id: String },
    TaskDetail { task_id: String },
    FeatureList { epic_id: String },
    FeatureDetail { feature_id: String },
    EpicList { project_id: String },
    EpicDetail { epic_id: String },
    CommentList { task_id: String },
    Dashboard,
    DashboardMyTasks,
}

impl std::fmt::Display for InvalidationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationKey::TaskList { project_id } => write!(f, "task-list:{}", project_id),
            InvalidationKey::TaskDetail { task_id } => write!(f, "task-detail:{}", task_id),
            InvalidationKey::FeatureList { epic_id } => write!(f, "feature-list:{}", epic_id),
            InvalidationKey::FeatureDetail { feature_id } => {
                write!(f, "feature-detail:{}", feature_id)
            }
            InvalidationKey::EpicList { project_id } => write!(f, "epic-list:{}", project_id),
            InvalidationKey::EpicDetail { epic_id } => write!(f, "epic-detail:{}", epic_id),
            InvalidationKey::CommentList { task_id } => write!(f, "comment-list:{}", task_id),
            InvalidationKey::Dashboard => write!(f, "dashboard"),
            InvalidationKey::DashboardMyTasks => write!(f, "dashboard-myTasks"),
        }
    }
}

impl Serialize for InvalidationKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Ordered, deduplicated set of keys
pub type InvalidationSet = BTreeSet<InvalidationKey>;

/// Keys invalidated by a single event
pub fn keys_for(event: &BroadcastEvent) -> Vec<InvalidationKey> {
    let mut keys = Vec::with_capacity(4);
    let project_id = || event.project_id.clone();

    match event.entity_type {
        EntityType::Task => {
            let feature = event.metadata_str("featureId").map(|id| InvalidationKey::FeatureDetail {
                feature_id: id.to_string(),
            });

            match event.event_type {
                EventType::Created | EventType::Deleted => {
                    keys.push(InvalidationKey::TaskList { project_id: project_id() });
                    keys.extend(feature);
                    keys.push(InvalidationKey::Dashboard);
                }
                EventType::Updated | EventType::StatusChanged => {
                    keys.push(InvalidationKey::TaskDetail {
                        task_id: event.entity_id.clone(),
                    });
                    keys.push(InvalidationKey::TaskList { project_id: project_id() });
                    keys.extend(feature);
                    keys.push(InvalidationKey::DashboardMyTasks);
                }
            }
        }
        EntityType::Feature => {
            keys.push(InvalidationKey::FeatureDetail {
                feature_id: event.entity_id.clone(),
            });
            if let Some(epic_id) = event.metadata_str("epicId") {
                keys.push(InvalidationKey::FeatureList { epic_id: epic_id.to_string() });
                keys.push(InvalidationKey::EpicDetail { epic_id: epic_id.to_string() });
            }
        }
        EntityType::Epic => {
            keys.push(InvalidationKey::EpicDetail {
                epic_id: event.entity_id.clone(),
            });
            keys.push(InvalidationKey::EpicList { project_id: project_id() });
        }
        EntityType::Comment => {
            if let Some(task_id) = event.metadata_str("taskId") {
                keys.push(InvalidationKey::CommentList { task_id: task_id.to_string() });
                keys.push(InvalidationKey::TaskDetail { task_id: task_id.to_string() });
            }
        }
    }

    keys
}

/// Union of the keys of every event in a batch
pub fn union_keys<'a>(events: impl IntoIterator<Item = &'a BroadcastEvent>) -> InvalidationSet {
    events.into_iter().flat_map(keys_for).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event::fixtures::event;

    fn rendered(event: &BroadcastEvent) -> Vec<String> {
        keys_for(event).iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_task_status_changed_keys() {
        let ev = event(EntityType::Task, "t1", EventType::StatusChanged)
            .with_metadata("featureId", "f1")
            .with_metadata("previousStatus", "todo");

        assert_eq!(
            rendered(&ev),
            vec!["task-detail:t1", "task-list:p1", "feature-detail:f1", "dashboard-myTasks"]
        );
    }

    #[test]
    fn test_task_created_and_deleted_keys() {
        for event_type in [EventType::Created, EventType::Deleted] {
            let ev = event(EntityType::Task, "t1", event_type).with_metadata("featureId", "f1");
            assert_eq!(rendered(&ev), vec!["task-list:p1", "feature-detail:f1", "dashboard"]);
        }
    }

    #[test]
    fn test_task_without_feature_skips_feature_detail() {
        let ev = event(EntityType::Task, "t1", EventType::Updated);
        assert_eq!(rendered(&ev), vec!["task-detail:t1", "task-list:p1", "dashboard-myTasks"]);
    }

    #[test]
    fn test_feature_keys_use_epic() {
        let ev = event(EntityType::Feature, "f1", EventType::Deleted).with_metadata("epicId", "e1");
        assert_eq!(rendered(&ev), vec!["feature-detail:f1", "feature-list:e1", "epic-detail:e1"]);
    }

    #[test]
    fn test_epic_keys() {
        let ev = event(EntityType::Epic, "e1", EventType::Created);
        assert_eq!(rendered(&ev), vec!["epic-detail:e1", "epic-list:p1"]);
    }

    #[test]
    fn test_comment_keys_use_task() {
        let ev = event(EntityType::Comment, "c1", EventType::Created).with_metadata("taskId", "t7");
        assert_eq!(rendered(&ev), vec!["comment-list:t7", "task-detail:t7"]);
    }

    #[test]
    fn test_union_deduplicates_across_events() {
        let a = event(EntityType::Task, "t1", EventType::Updated);
        let b = event(EntityType::Task, "t2", EventType::Updated);

        let keys = union_keys([&a, &b]);
        // task-detail x2, task-list, dashboard-myTasks
        assert_eq!(keys.len(), 4);
        assert!(keys.contains(&InvalidationKey::TaskList { project_id: "p1".to_string() }));
        assert!(keys.contains(&InvalidationKey::DashboardMyTasks));
    }

    #[test]
    fn test_key_serializes_as_string() {
        let json = serde_json::to_string(&InvalidationKey::DashboardMyTasks).unwrap();
        assert_eq!(json, "\"dashboard-myTasks\"");
    }
}
