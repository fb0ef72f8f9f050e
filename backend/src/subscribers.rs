//! Composition-time bus subscribers.
//!
//! The reversed edges of the module graph live here: activity records
//! mentions as MENTION events, and these handlers carry them onward to
//! notifications; optimization outcomes are appended to the activity
//! feed. Neither side imports the other's service directly.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::activity::model::NewActivity;
use crate::activity::service::ActivityFeedService;
use crate::bus::{Event, EventBus, EventHandler, EventType};
use crate::error::AppError;
use crate::notifications::service::NotificationService;

/// Turns MENTION events into notification fan-outs.
pub struct MentionNotifier {
    notifications: Arc<NotificationService>,
}

impl MentionNotifier {
    pub fn new(notifications: Arc<NotificationService>) -> Arc<Self> {
        Arc::new(Self { notifications })
    }

    pub fn register(self: &Arc<Self>, bus: &EventBus) {
        bus.subscribe(EventType::Mention, self.clone());
    }
}

#[async_trait]
impl EventHandler for MentionNotifier {
    fn id(&self) -> &'static str {
        "mention-notifier"
    }

    async fn handle(&self, event: Event) -> Result<(), AppError> {
        let Some(tenant_id) = event.tenant_id else {
            warn!("mention event without tenant dropped");
            return Ok(());
        };
        let Some(mentioned) = event
            .payload
            .get("mentionedUserId")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
        else {
            warn!("mention event without mentionedUserId dropped");
            return Ok(());
        };

        self.notifications
            .notify(tenant_id, EventType::Mention, &[mentioned], &event.payload)
            .await?;
        Ok(())
    }
}

/// Appends optimization outcomes to the activity feed.
pub struct OptimizationActivityRecorder {
    activity: Arc<ActivityFeedService>,
}

impl OptimizationActivityRecorder {
    pub fn new(activity: Arc<ActivityFeedService>) -> Arc<Self> {
        Arc::new(Self { activity })
    }

    pub fn register(self: &Arc<Self>, bus: &EventBus) {
        bus.subscribe(EventType::OptimizationCompleted, self.clone());
        bus.subscribe(EventType::OptimizationFailed, self.clone());
    }
}

#[async_trait]
impl EventHandler for OptimizationActivityRecorder {
    fn id(&self) -> &'static str {
        "optimization-activity-recorder"
    }

    async fn handle(&self, event: Event) -> Result<(), AppError> {
        if event.tenant_id.is_none() {
            return Ok(());
        }

        // runs produced by the pipeline itself, not a person
        let actor = Uuid::nil();
        self.activity
            .record_activity(NewActivity {
                actor_id: actor,
                activity_type: event.event_type.as_str().to_string(),
                target_type: Some(event.aggregate.clone()),
                target_id: Some(event.aggregate_id.clone()),
                metadata_json: json!({ "payload": event.payload }),
            })
            .await?;
        Ok(())
    }
}
