//! Tenant-scoped activity feed with mentions and read-state.
//!
//! Recording appends the row, broadcasts it for real-time clients, and
//! emits one MENTION event per mentioned user. Mention notifications
//! are produced by a bus subscriber, never by a direct call into the
//! notification service.

use std::sync::Arc;

use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

use crate::activity::model::{Activity, ActivityFilter, NewActivity};
use crate::activity::repository_sqlx::SqlxActivityRepository;
use crate::bus::{Event, EventBus, EventType};
use crate::error::AppError;
use crate::tenant;

pub struct ActivityFeedService {
    repo: Arc<SqlxActivityRepository>,
    bus: Arc<EventBus>,
}

impl ActivityFeedService {
    pub fn new(repo: Arc<SqlxActivityRepository>, bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self { repo, bus })
    }

    /// Appends an activity under the ambient tenant.
    #[instrument(skip(self, input), target = "activity", fields(activity_type = %input.activity_type))]
    pub async fn record_activity(&self, input: NewActivity) -> Result<Activity, AppError> {
        let tenant_id = tenant::current()?;
        let activity = self.repo.insert(&input).await?;

        self.bus.publish(
            Event::new(
                EventType::ActivityRecorded,
                "activity",
                activity.id.to_string(),
                json!({
                    "activityId": activity.id,
                    "activityType": activity.activity_type,
                    "actorId": activity.actor_id,
                    "targetType": activity.target_type,
                    "targetId": activity.target_id,
                }),
            )
            .with_tenant(tenant_id),
        );

        for mentioned in input.mentioned_user_ids() {
            self.bus.publish(
                Event::new(
                    EventType::Mention,
                    "activity",
                    activity.id.to_string(),
                    json!({
                        "activityId": activity.id,
                        "mentionedUserId": mentioned,
                        "actorId": activity.actor_id,
                    }),
                )
                .with_tenant(tenant_id),
            );
        }

        Ok(activity)
    }

    pub async fn get_activities(
        &self,
        tenant_id: Uuid,
        filter: ActivityFilter,
    ) -> Result<Vec<Activity>, AppError> {
        tenant::run(tenant_id, self.repo.query(&filter)).await
    }

    /// Feed scoped to one document.
    pub async fn get_document_activities(
        &self,
        tenant_id: Uuid,
        entity_type: &str,
        entity_id: &str,
        limit: i64,
    ) -> Result<Vec<Activity>, AppError> {
        self.get_activities(
            tenant_id,
            ActivityFilter {
                entity_type: Some(entity_type.to_string()),
                entity_id: Some(entity_id.to_string()),
                limit,
                ..ActivityFilter::default()
            },
        )
        .await
    }

    pub async fn get_mentions(&self, user_id: Uuid) -> Result<Vec<Activity>, AppError> {
        self.repo.mentions(&user_id).await
    }

    pub async fn get_unread_count(&self, user_id: Uuid) -> Result<i64, AppError> {
        self.repo.unread_count(&user_id).await
    }

    pub async fn mark_as_read(
        &self,
        user_id: Uuid,
        activity_ids: &[Uuid],
    ) -> Result<u64, AppError> {
        self.repo.mark_read(&user_id, activity_ids).await
    }

    pub async fn mark_all_as_read(&self, user_id: Uuid) -> Result<u64, AppError> {
        self.repo.mark_all_read(&user_id).await
    }
}
