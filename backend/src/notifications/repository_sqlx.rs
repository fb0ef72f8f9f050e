use chrono::{DateTime, Utc};
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::error::AppError;
use crate::notifications::model::{
    Channel, DeliveryStatus, NotificationPreferences, NotificationRow,
};
use crate::tenant;
use crate::time::now_rfc3339;

pub struct SqlxNotificationRepository {
    pool: AnyPool,
}

impl SqlxNotificationRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, row: &NotificationRow) -> Result<(), AppError> {
        sqlx::query(
            r#"
INSERT INTO notifications
  (id, tenant_id, user_id, event_type, channel, status, payload_json,
   sent_at, error, external_id, created_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(row.id.to_string())
        .bind(row.tenant_id.to_string())
        .bind(row.user_id.to_string())
        .bind(&row.event_type)
        .bind(row.channel.as_str())
        .bind(row.status.as_str())
        .bind(row.payload_json.to_string())
        .bind(
            row.sent_at
                .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)),
        )
        .bind(row.error.clone())
        .bind(row.external_id.clone())
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_for_user(&self, user_id: &Uuid) -> Result<Vec<NotificationRow>, AppError> {
        let tenant_id = tenant::current()?;

        let rows = sqlx::query(
            r#"
SELECT id, tenant_id, user_id, event_type, channel, status, payload_json,
       sent_at, error, external_id
FROM notifications
WHERE tenant_id = ? AND user_id = ?
ORDER BY created_at DESC;
"#,
        )
        .bind(tenant_id.to_string())
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_notification).collect()
    }
}

pub struct SqlxPreferencesRepository {
    pool: AnyPool,
}

impl SqlxPreferencesRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// The user's stored preferences, or None when they never saved
    /// any (callers fall back to the defaults).
    pub async fn fetch(&self, user_id: &Uuid) -> Result<Option<NotificationPreferences>, AppError> {
        let tenant_id = tenant::current()?;

        let row = sqlx::query(
            r#"SELECT prefs_json FROM notification_preferences WHERE tenant_id = ? AND user_id = ?;"#,
        )
        .bind(tenant_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(None),
            Some(r) => {
                let json: String = r.get("prefs_json");
                Ok(serde_json::from_str(&json).ok())
            }
        }
    }

    pub async fn upsert(
        &self,
        user_id: &Uuid,
        prefs: &NotificationPreferences,
    ) -> Result<(), AppError> {
        let tenant_id = tenant::current()?;
        let json = serde_json::to_string(prefs)?;

        sqlx::query(
            r#"
INSERT INTO notification_preferences (tenant_id, user_id, prefs_json)
VALUES (?, ?, ?)
ON CONFLICT (tenant_id, user_id) DO UPDATE SET prefs_json = excluded.prefs_json;
"#,
        )
        .bind(tenant_id.to_string())
        .bind(user_id.to_string())
        .bind(json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_notification(r: &sqlx::any::AnyRow) -> Result<NotificationRow, AppError> {
    let id_s: String = r.get("id");
    let tenant_s: String = r.get("tenant_id");
    let user_s: String = r.get("user_id");
    let channel_s: String = r.get("channel");
    let status_s: String = r.get("status");
    let payload_s: String = r.get("payload_json");

    let status = match status_s.as_str() {
        "pending" => DeliveryStatus::Pending,
        "sent" => DeliveryStatus::Sent,
        "failed" => DeliveryStatus::Failed,
        "delivered" => DeliveryStatus::Delivered,
        "skipped" => DeliveryStatus::Skipped,
        other => return Err(AppError::Internal(format!("unknown status {other}"))),
    };

    let sent_at = match r.get::<Option<String>, _>("sent_at") {
        None => None,
        Some(s) => Some(
            DateTime::parse_from_rfc3339(&s)
                .map_err(|_| AppError::Internal("invalid sent_at".into()))?
                .with_timezone(&Utc),
        ),
    };

    Ok(NotificationRow {
        id: Uuid::parse_str(&id_s).map_err(|_| AppError::Internal("invalid uuid".into()))?,
        tenant_id: Uuid::parse_str(&tenant_s)
            .map_err(|_| AppError::Internal("invalid tenant uuid".into()))?,
        user_id: Uuid::parse_str(&user_s)
            .map_err(|_| AppError::Internal("invalid user uuid".into()))?,
        event_type: r.get("event_type"),
        channel: Channel::parse(&channel_s)
            .ok_or_else(|| AppError::Internal(format!("unknown channel {channel_s}")))?,
        status,
        payload_json: serde_json::from_str(&payload_s).unwrap_or(serde_json::Value::Null),
        sent_at,
        error: r.get("error"),
        external_id: r.get("external_id"),
    })
}
