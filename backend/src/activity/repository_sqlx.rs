use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::activity::model::{Activity, ActivityFilter, NewActivity};
use crate::error::AppError;
use crate::tenant;
use crate::time::now_rfc3339;

/// Unread counting looks back this far; older activity never counts
/// toward the badge, which caps the query's cost.
const UNREAD_LOOKBACK_DAYS: i64 = 90;

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 200;

pub struct SqlxActivityRepository {
    pool: AnyPool,
}

impl SqlxActivityRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, input: &NewActivity) -> Result<Activity, AppError> {
        let tenant_id = tenant::current()?;
        let id = Uuid::new_v4();
        let created = now_rfc3339();

        sqlx::query(
            r#"
INSERT INTO activities
  (id, tenant_id, actor_id, activity_type, target_type, target_id, metadata_json, created_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .bind(input.actor_id.to_string())
        .bind(&input.activity_type)
        .bind(input.target_type.clone())
        .bind(input.target_id.clone())
        .bind(input.metadata_json.to_string())
        .bind(&created)
        .execute(&self.pool)
        .await?;

        Ok(Activity {
            id,
            tenant_id,
            actor_id: input.actor_id,
            activity_type: input.activity_type.clone(),
            target_type: input.target_type.clone(),
            target_id: input.target_id.clone(),
            metadata_json: input.metadata_json.clone(),
            created_at: DateTime::parse_from_rfc3339(&created)
                .map_err(|_| AppError::Internal("invalid timestamp".into()))?
                .with_timezone(&Utc),
        })
    }

    pub async fn query(&self, filter: &ActivityFilter) -> Result<Vec<Activity>, AppError> {
        let tenant_id = tenant::current()?;

        let mut sql = String::from(
            "SELECT id, tenant_id, actor_id, activity_type, target_type, target_id, \
             metadata_json, created_at FROM activities WHERE tenant_id = ?",
        );
        let mut binds: Vec<String> = vec![tenant_id.to_string()];

        if let Some(v) = &filter.entity_type {
            sql.push_str(" AND target_type = ?");
            binds.push(v.clone());
        }
        if let Some(v) = &filter.entity_id {
            sql.push_str(" AND target_id = ?");
            binds.push(v.clone());
        }
        if let Some(v) = &filter.actor_id {
            sql.push_str(" AND actor_id = ?");
            binds.push(v.to_string());
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");

        let limit = if filter.limit <= 0 {
            DEFAULT_PAGE
        } else {
            filter.limit.min(MAX_PAGE)
        };

        let mut query = sqlx::query(&sql);
        for b in binds {
            query = query.bind(b);
        }
        query = query.bind(limit).bind(filter.offset.max(0));

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_activity).collect()
    }

    /// Activities whose metadata mentions the user. The mention list is
    /// JSON text, so this matches on the serialized uuid.
    pub async fn mentions(&self, user_id: &Uuid) -> Result<Vec<Activity>, AppError> {
        let tenant_id = tenant::current()?;

        let rows = sqlx::query(
            r#"
SELECT id, tenant_id, actor_id, activity_type, target_type, target_id,
       metadata_json, created_at
FROM activities
WHERE tenant_id = ? AND metadata_json LIKE '%' || ? || '%'
ORDER BY created_at DESC
LIMIT ?;
"#,
        )
        .bind(tenant_id.to_string())
        .bind(user_id.to_string())
        .bind(MAX_PAGE)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_activity).collect()
    }

    pub async fn unread_count(&self, user_id: &Uuid) -> Result<i64, AppError> {
        let tenant_id = tenant::current()?;
        let cutoff = (Utc::now() - ChronoDuration::days(UNREAD_LOOKBACK_DAYS))
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);

        let row = sqlx::query(
            r#"
SELECT COUNT(*) AS n
FROM activities a
WHERE a.tenant_id = ?
  AND a.created_at >= ?
  AND NOT EXISTS (
    SELECT 1 FROM activity_reads r
    WHERE r.activity_id = a.id AND r.user_id = ?
  );
"#,
        )
        .bind(tenant_id.to_string())
        .bind(cutoff)
        .bind(user_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("n"))
    }

    /// Idempotent: re-marking an already-read activity changes nothing.
    pub async fn mark_read(&self, user_id: &Uuid, activity_ids: &[Uuid]) -> Result<u64, AppError> {
        let tenant_id = tenant::current()?;
        let now = now_rfc3339();
        let mut marked = 0;

        for activity_id in activity_ids {
            // only activities of this tenant are markable
            let res = sqlx::query(
                r#"
INSERT INTO activity_reads (user_id, activity_id, read_at)
SELECT ?, a.id, ?
FROM activities a
WHERE a.id = ? AND a.tenant_id = ?
ON CONFLICT (user_id, activity_id) DO NOTHING;
"#,
            )
            .bind(user_id.to_string())
            .bind(&now)
            .bind(activity_id.to_string())
            .bind(tenant_id.to_string())
            .execute(&self.pool)
            .await?;
            marked += res.rows_affected();
        }
        Ok(marked)
    }

    pub async fn mark_all_read(&self, user_id: &Uuid) -> Result<u64, AppError> {
        let tenant_id = tenant::current()?;
        let now = now_rfc3339();
        let cutoff = (Utc::now() - ChronoDuration::days(UNREAD_LOOKBACK_DAYS))
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);

        let res = sqlx::query(
            r#"
INSERT INTO activity_reads (user_id, activity_id, read_at)
SELECT ?, a.id, ?
FROM activities a
WHERE a.tenant_id = ? AND a.created_at >= ?
ON CONFLICT (user_id, activity_id) DO NOTHING;
"#,
        )
        .bind(user_id.to_string())
        .bind(&now)
        .bind(tenant_id.to_string())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }
}

fn row_to_activity(r: &sqlx::any::AnyRow) -> Result<Activity, AppError> {
    let id_s: String = r.get("id");
    let tenant_s: String = r.get("tenant_id");
    let actor_s: String = r.get("actor_id");
    let created_s: String = r.get("created_at");
    let metadata_s: String = r.get("metadata_json");

    Ok(Activity {
        id: Uuid::parse_str(&id_s).map_err(|_| AppError::Internal("invalid activity uuid".into()))?,
        tenant_id: Uuid::parse_str(&tenant_s)
            .map_err(|_| AppError::Internal("invalid tenant uuid".into()))?,
        actor_id: Uuid::parse_str(&actor_s)
            .map_err(|_| AppError::Internal("invalid actor uuid".into()))?,
        activity_type: r.get("activity_type"),
        target_type: r.get("target_type"),
        target_id: r.get("target_id"),
        metadata_json: serde_json::from_str(&metadata_s).unwrap_or(serde_json::Value::Null),
        created_at: DateTime::parse_from_rfc3339(&created_s)
            .map_err(|_| AppError::Internal("invalid activity timestamp".into()))?
            .with_timezone(&Utc),
    })
}
