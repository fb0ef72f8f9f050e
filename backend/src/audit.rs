//! Append-only audit trail.
//!
//! Inserts compose with the caller's open transaction: an audit row is
//! visible iff the mutation it describes committed. `with_audit` wraps
//! the common case — run a compound mutation and its audit entry in one
//! transaction.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::error::AppError;
use crate::tenant;
use crate::time::now_rfc3339;

const MAX_QUERY_LIMIT: i64 = 500;

#[derive(Debug, Clone)]
pub struct AuditEntry {
    /// Acting user; None for system actions (reaper, recovery).
    pub user_id: Option<Uuid>,
    pub action: String,
    pub module: String,
    pub entity_type: String,
    pub entity_id: String,
    pub previous_value: Option<Value>,
    pub new_value: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct AuditLogRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub module: String,
    pub entity_type: String,
    pub entity_id: String,
    pub previous_value: Option<Value>,
    pub new_value: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub user_id: Option<Uuid>,
    pub action: Option<String>,
    pub module: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

/// Writes one audit row on the given executor. Pass the open
/// transaction of the mutation being audited.
pub async fn append<'e, E>(executor: E, tenant_id: Uuid, entry: &AuditEntry) -> Result<(), AppError>
where
    E: sqlx::Executor<'e, Database = sqlx::Any>,
{
    sqlx::query(
        r#"
INSERT INTO audit_logs
  (id, tenant_id, user_id, action, module, entity_type, entity_id,
   previous_value, new_value, created_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(tenant_id.to_string())
    .bind(entry.user_id.map(|u| u.to_string()))
    .bind(&entry.action)
    .bind(&entry.module)
    .bind(&entry.entity_type)
    .bind(&entry.entity_id)
    .bind(entry.previous_value.as_ref().map(|v| v.to_string()))
    .bind(entry.new_value.as_ref().map(|v| v.to_string()))
    .bind(now_rfc3339())
    .execute(executor)
    .await?;
    Ok(())
}

pub struct AuditService {
    pool: AnyPool,
}

impl AuditService {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// Standalone audit insert outside any compound mutation.
    pub async fn record(&self, entry: AuditEntry) -> Result<(), AppError> {
        let tenant_id = tenant::current()?;
        append(&self.pool, tenant_id, &entry).await
    }

    /// Runs `op` and the audit insert in one transaction; the audit row
    /// commits iff `op`'s writes commit.
    pub async fn with_audit<T, F>(&self, entry: AuditEntry, op: F) -> Result<T, AppError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut sqlx::AnyConnection) -> BoxFuture<'c, Result<T, AppError>>
            + Send,
    {
        let tenant_id = tenant::current()?;
        let mut tx = self.pool.begin().await?;
        let out = op(&mut *tx).await?;
        append(&mut *tx, tenant_id, &entry).await?;
        tx.commit().await?;
        Ok(out)
    }

    pub async fn query(&self, q: &AuditQuery) -> Result<Vec<AuditLogRow>, AppError> {
        let tenant_id = tenant::current()?;

        let mut sql = String::from(
            "SELECT id, tenant_id, user_id, action, module, entity_type, entity_id, \
             previous_value, new_value, created_at \
             FROM audit_logs WHERE tenant_id = ?",
        );
        let mut binds: Vec<String> = vec![tenant_id.to_string()];

        let push = |sql: &mut String, clause: &str, value: String, binds: &mut Vec<String>| {
            sql.push_str(clause);
            binds.push(value);
        };

        if let Some(v) = &q.entity_type {
            push(&mut sql, " AND entity_type = ?", v.clone(), &mut binds);
        }
        if let Some(v) = &q.entity_id {
            push(&mut sql, " AND entity_id = ?", v.clone(), &mut binds);
        }
        if let Some(v) = &q.user_id {
            push(&mut sql, " AND user_id = ?", v.to_string(), &mut binds);
        }
        if let Some(v) = &q.action {
            push(&mut sql, " AND action = ?", v.clone(), &mut binds);
        }
        if let Some(v) = &q.module {
            push(&mut sql, " AND module = ?", v.clone(), &mut binds);
        }
        if let Some(v) = &q.start {
            push(
                &mut sql,
                " AND created_at >= ?",
                v.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
                &mut binds,
            );
        }
        if let Some(v) = &q.end {
            push(
                &mut sql,
                " AND created_at <= ?",
                v.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
                &mut binds,
            );
        }

        sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");
        let limit = q.limit.clamp(1, MAX_QUERY_LIMIT);
        let offset = q.offset.max(0);

        let mut query = sqlx::query(&sql);
        for b in binds {
            query = query.bind(b);
        }
        query = query.bind(limit).bind(offset);

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_audit).collect()
    }

    /// Latest `limit` entries for one entity, newest first.
    pub async fn entity_history(
        &self,
        entity_type: &str,
        entity_id: &str,
        limit: i64,
    ) -> Result<Vec<AuditLogRow>, AppError> {
        self.query(&AuditQuery {
            entity_type: Some(entity_type.to_string()),
            entity_id: Some(entity_id.to_string()),
            limit,
            ..AuditQuery::default()
        })
        .await
    }
}

fn row_to_audit(r: &sqlx::any::AnyRow) -> Result<AuditLogRow, AppError> {
    let id_s: String = r.get("id");
    let tenant_s: String = r.get("tenant_id");
    let created_s: String = r.get("created_at");

    let user_id = match r.get::<Option<String>, _>("user_id") {
        None => None,
        Some(s) => Some(
            Uuid::parse_str(&s).map_err(|_| AppError::Internal("invalid user uuid".into()))?,
        ),
    };
    let json_field = |v: Option<String>| v.and_then(|s| serde_json::from_str(&s).ok());

    Ok(AuditLogRow {
        id: Uuid::parse_str(&id_s).map_err(|_| AppError::Internal("invalid audit uuid".into()))?,
        tenant_id: Uuid::parse_str(&tenant_s)
            .map_err(|_| AppError::Internal("invalid tenant uuid".into()))?,
        user_id,
        action: r.get("action"),
        module: r.get("module"),
        entity_type: r.get("entity_type"),
        entity_id: r.get("entity_id"),
        previous_value: json_field(r.get("previous_value")),
        new_value: json_field(r.get("new_value")),
        created_at: DateTime::parse_from_rfc3339(&created_s)
            .map_err(|_| AppError::Internal("invalid audit timestamp".into()))?
            .with_timezone(&Utc),
    })
}
