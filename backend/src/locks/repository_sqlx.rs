use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::audit::{self, AuditEntry};
use crate::error::AppError;
use crate::locks::model::{DocumentLock, LockKey, LockResult, LockableDocumentType};
use crate::tenant;

/// SQLx-backed lock persistence. The unique key
/// `(tenant_id, document_type, document_id)` makes acquire linearizable;
/// everything here is plain row mechanics and the service owns the
/// lease policy.
///
/// Tenant-scoped except the expiry sweep, which is tenant-optional:
/// the periodic reaper clears every tenant's dead locks.
pub struct SqlxLockRepository {
    pool: AnyPool,
}

impl SqlxLockRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// Atomic acquire: sweep the key's expired row, then insert. A
    /// concurrent winner surfaces as the unique-key insert failing, in
    /// which case the holder is returned.
    pub async fn acquire_row(
        &self,
        lock: DocumentLock,
        now_ms: u64,
    ) -> Result<LockResult, AppError> {
        let tenant_id = tenant::current()?;

        let mut tx = self.pool.begin().await?;

        // opportunistic sweep of this key only; the reaper owns the rest
        sqlx::query(
            r#"
DELETE FROM document_locks
WHERE tenant_id = ? AND document_type = ? AND document_id = ? AND expires_at_ms <= ?;
"#,
        )
        .bind(tenant_id.to_string())
        .bind(lock.document_type.as_str())
        .bind(lock.document_id.to_string())
        .bind(now_ms as i64)
        .execute(&mut *tx)
        .await?;

        let inserted = sqlx::query(
            r#"
INSERT INTO document_locks
  (tenant_id, document_type, document_id, locked_by_user_id,
   locked_at_ms, expires_at_ms, metadata_json)
VALUES (?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(tenant_id.to_string())
        .bind(lock.document_type.as_str())
        .bind(lock.document_id.to_string())
        .bind(lock.locked_by_user_id.to_string())
        .bind(lock.locked_at_ms as i64)
        .bind(lock.expires_at_ms as i64)
        .bind(lock.metadata_json.as_ref().map(|v| v.to_string()))
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {
                tx.commit().await?;
                Ok(LockResult::Acquired(lock))
            }
            Err(_) => {
                // lost the race; report the live holder
                tx.rollback().await?;
                let key = LockKey {
                    document_type: lock.document_type,
                    document_id: lock.document_id,
                };
                match self.find_live(&key, now_ms).await? {
                    Some(holder) => Ok(LockResult::AlreadyLocked {
                        locked_by: holder.locked_by_user_id,
                        expires_at_ms: holder.expires_at_ms,
                    }),
                    // holder vanished between insert and read; caller retries
                    None => Err(AppError::Conflict("lock acquire raced; retry".into())),
                }
            }
        }
    }

    pub async fn find_live(
        &self,
        key: &LockKey,
        now_ms: u64,
    ) -> Result<Option<DocumentLock>, AppError> {
        let tenant_id = tenant::current()?;

        let row = sqlx::query(
            r#"
SELECT tenant_id, document_type, document_id, locked_by_user_id,
       locked_at_ms, expires_at_ms, metadata_json
FROM document_locks
WHERE tenant_id = ? AND document_type = ? AND document_id = ? AND expires_at_ms > ?;
"#,
        )
        .bind(tenant_id.to_string())
        .bind(key.document_type.as_str())
        .bind(key.document_id.to_string())
        .bind(now_ms as i64)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_lock(&r)?)),
            None => Ok(None),
        }
    }

    /// Holder-only delete; false when the lock is absent, expired, or
    /// held by someone else.
    pub async fn release_row(
        &self,
        key: &LockKey,
        user_id: &Uuid,
        now_ms: u64,
    ) -> Result<bool, AppError> {
        let tenant_id = tenant::current()?;

        let res = sqlx::query(
            r#"
DELETE FROM document_locks
WHERE tenant_id = ? AND document_type = ? AND document_id = ?
  AND locked_by_user_id = ? AND expires_at_ms > ?;
"#,
        )
        .bind(tenant_id.to_string())
        .bind(key.document_type.as_str())
        .bind(key.document_id.to_string())
        .bind(user_id.to_string())
        .bind(now_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    /// Unconditional delete, audit-logged in the same transaction.
    pub async fn force_release_row(&self, key: &LockKey) -> Result<bool, AppError> {
        let tenant_id = tenant::current()?;

        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            r#"
SELECT tenant_id, document_type, document_id, locked_by_user_id,
       locked_at_ms, expires_at_ms, metadata_json
FROM document_locks
WHERE tenant_id = ? AND document_type = ? AND document_id = ?;
"#,
        )
        .bind(tenant_id.to_string())
        .bind(key.document_type.as_str())
        .bind(key.document_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = existing else {
            tx.rollback().await?;
            return Ok(false);
        };
        let previous = row_to_lock(&row)?;

        sqlx::query(
            r#"DELETE FROM document_locks WHERE tenant_id = ? AND document_type = ? AND document_id = ?;"#,
        )
        .bind(tenant_id.to_string())
        .bind(key.document_type.as_str())
        .bind(key.document_id.to_string())
        .execute(&mut *tx)
        .await?;

        audit::append(
            &mut *tx,
            tenant_id,
            &AuditEntry {
                user_id: None,
                action: "FORCE_RELEASE".into(),
                module: "locks".into(),
                entity_type: key.document_type.as_str().into(),
                entity_id: key.document_id.to_string(),
                previous_value: Some(serde_json::json!({
                    "lockedBy": previous.locked_by_user_id,
                    "expiresAtMs": previous.expires_at_ms,
                })),
                new_value: None,
            },
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Holder-only lease extension on a still-live lock.
    pub async fn refresh_row(
        &self,
        key: &LockKey,
        user_id: &Uuid,
        now_ms: u64,
        new_expiry_ms: u64,
    ) -> Result<bool, AppError> {
        let tenant_id = tenant::current()?;

        let res = sqlx::query(
            r#"
UPDATE document_locks
SET expires_at_ms = ?
WHERE tenant_id = ? AND document_type = ? AND document_id = ?
  AND locked_by_user_id = ? AND expires_at_ms > ?;
"#,
        )
        .bind(new_expiry_ms as i64)
        .bind(tenant_id.to_string())
        .bind(key.document_type.as_str())
        .bind(key.document_id.to_string())
        .bind(user_id.to_string())
        .bind(now_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    pub async fn user_locks(
        &self,
        user_id: &Uuid,
        now_ms: u64,
    ) -> Result<Vec<DocumentLock>, AppError> {
        let tenant_id = tenant::current()?;

        let rows = sqlx::query(
            r#"
SELECT tenant_id, document_type, document_id, locked_by_user_id,
       locked_at_ms, expires_at_ms, metadata_json
FROM document_locks
WHERE tenant_id = ? AND locked_by_user_id = ? AND expires_at_ms > ?
ORDER BY locked_at_ms;
"#,
        )
        .bind(tenant_id.to_string())
        .bind(user_id.to_string())
        .bind(now_ms as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_lock).collect()
    }

    pub async fn release_all_for_user(&self, user_id: &Uuid) -> Result<u64, AppError> {
        let tenant_id = tenant::current()?;

        let res = sqlx::query(
            r#"DELETE FROM document_locks WHERE tenant_id = ? AND locked_by_user_id = ?;"#,
        )
        .bind(tenant_id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    /// Expired rows across every tenant (tenant-optional: the reaper
    /// has no tenant bound).
    pub async fn expired(&self, now_ms: u64) -> Result<Vec<DocumentLock>, AppError> {
        if tenant::current_optional().is_none() {
            tracing::warn!("expired-lock sweep running without tenant context");
        }

        let rows = sqlx::query(
            r#"
SELECT tenant_id, document_type, document_id, locked_by_user_id,
       locked_at_ms, expires_at_ms, metadata_json
FROM document_locks
WHERE expires_at_ms <= ?;
"#,
        )
        .bind(now_ms as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_lock).collect()
    }

    pub async fn delete_expired(&self, now_ms: u64) -> Result<u64, AppError> {
        let res = sqlx::query(r#"DELETE FROM document_locks WHERE expires_at_ms <= ?;"#)
            .bind(now_ms as i64)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }
}

fn row_to_lock(r: &sqlx::any::AnyRow) -> Result<DocumentLock, AppError> {
    let tenant_s: String = r.get("tenant_id");
    let type_s: String = r.get("document_type");
    let doc_s: String = r.get("document_id");
    let user_s: String = r.get("locked_by_user_id");

    let ms = |field: &str| -> Result<u64, AppError> {
        let v: i64 = r.get(field);
        if v < 0 {
            return Err(AppError::Internal(format!("negative timestamp in {field}")));
        }
        Ok(v as u64)
    };

    Ok(DocumentLock {
        tenant_id: Uuid::parse_str(&tenant_s)
            .map_err(|_| AppError::Internal("invalid tenant uuid".into()))?,
        document_type: LockableDocumentType::parse(&type_s)
            .ok_or_else(|| AppError::Internal(format!("unknown document type {type_s}")))?,
        document_id: Uuid::parse_str(&doc_s)
            .map_err(|_| AppError::Internal("invalid document uuid".into()))?,
        locked_by_user_id: Uuid::parse_str(&user_s)
            .map_err(|_| AppError::Internal("invalid user uuid".into()))?,
        locked_at_ms: ms("locked_at_ms")?,
        expires_at_ms: ms("expires_at_ms")?,
        metadata_json: r
            .get::<Option<String>, _>("metadata_json")
            .and_then(|s| serde_json::from_str(&s).ok()),
    })
}
