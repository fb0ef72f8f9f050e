//! Pessimistic document-lock service.
//!
//! Exclusive, time-bounded edit leases keyed by
//! `(tenant, document type, document id)`. Acquire is linearizable per
//! key through the table's unique index; a lock exactly at its expiry
//! is already dead. Every mutation broadcasts LOCK_ACQUIRED /
//! LOCK_RELEASED. The periodic reaper is the authoritative cleanup;
//! the sweep inside acquire is only an optimization.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::warn_if_slow;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::bus::{Event, EventBus, EventType};
use crate::config::LockSettings;
use crate::error::AppError;
use crate::locks::model::{DocumentLock, LockKey, LockResult, LockableDocumentType};
use crate::locks::repository_sqlx::SqlxLockRepository;
use crate::metrics::counters::Counters;
use crate::registry::ServiceRegistry;
use crate::tenant;
use crate::time::now_ms;

/// Point-in-time view of a key, for editors polling lock state.
#[derive(Debug, Clone)]
pub struct LockStatus {
    pub locked: bool,
    pub lock: Option<DocumentLock>,
}

pub struct DocumentLockService {
    repo: Arc<SqlxLockRepository>,
    bus: Arc<EventBus>,
    cfg: LockSettings,
    counters: Counters,
}

impl DocumentLockService {
    pub fn new(
        repo: Arc<SqlxLockRepository>,
        bus: Arc<EventBus>,
        cfg: LockSettings,
        counters: Counters,
    ) -> Arc<Self> {
        Arc::new(Self {
            repo,
            bus,
            cfg,
            counters,
        })
    }

    fn lease_ms(&self) -> u64 {
        self.cfg.lease.as_millis() as u64
    }

    #[instrument(skip(self, metadata), target = "locks", fields(doc = %document_id, user = %user_id))]
    pub async fn acquire(
        &self,
        tenant_id: Uuid,
        document_type: LockableDocumentType,
        document_id: Uuid,
        user_id: Uuid,
        metadata: Option<Value>,
    ) -> Result<LockResult, AppError> {
        tenant::run(tenant_id, async {
            let now = now_ms();
            let lock = DocumentLock {
                tenant_id,
                document_type,
                document_id,
                locked_by_user_id: user_id,
                locked_at_ms: now,
                expires_at_ms: now + self.lease_ms(),
                metadata_json: metadata,
            };

            let result = warn_if_slow(
                "lock_acquire",
                Duration::from_millis(100),
                self.repo.acquire_row(lock, now),
            )
            .await?;
            match &result {
                LockResult::Acquired(lock) => {
                    self.counters.locks_acquired.fetch_add(1, Ordering::Relaxed);
                    self.publish_lock_event(EventType::LockAcquired, lock);
                }
                LockResult::AlreadyLocked { locked_by, .. } => {
                    self.counters.locks_contended.fetch_add(1, Ordering::Relaxed);
                    info!(holder = %locked_by, "lock contended");
                }
            }
            Ok(result)
        })
        .await
    }

    /// Holder-only release. False when not held or held by another
    /// user.
    pub async fn release(
        &self,
        tenant_id: Uuid,
        document_type: LockableDocumentType,
        document_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, AppError> {
        tenant::run(tenant_id, async {
            let key = LockKey {
                document_type,
                document_id,
            };
            let released = self.repo.release_row(&key, &user_id, now_ms()).await?;
            if released {
                self.publish_release_event(tenant_id, &key, Some(user_id));
            }
            Ok(released)
        })
        .await
    }

    /// Unconditional release, audit-logged.
    pub async fn force_release(
        &self,
        tenant_id: Uuid,
        document_type: LockableDocumentType,
        document_id: Uuid,
    ) -> Result<bool, AppError> {
        tenant::run(tenant_id, async {
            let key = LockKey {
                document_type,
                document_id,
            };
            let released = self.repo.force_release_row(&key).await?;
            if released {
                warn!(doc = %document_id, "lock force-released");
                self.publish_release_event(tenant_id, &key, None);
            }
            Ok(released)
        })
        .await
    }

    /// Extends the holder's lease by the full window. False once the
    /// lock expired; a dead lease cannot be revived.
    pub async fn refresh(
        &self,
        tenant_id: Uuid,
        document_type: LockableDocumentType,
        document_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, AppError> {
        tenant::run(tenant_id, async {
            let key = LockKey {
                document_type,
                document_id,
            };
            let now = now_ms();
            self.repo
                .refresh_row(&key, &user_id, now, now + self.lease_ms())
                .await
        })
        .await
    }

    pub async fn get_status(
        &self,
        tenant_id: Uuid,
        document_type: LockableDocumentType,
        document_id: Uuid,
    ) -> Result<LockStatus, AppError> {
        tenant::run(tenant_id, async {
            let key = LockKey {
                document_type,
                document_id,
            };
            let lock = self.repo.find_live(&key, now_ms()).await?;
            Ok(LockStatus {
                locked: lock.is_some(),
                lock,
            })
        })
        .await
    }

    pub async fn is_locked(
        &self,
        tenant_id: Uuid,
        document_type: LockableDocumentType,
        document_id: Uuid,
    ) -> Result<bool, AppError> {
        Ok(self
            .get_status(tenant_id, document_type, document_id)
            .await?
            .locked)
    }

    /// True when `user_id` may edit: the document is unlocked or they
    /// hold the lease.
    pub async fn can_edit(
        &self,
        tenant_id: Uuid,
        document_type: LockableDocumentType,
        document_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, AppError> {
        let status = self
            .get_status(tenant_id, document_type, document_id)
            .await?;
        Ok(match status.lock {
            None => true,
            Some(lock) => lock.locked_by_user_id == user_id,
        })
    }

    pub async fn get_user_locks(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<DocumentLock>, AppError> {
        tenant::run(tenant_id, self.repo.user_locks(&user_id, now_ms())).await
    }

    /// Drops every lease a user holds (logout, session end).
    pub async fn release_all_user_locks(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, AppError> {
        tenant::run(tenant_id, async {
            let locks = self.repo.user_locks(&user_id, now_ms()).await?;
            let count = self.repo.release_all_for_user(&user_id).await?;
            for lock in &locks {
                let key = LockKey {
                    document_type: lock.document_type,
                    document_id: lock.document_id,
                };
                self.publish_release_event(tenant_id, &key, Some(user_id));
            }
            Ok(count)
        })
        .await
    }

    /// Removes every lock with `expires_at_ms <= now`, across tenants.
    /// Returns the count reaped.
    pub async fn cleanup_expired_locks(&self) -> Result<u64, AppError> {
        let now = now_ms();
        let dead = self.repo.expired(now).await?;
        if dead.is_empty() {
            return Ok(0);
        }

        let count = self.repo.delete_expired(now).await?;
        self.counters.locks_reaped.fetch_add(count, Ordering::Relaxed);
        info!(count, "reaped expired locks");

        for lock in &dead {
            let key = LockKey {
                document_type: lock.document_type,
                document_id: lock.document_id,
            };
            self.publish_release_event(lock.tenant_id, &key, Some(lock.locked_by_user_id));
        }
        Ok(count)
    }

    /// Background reaper at the configured cadence.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let service = self.clone();
        let interval = self.cfg.reap_interval.max(Duration::from_millis(100));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // immediate first tick is a no-op
            loop {
                ticker.tick().await;
                if let Err(e) = service.cleanup_expired_locks().await {
                    warn!(error = %e, "lock reaper pass failed");
                }
            }
        })
    }

    /// Exposes lock state over the service envelope so other modules
    /// (and a future HTTP surface) consult it without a direct import.
    pub fn register_routes(self: &Arc<Self>, registry: &ServiceRegistry) {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct StatusQuery {
            tenant_id: Uuid,
            document_type: String,
            document_id: Uuid,
            user_id: Option<Uuid>,
        }

        fn parse(data: Value) -> Result<(StatusQuery, LockableDocumentType), AppError> {
            let q: StatusQuery = serde_json::from_value(data)
                .map_err(|e| AppError::Validation(e.to_string()))?;
            let doc_type = LockableDocumentType::parse(&q.document_type).ok_or_else(|| {
                AppError::Validation(format!("unknown document type {}", q.document_type))
            })?;
            Ok((q, doc_type))
        }

        let service = self.clone();
        registry.register("locks", "GET", "/status", move |req| {
            let service = service.clone();
            Box::pin(async move {
                let (q, doc_type) = parse(req.data)?;
                let status = service
                    .get_status(q.tenant_id, doc_type, q.document_id)
                    .await?;
                Ok(json!({
                    "locked": status.locked,
                    "lockedBy": status.lock.as_ref().map(|l| l.locked_by_user_id),
                    "expiresAtMs": status.lock.as_ref().map(|l| l.expires_at_ms),
                }))
            })
        });

        let service = self.clone();
        registry.register("locks", "GET", "/can-edit", move |req| {
            let service = service.clone();
            Box::pin(async move {
                let (q, doc_type) = parse(req.data)?;
                let user_id = q
                    .user_id
                    .ok_or_else(|| AppError::Validation("userId is required".into()))?;
                let allowed = service
                    .can_edit(q.tenant_id, doc_type, q.document_id, user_id)
                    .await?;
                Ok(json!({ "canEdit": allowed }))
            })
        });
    }

    fn publish_lock_event(&self, event_type: EventType, lock: &DocumentLock) {
        self.bus.publish(
            Event::new(
                event_type,
                "document_lock",
                lock.document_id.to_string(),
                json!({
                    "documentType": lock.document_type.as_str(),
                    "documentId": lock.document_id,
                    "lockedBy": lock.locked_by_user_id,
                    "expiresAtMs": lock.expires_at_ms,
                }),
            )
            .with_tenant(lock.tenant_id),
        );
    }

    fn publish_release_event(&self, tenant_id: Uuid, key: &LockKey, user: Option<Uuid>) {
        self.bus.publish(
            Event::new(
                EventType::LockReleased,
                "document_lock",
                key.document_id.to_string(),
                json!({
                    "documentType": key.document_type.as_str(),
                    "documentId": key.document_id,
                    "releasedFor": user,
                }),
            )
            .with_tenant(tenant_id),
        );
    }
}
