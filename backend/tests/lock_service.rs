//! Document-lock service against in-memory SQLite: contention,
//! lease laws, expiry boundary, reaping, forced release.

mod support;

use std::sync::Arc;
use std::time::Duration;

use sqlx::{AnyPool, Row};
use uuid::Uuid;

use backend::bus::{EventBus, EventType};
use backend::config::LockSettings;
use backend::locks::model::{LockResult, LockableDocumentType};
use backend::locks::repository_sqlx::SqlxLockRepository;
use backend::locks::service::DocumentLockService;
use backend::metrics::counters::Counters;
use backend::time::now_ms;

use support::{seed_tenant, setup_db, wait_for_event};

const DOC: LockableDocumentType = LockableDocumentType::CuttingPlan;

fn build_service(db: &AnyPool, lease: Duration) -> Arc<DocumentLockService> {
    DocumentLockService::new(
        Arc::new(SqlxLockRepository::new(db.clone())),
        EventBus::new(Counters::default()),
        LockSettings {
            lease,
            ..LockSettings::default()
        },
        Counters::default(),
    )
}

fn build_service_with_bus(
    db: &AnyPool,
    lease: Duration,
) -> (Arc<DocumentLockService>, Arc<EventBus>) {
    let bus = EventBus::new(Counters::default());
    let service = DocumentLockService::new(
        Arc::new(SqlxLockRepository::new(db.clone())),
        bus.clone(),
        LockSettings {
            lease,
            ..LockSettings::default()
        },
        Counters::default(),
    );
    (service, bus)
}

#[tokio::test]
async fn second_acquirer_sees_the_holder_and_expiry() {
    let db = setup_db().await;
    let tenant = seed_tenant(&db).await;
    let service = build_service(&db, Duration::from_secs(900));

    let doc = Uuid::new_v4();
    let user_a = Uuid::new_v4();
    let user_b = Uuid::new_v4();

    let first = service
        .acquire(tenant, DOC, doc, user_a, None)
        .await
        .unwrap();
    let LockResult::Acquired(lock) = first else {
        panic!("first acquire must win");
    };
    assert_eq!(lock.locked_by_user_id, user_a);

    let second = service
        .acquire(tenant, DOC, doc, user_b, None)
        .await
        .unwrap();
    match second {
        LockResult::AlreadyLocked {
            locked_by,
            expires_at_ms,
        } => {
            assert_eq!(locked_by, user_a);
            assert_eq!(expires_at_ms, lock.expires_at_ms);
        }
        LockResult::Acquired(_) => panic!("lock must be exclusive"),
    }
}

#[tokio::test]
async fn acquire_then_release_leaves_no_live_lock() {
    let db = setup_db().await;
    let tenant = seed_tenant(&db).await;
    let service = build_service(&db, Duration::from_secs(900));

    let doc = Uuid::new_v4();
    let user = Uuid::new_v4();

    service.acquire(tenant, DOC, doc, user, None).await.unwrap();
    assert!(service.release(tenant, DOC, doc, user).await.unwrap());
    assert!(!service.is_locked(tenant, DOC, doc).await.unwrap());
}

#[tokio::test]
async fn only_the_holder_may_release() {
    let db = setup_db().await;
    let tenant = seed_tenant(&db).await;
    let service = build_service(&db, Duration::from_secs(900));

    let doc = Uuid::new_v4();
    let holder = Uuid::new_v4();
    let intruder = Uuid::new_v4();

    service.acquire(tenant, DOC, doc, holder, None).await.unwrap();
    assert!(!service.release(tenant, DOC, doc, intruder).await.unwrap());
    assert!(service.is_locked(tenant, DOC, doc).await.unwrap());
}

#[tokio::test]
async fn refresh_extends_by_the_full_window_and_nothing_else() {
    let db = setup_db().await;
    let tenant = seed_tenant(&db).await;
    let service = build_service(&db, Duration::from_secs(900));

    let doc = Uuid::new_v4();
    let user = Uuid::new_v4();

    let LockResult::Acquired(before) =
        service.acquire(tenant, DOC, doc, user, None).await.unwrap()
    else {
        panic!()
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(service.refresh(tenant, DOC, doc, user).await.unwrap());

    let after = service
        .get_status(tenant, DOC, doc)
        .await
        .unwrap()
        .lock
        .unwrap();
    assert!(after.expires_at_ms > before.expires_at_ms);
    assert_eq!(after.locked_by_user_id, before.locked_by_user_id);
    assert_eq!(after.locked_at_ms, before.locked_at_ms);
}

#[tokio::test]
async fn refresh_cannot_revive_an_expired_lease() {
    let db = setup_db().await;
    let tenant = seed_tenant(&db).await;
    let service = build_service(&db, Duration::from_millis(30));

    let doc = Uuid::new_v4();
    let user = Uuid::new_v4();

    service.acquire(tenant, DOC, doc, user, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!service.refresh(tenant, DOC, doc, user).await.unwrap());
}

#[tokio::test]
async fn lock_exactly_at_expiry_is_already_dead() {
    let db = setup_db().await;
    let tenant = seed_tenant(&db).await;
    let service = build_service(&db, Duration::from_secs(900));

    let doc = Uuid::new_v4();
    let now = now_ms();
    sqlx::query(
        r#"INSERT INTO document_locks
             (tenant_id, document_type, document_id, locked_by_user_id, locked_at_ms, expires_at_ms)
           VALUES (?, ?, ?, ?, ?, ?);"#,
    )
    .bind(tenant.to_string())
    .bind(DOC.as_str())
    .bind(doc.to_string())
    .bind(Uuid::new_v4().to_string())
    .bind((now - 1000) as i64)
    .bind(now as i64)
    .execute(&db)
    .await
    .unwrap();

    assert!(!service.is_locked(tenant, DOC, doc).await.unwrap());

    // and a new acquirer takes over immediately
    let user = Uuid::new_v4();
    let result = service.acquire(tenant, DOC, doc, user, None).await.unwrap();
    assert!(matches!(result, LockResult::Acquired(_)));
}

#[tokio::test]
async fn expired_holder_loses_to_the_next_acquirer() {
    let db = setup_db().await;
    let tenant = seed_tenant(&db).await;
    let service = build_service(&db, Duration::from_millis(30));

    let doc = Uuid::new_v4();
    let user_a = Uuid::new_v4();
    let user_b = Uuid::new_v4();

    service.acquire(tenant, DOC, doc, user_a, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    let result = service.acquire(tenant, DOC, doc, user_b, None).await.unwrap();
    let LockResult::Acquired(lock) = result else {
        panic!("expired lock must not block a new acquirer");
    };
    assert_eq!(lock.locked_by_user_id, user_b);
}

#[tokio::test]
async fn reaper_counts_and_removes_only_dead_locks() {
    let db = setup_db().await;
    let tenant = seed_tenant(&db).await;
    let service = build_service(&db, Duration::from_millis(30));

    for _ in 0..3 {
        service
            .acquire(tenant, DOC, Uuid::new_v4(), Uuid::new_v4(), None)
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(60)).await;

    // one still-live lease must survive the sweep
    let live_service = build_service(&db, Duration::from_secs(900));
    let live_doc = Uuid::new_v4();
    live_service
        .acquire(tenant, DOC, live_doc, Uuid::new_v4(), None)
        .await
        .unwrap();

    assert_eq!(service.cleanup_expired_locks().await.unwrap(), 3);
    assert_eq!(service.cleanup_expired_locks().await.unwrap(), 0);
    assert!(live_service.is_locked(tenant, DOC, live_doc).await.unwrap());
}

#[tracing_test::traced_test]
#[tokio::test]
async fn reaper_sweep_warns_when_unbound_from_any_tenant() {
    let db = setup_db().await;
    let service = build_service(&db, Duration::from_secs(900));

    // the reaper runs with no ambient tenant; the tenant-optional
    // repository records that at warn level
    service.cleanup_expired_locks().await.unwrap();
    assert!(logs_contain("expired-lock sweep running without tenant context"));
}

#[tokio::test]
async fn force_release_is_unconditional_and_audited() {
    let db = setup_db().await;
    let tenant = seed_tenant(&db).await;
    let service = build_service(&db, Duration::from_secs(900));

    let doc = Uuid::new_v4();
    let holder = Uuid::new_v4();
    service.acquire(tenant, DOC, doc, holder, None).await.unwrap();

    assert!(service.force_release(tenant, DOC, doc).await.unwrap());
    assert!(!service.is_locked(tenant, DOC, doc).await.unwrap());
    // releasing again reports nothing to do
    assert!(!service.force_release(tenant, DOC, doc).await.unwrap());

    let audit = sqlx::query(
        "SELECT action, module, previous_value FROM audit_logs WHERE entity_id = ?;",
    )
    .bind(doc.to_string())
    .fetch_one(&db)
    .await
    .unwrap();
    assert_eq!(audit.get::<String, _>("action"), "FORCE_RELEASE");
    assert_eq!(audit.get::<String, _>("module"), "locks");
    let previous: serde_json::Value =
        serde_json::from_str(&audit.get::<String, _>("previous_value")).unwrap();
    assert_eq!(previous["lockedBy"], holder.to_string());
}

#[tokio::test]
async fn user_lock_listing_and_bulk_release() {
    let db = setup_db().await;
    let tenant = seed_tenant(&db).await;
    let service = build_service(&db, Duration::from_secs(900));

    let user = Uuid::new_v4();
    let docs: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    for doc in &docs {
        service.acquire(tenant, DOC, *doc, user, None).await.unwrap();
    }
    // another user's lock stays untouched
    service
        .acquire(tenant, DOC, Uuid::new_v4(), Uuid::new_v4(), None)
        .await
        .unwrap();

    assert_eq!(service.get_user_locks(tenant, user).await.unwrap().len(), 3);
    assert_eq!(service.release_all_user_locks(tenant, user).await.unwrap(), 3);
    assert!(service.get_user_locks(tenant, user).await.unwrap().is_empty());
}

#[tokio::test]
async fn can_edit_tracks_holder_identity() {
    let db = setup_db().await;
    let tenant = seed_tenant(&db).await;
    let service = build_service(&db, Duration::from_secs(900));

    let doc = Uuid::new_v4();
    let holder = Uuid::new_v4();
    let other = Uuid::new_v4();

    assert!(service.can_edit(tenant, DOC, doc, holder).await.unwrap());
    service.acquire(tenant, DOC, doc, holder, None).await.unwrap();
    assert!(service.can_edit(tenant, DOC, doc, holder).await.unwrap());
    assert!(!service.can_edit(tenant, DOC, doc, other).await.unwrap());
}

#[tokio::test]
async fn mutations_broadcast_lock_events() {
    let db = setup_db().await;
    let tenant = seed_tenant(&db).await;
    let (service, bus) = build_service_with_bus(&db, Duration::from_secs(900));

    let doc = Uuid::new_v4();
    let user = Uuid::new_v4();

    service.acquire(tenant, DOC, doc, user, None).await.unwrap();
    let acquired = wait_for_event(&bus, EventType::LockAcquired, 2_000)
        .await
        .expect("expected LOCK_ACQUIRED");
    assert_eq!(acquired.tenant_id, Some(tenant));

    service.release(tenant, DOC, doc, user).await.unwrap();
    wait_for_event(&bus, EventType::LockReleased, 2_000)
        .await
        .expect("expected LOCK_RELEASED");
}

#[tokio::test]
async fn lock_state_is_reachable_through_the_service_envelope() {
    use backend::registry::{ServiceRegistry, ServiceRequest};
    use serde_json::json;

    let db = setup_db().await;
    let tenant = seed_tenant(&db).await;
    let service = build_service(&db, Duration::from_secs(900));

    let registry = ServiceRegistry::new();
    service.register_routes(&registry);

    let doc = Uuid::new_v4();
    let holder = Uuid::new_v4();
    service.acquire(tenant, DOC, doc, holder, None).await.unwrap();

    let res = registry
        .request(
            "locks",
            ServiceRequest::new(
                "GET",
                "/status",
                json!({
                    "tenantId": tenant,
                    "documentType": DOC.as_str(),
                    "documentId": doc,
                }),
            ),
        )
        .await;
    assert!(res.success);
    let data = res.data.unwrap();
    assert_eq!(data["locked"], true);
    assert_eq!(data["lockedBy"], holder.to_string());

    let res = registry
        .request(
            "locks",
            ServiceRequest::new(
                "GET",
                "/can-edit",
                json!({
                    "tenantId": tenant,
                    "documentType": DOC.as_str(),
                    "documentId": doc,
                    "userId": Uuid::new_v4(),
                }),
            ),
        )
        .await;
    assert!(res.success);
    assert_eq!(res.data.unwrap()["canEdit"], false);
}

#[tokio::test]
async fn locks_are_tenant_isolated() {
    let db = setup_db().await;
    let tenant_a = seed_tenant(&db).await;
    let tenant_b = seed_tenant(&db).await;
    let service = build_service(&db, Duration::from_secs(900));

    let doc = Uuid::new_v4();
    service
        .acquire(tenant_a, DOC, doc, Uuid::new_v4(), None)
        .await
        .unwrap();

    // same document id under another tenant is an independent key
    let result = service
        .acquire(tenant_b, DOC, doc, Uuid::new_v4(), None)
        .await
        .unwrap();
    assert!(matches!(result, LockResult::Acquired(_)));
}
