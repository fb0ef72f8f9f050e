//! Activity feed and audit trail against in-memory SQLite.

mod support;

use std::sync::Arc;

use serde_json::json;
use sqlx::Row;
use uuid::Uuid;

use backend::activity::model::{ActivityFilter, NewActivity};
use backend::activity::repository_sqlx::SqlxActivityRepository;
use backend::activity::service::ActivityFeedService;
use backend::audit::{AuditEntry, AuditQuery, AuditService};
use backend::bus::{EventBus, EventType};
use backend::config::NotificationSettings;
use backend::error::AppError;
use backend::metrics::counters::Counters;
use backend::notifications::channels::{ChannelAdapter, InAppChannel};
use backend::notifications::repository_sqlx::{
    SqlxNotificationRepository, SqlxPreferencesRepository,
};
use backend::notifications::service::NotificationService;
use backend::subscribers::MentionNotifier;
use backend::tenant;

use support::{seed_tenant, setup_db, wait_for_event};

fn feed(db: &sqlx::AnyPool, bus: Arc<EventBus>) -> Arc<ActivityFeedService> {
    ActivityFeedService::new(Arc::new(SqlxActivityRepository::new(db.clone())), bus)
}

fn mk_activity(actor: Uuid, target: Option<(&str, &str)>) -> NewActivity {
    NewActivity {
        actor_id: actor,
        activity_type: "PLAN_APPROVED".into(),
        target_type: target.map(|(t, _)| t.to_string()),
        target_id: target.map(|(_, id)| id.to_string()),
        metadata_json: json!({}),
    }
}

#[tokio::test]
async fn repository_without_tenant_context_is_rejected() {
    let db = setup_db().await;
    let repo = SqlxActivityRepository::new(db.clone());

    let err = repo.query(&ActivityFilter::default()).await.unwrap_err();
    assert_eq!(err.code(), "NO_TENANT_CONTEXT");

    let audit = AuditService::new(db.clone());
    let err = audit
        .record(AuditEntry {
            user_id: None,
            action: "X".into(),
            module: "m".into(),
            entity_type: "e".into(),
            entity_id: "1".into(),
            previous_value: None,
            new_value: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NO_TENANT_CONTEXT");
}

#[tokio::test]
async fn recorded_activity_is_queryable_by_entity_and_actor() {
    let db = setup_db().await;
    let tenant = seed_tenant(&db).await;
    let bus = EventBus::new(Counters::default());
    let service = feed(&db, bus);

    let actor = Uuid::new_v4();
    let plan_id = Uuid::new_v4().to_string();

    tenant::run(tenant, async {
        service
            .record_activity(mk_activity(actor, Some(("cutting_plan", &plan_id))))
            .await
            .unwrap();
        service
            .record_activity(mk_activity(Uuid::new_v4(), None))
            .await
            .unwrap();
    })
    .await;

    let by_entity = service
        .get_document_activities(tenant, "cutting_plan", &plan_id, 10)
        .await
        .unwrap();
    assert_eq!(by_entity.len(), 1);
    assert_eq!(by_entity[0].actor_id, actor);

    let by_actor = service
        .get_activities(
            tenant,
            ActivityFilter {
                actor_id: Some(actor),
                limit: 10,
                ..ActivityFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(by_actor.len(), 1);
}

#[tokio::test]
async fn mentions_fan_out_to_notifications_through_the_bus() {
    let db = setup_db().await;
    let tenant = seed_tenant(&db).await;
    let bus = EventBus::new(Counters::default());
    let service = feed(&db, bus.clone());

    let adapters: Vec<Arc<dyn ChannelAdapter>> = vec![Arc::new(InAppChannel)];
    let notifications = NotificationService::new(
        Arc::new(SqlxNotificationRepository::new(db.clone())),
        Arc::new(SqlxPreferencesRepository::new(db.clone())),
        adapters,
        NotificationSettings::default(),
        Counters::default(),
    );
    MentionNotifier::new(notifications).register(&bus);

    let mentioned = Uuid::new_v4();
    tenant::run(tenant, async {
        service
            .record_activity(NewActivity {
                actor_id: Uuid::new_v4(),
                activity_type: "COMMENT_ADDED".into(),
                target_type: Some("order".into()),
                target_id: Some(Uuid::new_v4().to_string()),
                metadata_json: json!({ "mentionedUserIds": [mentioned.to_string()] }),
            })
            .await
            .unwrap();
    })
    .await;

    wait_for_event(&bus, EventType::Mention, 2_000)
        .await
        .expect("expected MENTION event");

    // the subscriber records an in-app notification row for the user
    for _ in 0..100 {
        let n: i64 = sqlx::query("SELECT COUNT(*) AS n FROM notifications WHERE user_id = ?;")
            .bind(mentioned.to_string())
            .fetch_one(&db)
            .await
            .unwrap()
            .get("n");
        if n == 1 {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("mention notification row never appeared");
}

#[tokio::test]
async fn unread_count_and_idempotent_mark_as_read() {
    let db = setup_db().await;
    let tenant = seed_tenant(&db).await;
    let bus = EventBus::new(Counters::default());
    let service = feed(&db, bus);

    let reader = Uuid::new_v4();
    let ids = tenant::run(tenant, async {
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(
                service
                    .record_activity(mk_activity(Uuid::new_v4(), None))
                    .await
                    .unwrap()
                    .id,
            );
        }
        ids
    })
    .await;

    tenant::run(tenant, async {
        assert_eq!(service.get_unread_count(reader).await.unwrap(), 3);

        assert_eq!(service.mark_as_read(reader, &ids[..2]).await.unwrap(), 2);
        assert_eq!(service.get_unread_count(reader).await.unwrap(), 1);

        // marking the same ids again changes nothing
        assert_eq!(service.mark_as_read(reader, &ids[..2]).await.unwrap(), 0);
        assert_eq!(service.get_unread_count(reader).await.unwrap(), 1);

        service.mark_all_as_read(reader).await.unwrap();
        assert_eq!(service.get_unread_count(reader).await.unwrap(), 0);
    })
    .await;
}

#[tokio::test]
async fn mentions_listing_finds_the_users_activities() {
    let db = setup_db().await;
    let tenant = seed_tenant(&db).await;
    let bus = EventBus::new(Counters::default());
    let service = feed(&db, bus);

    let mentioned = Uuid::new_v4();
    tenant::run(tenant, async {
        service
            .record_activity(NewActivity {
                actor_id: Uuid::new_v4(),
                activity_type: "COMMENT_ADDED".into(),
                target_type: None,
                target_id: None,
                metadata_json: json!({ "mentionedUserIds": [mentioned.to_string()] }),
            })
            .await
            .unwrap();
        service
            .record_activity(mk_activity(Uuid::new_v4(), None))
            .await
            .unwrap();

        let mentions = service.get_mentions(mentioned).await.unwrap();
        assert_eq!(mentions.len(), 1);
    })
    .await;
}

#[tokio::test]
async fn audit_row_commits_with_the_mutation() {
    let db = setup_db().await;
    let tenant = seed_tenant(&db).await;
    let audit = AuditService::new(db.clone());

    let entity_id = Uuid::new_v4().to_string();
    let entry = AuditEntry {
        user_id: Some(Uuid::new_v4()),
        action: "UPDATE".into(),
        module: "stock".into(),
        entity_type: "stock_item".into(),
        entity_id: entity_id.clone(),
        previous_value: Some(json!({"quantity": 5})),
        new_value: Some(json!({"quantity": 7})),
    };

    tenant::run(tenant, async {
        audit
            .with_audit(entry, |conn: &mut sqlx::AnyConnection| {
                Box::pin(async move {
                    sqlx::query("INSERT INTO material_types (id, tenant_id, code, name) VALUES (?, ?, 'X', 'X');")
                        .bind(Uuid::new_v4().to_string())
                        .bind(Uuid::new_v4().to_string())
                        .execute(conn)
                        .await
                        .map_err(AppError::from)?;
                    Ok(())
                })
            })
            .await
            .unwrap();

        let history = audit.entity_history("stock_item", &entity_id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, "UPDATE");
        assert_eq!(history[0].new_value, Some(json!({"quantity": 7})));
    })
    .await;
}

#[tokio::test]
async fn failed_mutation_leaves_no_audit_row() {
    let db = setup_db().await;
    let tenant = seed_tenant(&db).await;
    let audit = AuditService::new(db.clone());

    let entity_id = Uuid::new_v4().to_string();
    let entry = AuditEntry {
        user_id: None,
        action: "UPDATE".into(),
        module: "stock".into(),
        entity_type: "stock_item".into(),
        entity_id: entity_id.clone(),
        previous_value: None,
        new_value: None,
    };

    tenant::run(tenant, async {
        let result: Result<(), AppError> = audit
            .with_audit(entry, |_conn: &mut sqlx::AnyConnection| {
                Box::pin(async { Err(AppError::Conflict("mutation rejected".into())) })
            })
            .await;
        assert!(result.is_err());

        let history = audit.entity_history("stock_item", &entity_id, 10).await.unwrap();
        assert!(history.is_empty());
    })
    .await;
}

#[tokio::test]
async fn audit_queries_filter_and_clamp() {
    let db = setup_db().await;
    let tenant = seed_tenant(&db).await;
    let audit = AuditService::new(db.clone());

    let user = Uuid::new_v4();
    tenant::run(tenant, async {
        for i in 0..5 {
            audit
                .record(AuditEntry {
                    user_id: Some(user),
                    action: if i % 2 == 0 { "CREATE" } else { "DELETE" }.into(),
                    module: "orders".into(),
                    entity_type: "order".into(),
                    entity_id: format!("o{i}"),
                    previous_value: None,
                    new_value: None,
                })
                .await
                .unwrap();
        }

        let creates = audit
            .query(&AuditQuery {
                action: Some("CREATE".into()),
                user_id: Some(user),
                limit: 10_000, // clamped to the 500 ceiling internally
                ..AuditQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(creates.len(), 3);
        assert!(creates.iter().all(|r| r.action == "CREATE"));

        // newest first
        let all = audit
            .query(&AuditQuery {
                module: Some("orders".into()),
                limit: 500,
                ..AuditQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 5);
        assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    })
    .await;
}

#[tokio::test]
async fn audit_is_tenant_isolated() {
    let db = setup_db().await;
    let tenant_a = seed_tenant(&db).await;
    let tenant_b = seed_tenant(&db).await;
    let audit = AuditService::new(db.clone());

    tenant::run(tenant_a, async {
        audit
            .record(AuditEntry {
                user_id: None,
                action: "CREATE".into(),
                module: "orders".into(),
                entity_type: "order".into(),
                entity_id: "o1".into(),
                previous_value: None,
                new_value: None,
            })
            .await
            .unwrap();
    })
    .await;

    let other_tenant_view = tenant::run(tenant_b, async {
        audit
            .query(&AuditQuery {
                limit: 100,
                ..AuditQuery::default()
            })
            .await
            .unwrap()
    })
    .await;
    assert!(other_tenant_view.is_empty());
}
