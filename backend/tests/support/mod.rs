//! Shared test fixtures: isolated in-memory databases and seeded
//! domain rows.
#![allow(dead_code)]

use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use uuid::Uuid;

use backend::bus::{EventBus, EventType};
use backend::db::schema;
use backend::time::now_rfc3339;

/// Isolated, uniquely-named in-memory SQLite database. The unique name
/// keeps parallel tests apart while shared cache lets one test's pool
/// connections see the same data.
pub async fn setup_db() -> AnyPool {
    sqlx::any::install_default_drivers();

    let db_name = Uuid::new_v4().to_string();
    let conn_str = format!("sqlite:file:{}?mode=memory&cache=shared", db_name);

    let pool = AnyPoolOptions::new()
        .max_connections(5)
        .connect(&conn_str)
        .await
        .unwrap();

    schema::migrate(&pool).await.unwrap();
    pool
}

pub async fn seed_tenant(pool: &AnyPool) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO tenants (id, name, created_at) VALUES (?, ?, ?);")
        .bind(id.to_string())
        .bind("Test Tenant")
        .bind(now_rfc3339())
        .execute(pool)
        .await
        .unwrap();
    id
}

pub struct JobWorld {
    pub tenant_id: Uuid,
    pub material_id: Uuid,
    pub stock_item_id: Uuid,
    pub job_id: Uuid,
    pub scenario_id: Uuid,
}

/// Seeds a 1D world: one 6000 mm bar class and a PENDING job holding
/// bar items of the given lengths.
pub async fn seed_bar_job(pool: &AnyPool, bar_length: i64, bar_qty: i64, lengths: &[i64]) -> JobWorld {
    let tenant_id = seed_tenant(pool).await;
    let material_id = Uuid::new_v4();
    let stock_item_id = Uuid::new_v4();

    sqlx::query("INSERT INTO material_types (id, tenant_id, code, name) VALUES (?, ?, 'ST37', 'Steel');")
        .bind(material_id.to_string())
        .bind(tenant_id.to_string())
        .execute(pool)
        .await
        .unwrap();

    sqlx::query(
        r#"
INSERT INTO stock_items
  (id, tenant_id, code, name, material_type_id, thickness, stock_type, length, quantity, reserved_qty)
VALUES (?, ?, 'BAR-6000', '6m bar', ?, 5, 'BAR_1D', ?, ?, 0);
"#,
    )
    .bind(stock_item_id.to_string())
    .bind(tenant_id.to_string())
    .bind(material_id.to_string())
    .bind(bar_length)
    .bind(bar_qty)
    .execute(pool)
    .await
    .unwrap();

    let order_id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO orders (id, tenant_id, order_number, status, created_by, created_at)
           VALUES (?, ?, 'ORD-1', 'OPEN', ?, ?);"#,
    )
    .bind(order_id.to_string())
    .bind(tenant_id.to_string())
    .bind(Uuid::new_v4().to_string())
    .bind(now_rfc3339())
    .execute(pool)
    .await
    .unwrap();

    let job_id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO cutting_jobs (id, tenant_id, job_number, material_type_id, thickness, status)
           VALUES (?, ?, 'JOB-1', ?, 5, 'PENDING');"#,
    )
    .bind(job_id.to_string())
    .bind(tenant_id.to_string())
    .bind(material_id.to_string())
    .execute(pool)
    .await
    .unwrap();

    for length in lengths {
        let item_id = Uuid::new_v4();
        sqlx::query(
            r#"INSERT INTO order_items
                 (id, order_id, geometry_type, length, material_type_id, thickness, quantity, can_rotate)
               VALUES (?, ?, 'BAR', ?, ?, 5, 1, 0);"#,
        )
        .bind(item_id.to_string())
        .bind(order_id.to_string())
        .bind(length)
        .bind(material_id.to_string())
        .execute(pool)
        .await
        .unwrap();

        sqlx::query(
            r#"INSERT INTO cutting_job_items (id, cutting_job_id, order_item_id, quantity)
               VALUES (?, ?, ?, 1);"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(job_id.to_string())
        .bind(item_id.to_string())
        .execute(pool)
        .await
        .unwrap();
    }

    let scenario_id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO optimization_scenarios
             (id, tenant_id, job_id, name, kerf, allow_rotation, status)
           VALUES (?, ?, ?, 'baseline', 3, 0, 'DRAFT');"#,
    )
    .bind(scenario_id.to_string())
    .bind(tenant_id.to_string())
    .bind(job_id.to_string())
    .execute(pool)
    .await
    .unwrap();

    JobWorld {
        tenant_id,
        material_id,
        stock_item_id,
        job_id,
        scenario_id,
    }
}

/// Seeds a 2D world: sheet stock plus one sheet item repeated
/// `quantity` times, for driving heavy or rotated packs.
pub async fn seed_sheet_job(
    pool: &AnyPool,
    sheet: (i64, i64, i64),
    piece: (i64, i64, i64),
) -> JobWorld {
    let (sheet_w, sheet_h, sheet_qty) = sheet;
    let (piece_w, piece_h, piece_qty) = piece;

    let tenant_id = seed_tenant(pool).await;
    let material_id = Uuid::new_v4();
    let stock_item_id = Uuid::new_v4();

    sqlx::query("INSERT INTO material_types (id, tenant_id, code, name) VALUES (?, ?, 'MDF', 'MDF');")
        .bind(material_id.to_string())
        .bind(tenant_id.to_string())
        .execute(pool)
        .await
        .unwrap();

    sqlx::query(
        r#"
INSERT INTO stock_items
  (id, tenant_id, code, name, material_type_id, thickness, stock_type, width, height, quantity, reserved_qty)
VALUES (?, ?, 'SHEET', 'Sheet', ?, 18, 'SHEET_2D', ?, ?, ?, 0);
"#,
    )
    .bind(stock_item_id.to_string())
    .bind(tenant_id.to_string())
    .bind(material_id.to_string())
    .bind(sheet_w)
    .bind(sheet_h)
    .bind(sheet_qty)
    .execute(pool)
    .await
    .unwrap();

    let order_id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO orders (id, tenant_id, order_number, status, created_by, created_at)
           VALUES (?, ?, 'ORD-2D', 'OPEN', ?, ?);"#,
    )
    .bind(order_id.to_string())
    .bind(tenant_id.to_string())
    .bind(Uuid::new_v4().to_string())
    .bind(now_rfc3339())
    .execute(pool)
    .await
    .unwrap();

    let job_id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO cutting_jobs (id, tenant_id, job_number, material_type_id, thickness, status)
           VALUES (?, ?, 'JOB-2D', ?, 18, 'PENDING');"#,
    )
    .bind(job_id.to_string())
    .bind(tenant_id.to_string())
    .bind(material_id.to_string())
    .execute(pool)
    .await
    .unwrap();

    let item_id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO order_items
             (id, order_id, geometry_type, width, height, material_type_id, thickness, quantity, can_rotate)
           VALUES (?, ?, 'SHEET', ?, ?, ?, 18, ?, 1);"#,
    )
    .bind(item_id.to_string())
    .bind(order_id.to_string())
    .bind(piece_w)
    .bind(piece_h)
    .bind(material_id.to_string())
    .bind(piece_qty)
    .execute(pool)
    .await
    .unwrap();

    sqlx::query(
        r#"INSERT INTO cutting_job_items (id, cutting_job_id, order_item_id, quantity)
           VALUES (?, ?, ?, ?);"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(job_id.to_string())
    .bind(item_id.to_string())
    .bind(piece_qty)
    .execute(pool)
    .await
    .unwrap();

    let scenario_id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO optimization_scenarios
             (id, tenant_id, job_id, name, kerf, allow_rotation, status)
           VALUES (?, ?, ?, 'sheets', 0, 1, 'DRAFT');"#,
    )
    .bind(scenario_id.to_string())
    .bind(tenant_id.to_string())
    .bind(job_id.to_string())
    .execute(pool)
    .await
    .unwrap();

    JobWorld {
        tenant_id,
        material_id,
        stock_item_id,
        job_id,
        scenario_id,
    }
}

/// Polls the bus's recent ring for an event of the given type.
pub async fn wait_for_event(
    bus: &EventBus,
    event_type: EventType,
    timeout_ms: u64,
) -> Option<backend::bus::Event> {
    let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    loop {
        if let Some(event) = bus
            .get_recent_events(usize::MAX)
            .into_iter()
            .find(|e| e.event_type == event_type)
        {
            return Some(event);
        }
        if std::time::Instant::now() > deadline {
            return None;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
