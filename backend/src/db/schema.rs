use sqlx::AnyPool;

/// Creates the relational schema. Idempotent; shared between the
/// composition root and test setup. All ids are UUID strings, all
/// dimensions integer millimetres, timestamps RFC 3339 UTC text except
/// lock expiry which is epoch milliseconds for cheap arithmetic.
pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    let statements = [
        r#"
CREATE TABLE IF NOT EXISTS tenants (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  created_at TEXT NOT NULL
);
"#,
        r#"
CREATE TABLE IF NOT EXISTS users (
  id TEXT PRIMARY KEY,
  tenant_id TEXT NOT NULL,
  email TEXT NOT NULL,
  password_hash TEXT NOT NULL,
  first_name TEXT NOT NULL,
  last_name TEXT NOT NULL,
  role_id TEXT,
  is_active BOOLEAN NOT NULL DEFAULT TRUE
);
"#,
        r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_users_tenant_email ON users(tenant_id, email);"#,
        r#"
CREATE TABLE IF NOT EXISTS material_types (
  id TEXT PRIMARY KEY,
  tenant_id TEXT NOT NULL,
  code TEXT NOT NULL,
  name TEXT NOT NULL
);
"#,
        r#"
CREATE TABLE IF NOT EXISTS stock_items (
  id TEXT PRIMARY KEY,
  tenant_id TEXT NOT NULL,
  code TEXT NOT NULL,
  name TEXT NOT NULL,
  material_type_id TEXT NOT NULL,
  thickness BIGINT NOT NULL,
  stock_type TEXT NOT NULL,
  length BIGINT,
  width BIGINT,
  height BIGINT,
  quantity BIGINT NOT NULL,
  reserved_qty BIGINT NOT NULL DEFAULT 0,
  unit_price BIGINT,
  is_from_waste BOOLEAN NOT NULL DEFAULT FALSE,
  location_id TEXT
);
"#,
        r#"CREATE INDEX IF NOT EXISTS idx_stock_material ON stock_items(tenant_id, material_type_id, thickness);"#,
        r#"
CREATE TABLE IF NOT EXISTS orders (
  id TEXT PRIMARY KEY,
  tenant_id TEXT NOT NULL,
  order_number TEXT NOT NULL,
  customer_id TEXT,
  status TEXT NOT NULL,
  created_by TEXT NOT NULL,
  created_at TEXT NOT NULL
);
"#,
        r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_orders_tenant_number ON orders(tenant_id, order_number);"#,
        r#"
CREATE TABLE IF NOT EXISTS order_items (
  id TEXT PRIMARY KEY,
  order_id TEXT NOT NULL,
  item_code TEXT,
  geometry_type TEXT NOT NULL,
  length BIGINT,
  width BIGINT,
  height BIGINT,
  diameter BIGINT,
  material_type_id TEXT NOT NULL,
  thickness BIGINT NOT NULL,
  quantity BIGINT NOT NULL,
  can_rotate BOOLEAN NOT NULL DEFAULT TRUE
);
"#,
        r#"
CREATE TABLE IF NOT EXISTS cutting_jobs (
  id TEXT PRIMARY KEY,
  tenant_id TEXT NOT NULL,
  job_number TEXT NOT NULL,
  material_type_id TEXT NOT NULL,
  thickness BIGINT NOT NULL,
  status TEXT NOT NULL
);
"#,
        r#"
CREATE TABLE IF NOT EXISTS cutting_job_items (
  id TEXT PRIMARY KEY,
  cutting_job_id TEXT NOT NULL,
  order_item_id TEXT NOT NULL,
  quantity BIGINT NOT NULL
);
"#,
        r#"CREATE INDEX IF NOT EXISTS idx_job_items_job ON cutting_job_items(cutting_job_id);"#,
        r#"
CREATE TABLE IF NOT EXISTS optimization_scenarios (
  id TEXT PRIMARY KEY,
  tenant_id TEXT NOT NULL,
  job_id TEXT NOT NULL,
  name TEXT NOT NULL,
  algorithm TEXT,
  kerf BIGINT NOT NULL DEFAULT 0,
  allow_rotation BOOLEAN NOT NULL DEFAULT TRUE,
  status TEXT NOT NULL,
  parameters_json TEXT NOT NULL DEFAULT '{}'
);
"#,
        r#"
CREATE TABLE IF NOT EXISTS cutting_plans (
  id TEXT PRIMARY KEY,
  tenant_id TEXT NOT NULL,
  scenario_id TEXT NOT NULL,
  plan_number TEXT NOT NULL,
  total_waste BIGINT NOT NULL,
  waste_percentage DOUBLE PRECISION NOT NULL,
  stock_used_count BIGINT NOT NULL,
  efficiency DOUBLE PRECISION NOT NULL,
  status TEXT NOT NULL,
  approved_by TEXT,
  approved_at TEXT,
  created_at TEXT NOT NULL
);
"#,
        r#"CREATE INDEX IF NOT EXISTS idx_plans_scenario ON cutting_plans(scenario_id);"#,
        r#"
CREATE TABLE IF NOT EXISTS cutting_plan_stock (
  id TEXT PRIMARY KEY,
  plan_id TEXT NOT NULL,
  stock_item_id TEXT NOT NULL,
  sequence BIGINT NOT NULL,
  placements_json TEXT NOT NULL,
  waste BIGINT NOT NULL,
  waste_percentage DOUBLE PRECISION NOT NULL
);
"#,
        r#"CREATE INDEX IF NOT EXISTS idx_plan_stock_plan ON cutting_plan_stock(plan_id);"#,
        r#"
CREATE TABLE IF NOT EXISTS production_logs (
  id TEXT PRIMARY KEY,
  tenant_id TEXT NOT NULL,
  cutting_plan_id TEXT NOT NULL,
  operator_id TEXT NOT NULL,
  status TEXT NOT NULL,
  actual_time BIGINT,
  actual_waste BIGINT,
  started_at TEXT NOT NULL,
  completed_at TEXT
);
"#,
        r#"
CREATE TABLE IF NOT EXISTS document_locks (
  tenant_id TEXT NOT NULL,
  document_type TEXT NOT NULL,
  document_id TEXT NOT NULL,
  locked_by_user_id TEXT NOT NULL,
  locked_at_ms BIGINT NOT NULL,
  expires_at_ms BIGINT NOT NULL,
  metadata_json TEXT,
  PRIMARY KEY (tenant_id, document_type, document_id)
);
"#,
        r#"CREATE INDEX IF NOT EXISTS idx_locks_user ON document_locks(locked_by_user_id);"#,
        r#"CREATE INDEX IF NOT EXISTS idx_locks_expiry ON document_locks(expires_at_ms);"#,
        r#"
CREATE TABLE IF NOT EXISTS activities (
  id TEXT PRIMARY KEY,
  tenant_id TEXT NOT NULL,
  actor_id TEXT NOT NULL,
  activity_type TEXT NOT NULL,
  target_type TEXT,
  target_id TEXT,
  metadata_json TEXT NOT NULL DEFAULT '{}',
  created_at TEXT NOT NULL
);
"#,
        r#"CREATE INDEX IF NOT EXISTS idx_activities_tenant_time ON activities(tenant_id, created_at);"#,
        r#"
CREATE TABLE IF NOT EXISTS activity_reads (
  user_id TEXT NOT NULL,
  activity_id TEXT NOT NULL,
  read_at TEXT NOT NULL,
  PRIMARY KEY (user_id, activity_id)
);
"#,
        r#"
CREATE TABLE IF NOT EXISTS audit_logs (
  id TEXT PRIMARY KEY,
  tenant_id TEXT NOT NULL,
  user_id TEXT,
  action TEXT NOT NULL,
  module TEXT NOT NULL,
  entity_type TEXT NOT NULL,
  entity_id TEXT NOT NULL,
  previous_value TEXT,
  new_value TEXT,
  created_at TEXT NOT NULL
);
"#,
        r#"CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_logs(tenant_id, entity_type, entity_id);"#,
        r#"
CREATE TABLE IF NOT EXISTS notifications (
  id TEXT PRIMARY KEY,
  tenant_id TEXT NOT NULL,
  user_id TEXT NOT NULL,
  event_type TEXT NOT NULL,
  channel TEXT NOT NULL,
  status TEXT NOT NULL,
  payload_json TEXT NOT NULL DEFAULT '{}',
  sent_at TEXT,
  error TEXT,
  external_id TEXT,
  created_at TEXT NOT NULL
);
"#,
        r#"CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(tenant_id, user_id);"#,
        r#"
CREATE TABLE IF NOT EXISTS notification_preferences (
  tenant_id TEXT NOT NULL,
  user_id TEXT NOT NULL,
  prefs_json TEXT NOT NULL,
  PRIMARY KEY (tenant_id, user_id)
);
"#,
    ];

    for stmt in statements {
        sqlx::query(stmt).execute(pool).await?;
    }

    Ok(())
}
