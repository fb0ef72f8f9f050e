use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::error::AppError;
use crate::plans::model::{
    CuttingPlan, NewPlan, OptimizationScenario, PlanData, PlanStatus, ScenarioStatus,
};
use crate::plans::repository::PlanRepository;
use crate::stock::repository_sqlx::i64_to_mm;
use crate::tenant;
use crate::time::now_rfc3339;

pub struct SqlxPlanRepository {
    pool: AnyPool,
}

impl SqlxPlanRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    async fn next_plan_number(&self, tenant_id: &Uuid, scenario_id: &Uuid) -> Result<String, AppError> {
        let row = sqlx::query(
            r#"SELECT COUNT(*) AS n FROM cutting_plans WHERE tenant_id = ? AND scenario_id = ?;"#,
        )
        .bind(tenant_id.to_string())
        .bind(scenario_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.get("n");
        Ok(format!("P-{:05}", n + 1))
    }
}

#[async_trait]
impl PlanRepository for SqlxPlanRepository {
    async fn fetch_scenario(&self, id: &Uuid) -> Result<Option<OptimizationScenario>, AppError> {
        let tenant_id = tenant::current()?;

        let row = sqlx::query(
            r#"
SELECT id, tenant_id, job_id, name, algorithm, kerf,
       CAST(allow_rotation AS INTEGER) AS allow_rotation_i,
       status, parameters_json
FROM optimization_scenarios
WHERE tenant_id = ? AND id = ?;
"#,
        )
        .bind(tenant_id.to_string())
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_scenario(&r)?)),
            None => Ok(None),
        }
    }

    async fn persist_plan(&self, plan: NewPlan) -> Result<PlanData, AppError> {
        let tenant_id = tenant::current()?;
        let plan_number = self.next_plan_number(&tenant_id, &plan.scenario_id).await?;

        let plan_id = Uuid::new_v4();
        let now = now_rfc3339();
        let stock_used_count = plan.stocks.len() as i64;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
INSERT INTO cutting_plans
  (id, tenant_id, scenario_id, plan_number, total_waste, waste_percentage,
   stock_used_count, efficiency, status, created_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'DRAFT', ?);
"#,
        )
        .bind(plan_id.to_string())
        .bind(tenant_id.to_string())
        .bind(plan.scenario_id.to_string())
        .bind(&plan_number)
        .bind(plan.total_waste)
        .bind(plan.waste_percentage)
        .bind(stock_used_count)
        .bind(plan.efficiency)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        for stock in &plan.stocks {
            sqlx::query(
                r#"
INSERT INTO cutting_plan_stock
  (id, plan_id, stock_item_id, sequence, placements_json, waste, waste_percentage)
VALUES (?, ?, ?, ?, ?, ?, ?);
"#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(plan_id.to_string())
            .bind(stock.stock_item_id.to_string())
            .bind(stock.sequence)
            .bind(stock.placements_json.to_string())
            .bind(stock.waste)
            .bind(stock.waste_percentage)
            .execute(&mut *tx)
            .await?;
        }

        for reservation in &plan.reservations {
            let res = sqlx::query(
                r#"
UPDATE stock_items
SET reserved_qty = reserved_qty + ?
WHERE tenant_id = ? AND id = ? AND reserved_qty + ? <= quantity;
"#,
            )
            .bind(reservation.units)
            .bind(tenant_id.to_string())
            .bind(reservation.stock_item_id.to_string())
            .bind(reservation.units)
            .execute(&mut *tx)
            .await?;

            // Guarded update missed: the stock was consumed concurrently.
            // Roll the whole plan back rather than persist partially.
            if res.rows_affected() != 1 {
                tx.rollback().await?;
                return Err(AppError::Conflict(format!(
                    "insufficient stock to reserve {} units of {}",
                    reservation.units, reservation.stock_item_id
                )));
            }
        }

        sqlx::query(
            r#"UPDATE optimization_scenarios SET status = 'COMPLETED' WHERE tenant_id = ? AND id = ?;"#,
        )
        .bind(tenant_id.to_string())
        .bind(plan.scenario_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(PlanData {
            plan_id,
            plan_number,
            efficiency: plan.efficiency,
            waste_percentage: plan.waste_percentage,
            total_waste: plan.total_waste,
            stock_used_count,
        })
    }

    async fn fetch_plan(&self, id: &Uuid) -> Result<Option<CuttingPlan>, AppError> {
        let tenant_id = tenant::current()?;

        let row = sqlx::query(
            r#"
SELECT id, tenant_id, scenario_id, plan_number, total_waste, waste_percentage,
       stock_used_count, efficiency, status, approved_by
FROM cutting_plans
WHERE tenant_id = ? AND id = ?;
"#,
        )
        .bind(tenant_id.to_string())
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_plan(&r)?)),
            None => Ok(None),
        }
    }

    async fn set_plan_status(
        &self,
        plan_id: &Uuid,
        status: PlanStatus,
        approver: Option<Uuid>,
    ) -> Result<(), AppError> {
        let tenant_id = tenant::current()?;
        let now = now_rfc3339();

        let mut tx = self.pool.begin().await?;

        let res = sqlx::query(
            r#"
UPDATE cutting_plans
SET status = ?, approved_by = ?, approved_at = ?
WHERE tenant_id = ? AND id = ?;
"#,
        )
        .bind(status.as_str())
        .bind(approver.map(|u| u.to_string()))
        .bind(matches!(status, PlanStatus::Approved).then_some(now))
        .bind(tenant_id.to_string())
        .bind(plan_id.to_string())
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(AppError::NotFound(format!("cutting plan {plan_id}")));
        }

        if status == PlanStatus::Rejected {
            // A rejected plan gives its stock back, atomically with the
            // status change.
            let rows = sqlx::query(
                r#"
SELECT stock_item_id, COUNT(*) AS units
FROM cutting_plan_stock
WHERE plan_id = ?
GROUP BY stock_item_id;
"#,
            )
            .bind(plan_id.to_string())
            .fetch_all(&mut *tx)
            .await?;

            for r in rows {
                let stock_id: String = r.get("stock_item_id");
                let units: i64 = r.get("units");
                sqlx::query(
                    r#"
UPDATE stock_items
SET reserved_qty = CASE WHEN reserved_qty >= ? THEN reserved_qty - ? ELSE 0 END
WHERE tenant_id = ? AND id = ?;
"#,
                )
                .bind(units)
                .bind(units)
                .bind(tenant_id.to_string())
                .bind(&stock_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

fn row_to_scenario(r: &sqlx::any::AnyRow) -> Result<OptimizationScenario, AppError> {
    let id_s: String = r.get("id");
    let tenant_s: String = r.get("tenant_id");
    let job_s: String = r.get("job_id");
    let status_s: String = r.get("status");
    let params_s: String = r.get("parameters_json");

    Ok(OptimizationScenario {
        id: Uuid::parse_str(&id_s).map_err(|_| AppError::Internal("invalid scenario uuid".into()))?,
        tenant_id: Uuid::parse_str(&tenant_s)
            .map_err(|_| AppError::Internal("invalid tenant uuid".into()))?,
        job_id: Uuid::parse_str(&job_s).map_err(|_| AppError::Internal("invalid job uuid".into()))?,
        name: r.get("name"),
        algorithm: r.get("algorithm"),
        kerf: i64_to_mm(r.get("kerf"))?,
        allow_rotation: r.get::<i64, _>("allow_rotation_i") != 0,
        status: ScenarioStatus::parse(&status_s)
            .ok_or_else(|| AppError::Internal(format!("unknown scenario status {status_s}")))?,
        parameters_json: serde_json::from_str(&params_s).unwrap_or(serde_json::Value::Null),
    })
}

fn row_to_plan(r: &sqlx::any::AnyRow) -> Result<CuttingPlan, AppError> {
    let id_s: String = r.get("id");
    let tenant_s: String = r.get("tenant_id");
    let scenario_s: String = r.get("scenario_id");
    let status_s: String = r.get("status");

    let approved_by = match r.get::<Option<String>, _>("approved_by") {
        None => None,
        Some(s) => Some(
            Uuid::parse_str(&s).map_err(|_| AppError::Internal("invalid approver uuid".into()))?,
        ),
    };

    Ok(CuttingPlan {
        id: Uuid::parse_str(&id_s).map_err(|_| AppError::Internal("invalid plan uuid".into()))?,
        tenant_id: Uuid::parse_str(&tenant_s)
            .map_err(|_| AppError::Internal("invalid tenant uuid".into()))?,
        scenario_id: Uuid::parse_str(&scenario_s)
            .map_err(|_| AppError::Internal("invalid scenario uuid".into()))?,
        plan_number: r.get("plan_number"),
        total_waste: r.get("total_waste"),
        waste_percentage: r.get("waste_percentage"),
        stock_used_count: r.get("stock_used_count"),
        efficiency: r.get("efficiency"),
        status: PlanStatus::parse(&status_s)
            .ok_or_else(|| AppError::Internal(format!("unknown plan status {status_s}")))?,
        approved_by,
    })
}
