//! Production tracking against approved cutting plans.
//!
//! The first log for a plan moves its job OPTIMIZED -> IN_PRODUCTION;
//! the job finishes IN_PRODUCTION -> COMPLETED when its operator marks
//! the work accounted for. Both edges run through the jobs CAS so
//! concurrent operators cannot double-apply them.

use std::sync::Arc;

use sqlx::{AnyPool, Row};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::AppError;
use crate::jobs::model::JobStatus;
use crate::jobs::repository::CuttingJobRepository;
use crate::tenant;
use crate::time::now_rfc3339;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductionStatus {
    Started,
    Paused,
    Completed,
    Failed,
}

impl ProductionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductionStatus::Started => "STARTED",
            ProductionStatus::Paused => "PAUSED",
            ProductionStatus::Completed => "COMPLETED",
            ProductionStatus::Failed => "FAILED",
        }
    }
}

pub struct ProductionService {
    pool: AnyPool,
    jobs: Arc<dyn CuttingJobRepository>,
}

impl ProductionService {
    pub fn new(pool: AnyPool, jobs: Arc<dyn CuttingJobRepository>) -> Arc<Self> {
        Arc::new(Self { pool, jobs })
    }

    /// Opens a production log for the plan. The first log of a job
    /// also moves it into IN_PRODUCTION.
    #[instrument(skip(self), target = "production", fields(plan_id = %cutting_plan_id))]
    pub async fn start(
        &self,
        cutting_plan_id: Uuid,
        cutting_job_id: Uuid,
        operator_id: Uuid,
    ) -> Result<Uuid, AppError> {
        let tenant_id = tenant::current()?;

        let existing = sqlx::query(
            r#"
SELECT COUNT(*) AS n
FROM production_logs p
JOIN cutting_plans cp ON cp.id = p.cutting_plan_id
JOIN optimization_scenarios s ON s.id = cp.scenario_id
WHERE p.tenant_id = ? AND s.job_id = ?;
"#,
        )
        .bind(tenant_id.to_string())
        .bind(cutting_job_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        let first_log = existing.get::<i64, _>("n") == 0;

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
INSERT INTO production_logs
  (id, tenant_id, cutting_plan_id, operator_id, status, started_at)
VALUES (?, ?, ?, ?, 'STARTED', ?);
"#,
        )
        .bind(id.to_string())
        .bind(tenant_id.to_string())
        .bind(cutting_plan_id.to_string())
        .bind(operator_id.to_string())
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;

        if first_log {
            self.jobs
                .transition(&cutting_job_id, JobStatus::Optimized, JobStatus::InProduction)
                .await?;
            info!(job_id = %cutting_job_id, "job entered production");
        }

        Ok(id)
    }

    pub async fn finish_log(
        &self,
        log_id: Uuid,
        status: ProductionStatus,
        actual_time: Option<i64>,
        actual_waste: Option<i64>,
    ) -> Result<(), AppError> {
        let tenant_id = tenant::current()?;

        let res = sqlx::query(
            r#"
UPDATE production_logs
SET status = ?, actual_time = ?, actual_waste = ?, completed_at = ?
WHERE tenant_id = ? AND id = ?;
"#,
        )
        .bind(status.as_str())
        .bind(actual_time)
        .bind(actual_waste)
        .bind(now_rfc3339())
        .bind(tenant_id.to_string())
        .bind(log_id.to_string())
        .execute(&self.pool)
        .await?;

        if res.rows_affected() != 1 {
            return Err(AppError::NotFound(format!("production log {log_id}")));
        }
        Ok(())
    }

    /// All items accounted for: the job leaves production.
    pub async fn complete_job(&self, cutting_job_id: Uuid) -> Result<(), AppError> {
        self.jobs
            .transition(&cutting_job_id, JobStatus::InProduction, JobStatus::Completed)
            .await
    }
}
