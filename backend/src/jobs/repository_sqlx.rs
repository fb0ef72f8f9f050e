use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::error::AppError;
use crate::jobs::model::{CuttingJob, GeometryType, JobPiece, JobStatus};
use crate::jobs::repository::CuttingJobRepository;
use crate::stock::repository_sqlx::i64_to_mm;
use crate::tenant;

pub struct SqlxCuttingJobRepository {
    pool: AnyPool,
}

impl SqlxCuttingJobRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CuttingJobRepository for SqlxCuttingJobRepository {
    async fn fetch(&self, job_id: &Uuid) -> Result<Option<CuttingJob>, AppError> {
        let tenant_id = tenant::current()?;

        let row = sqlx::query(
            r#"
SELECT id, tenant_id, job_number, material_type_id, thickness, status
FROM cutting_jobs
WHERE tenant_id = ? AND id = ?;
"#,
        )
        .bind(tenant_id.to_string())
        .bind(job_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_job(&r)?)),
            None => Ok(None),
        }
    }

    async fn fetch_pieces(&self, job_id: &Uuid) -> Result<Vec<JobPiece>, AppError> {
        let tenant_id = tenant::current()?;

        let rows = sqlx::query(
            r#"
SELECT
  ji.order_item_id, ji.quantity AS job_quantity,
  oi.geometry_type, oi.length, oi.width, oi.height, oi.diameter,
  CAST(oi.can_rotate AS INTEGER) AS can_rotate_i
FROM cutting_job_items ji
JOIN cutting_jobs j ON j.id = ji.cutting_job_id
JOIN order_items oi ON oi.id = ji.order_item_id
WHERE j.tenant_id = ? AND ji.cutting_job_id = ?
ORDER BY ji.id;
"#,
        )
        .bind(tenant_id.to_string())
        .bind(job_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            let geometry_s: String = r.get("geometry_type");
            let geometry = GeometryType::parse(&geometry_s)
                .ok_or_else(|| AppError::Internal(format!("unknown geometry {geometry_s}")))?;

            let opt_mm = |field: &str| -> Result<Option<u32>, AppError> {
                match r.get::<Option<i64>, _>(field) {
                    None => Ok(None),
                    Some(v) => Ok(Some(i64_to_mm(v)?)),
                }
            };

            let id_s: String = r.get("order_item_id");
            out.push(JobPiece {
                order_item_id: Uuid::parse_str(&id_s)
                    .map_err(|_| AppError::Internal("invalid order item uuid".into()))?,
                geometry,
                length: opt_mm("length")?,
                width: opt_mm("width")?,
                height: opt_mm("height")?,
                diameter: opt_mm("diameter")?,
                quantity: i64_to_mm(r.get("job_quantity"))?,
                can_rotate: r.get::<i64, _>("can_rotate_i") != 0,
            });
        }
        Ok(out)
    }

    async fn transition(
        &self,
        job_id: &Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<(), AppError> {
        let tenant_id = tenant::current()?;

        if !JobStatus::can_transition(from, to) {
            return Err(AppError::InvalidState(format!(
                "cutting job may not move {} -> {}",
                from.as_str(),
                to.as_str()
            )));
        }

        let res = sqlx::query(
            r#"UPDATE cutting_jobs SET status = ? WHERE tenant_id = ? AND id = ? AND status = ?;"#,
        )
        .bind(to.as_str())
        .bind(tenant_id.to_string())
        .bind(job_id.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        // CAS miss: either the job is gone or someone else moved it first.
        if res.rows_affected() != 1 {
            return match self.fetch(job_id).await? {
                None => Err(AppError::NotFound(format!("cutting job {job_id}"))),
                Some(job) => Err(AppError::InvalidState(format!(
                    "cutting job is {}, expected {}",
                    job.status.as_str(),
                    from.as_str()
                ))),
            };
        }
        Ok(())
    }

    async fn recover_interrupted(&self) -> Result<u64, AppError> {
        if tenant::current_optional().is_none() {
            tracing::warn!("cutting job recovery running without tenant context (boot sweep)");
        }

        let res = sqlx::query(r#"UPDATE cutting_jobs SET status = 'FAILED' WHERE status = 'OPTIMIZING';"#)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }
}

fn row_to_job(r: &sqlx::any::AnyRow) -> Result<CuttingJob, AppError> {
    let id_s: String = r.get("id");
    let tenant_s: String = r.get("tenant_id");
    let material_s: String = r.get("material_type_id");
    let status_s: String = r.get("status");

    Ok(CuttingJob {
        id: Uuid::parse_str(&id_s).map_err(|_| AppError::Internal("invalid job uuid".into()))?,
        tenant_id: Uuid::parse_str(&tenant_s)
            .map_err(|_| AppError::Internal("invalid tenant uuid".into()))?,
        job_number: r.get("job_number"),
        material_type_id: Uuid::parse_str(&material_s)
            .map_err(|_| AppError::Internal("invalid material uuid".into()))?,
        thickness: i64_to_mm(r.get("thickness"))?,
        status: JobStatus::parse(&status_s)
            .ok_or_else(|| AppError::Internal(format!("unknown job status {status_s}")))?,
    })
}
