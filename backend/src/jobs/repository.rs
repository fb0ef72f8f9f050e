use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::jobs::model::{CuttingJob, JobPiece, JobStatus};

#[async_trait]
pub trait CuttingJobRepository: Send + Sync {
    async fn fetch(&self, job_id: &Uuid) -> Result<Option<CuttingJob>, AppError>;

    /// Job items joined with their order items' geometry.
    async fn fetch_pieces(&self, job_id: &Uuid) -> Result<Vec<JobPiece>, AppError>;

    /// Atomically moves the job from `from` to `to`. Fails with
    /// `INVALID_STATE` when the job is not currently in `from` or the
    /// edge is not part of the state machine.
    async fn transition(&self, job_id: &Uuid, from: JobStatus, to: JobStatus)
    -> Result<(), AppError>;

    /// Restart recovery: jobs left OPTIMIZING by a crashed run become
    /// FAILED so their owners can resubmit. Tenant-optional: the boot
    /// path sweeps every tenant.
    async fn recover_interrupted(&self) -> Result<u64, AppError>;
}
