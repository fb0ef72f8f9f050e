use std::time::Duration;

use packing::{Algorithm, PackOptions, PackRequest, PackResult};
use serde::Serialize;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskKind {
    OneD,
    TwoD,
}

/// A unit of pool work. The payload is a self-contained value: workers
/// are shared-nothing and keep no state across tasks.
#[derive(Debug, Clone)]
pub struct PackTask {
    pub id: Uuid,
    pub kind: TaskKind,
    pub algorithm: Algorithm,
    pub request: PackRequest,
    pub options: PackOptions,
    /// Wall-clock ceiling the pool enforces, independent of any
    /// deadline the strategy itself observes.
    pub timeout: Duration,
    /// Submission time as stamped by the producer.
    pub created_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskPhase {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl TaskPhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskPhase::Queued | TaskPhase::Running)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskProgress {
    pub task_id: Uuid,
    pub phase: TaskPhase,
    /// Fraction of pieces processed, in `[0, 1]`.
    pub progress: f64,
    pub message: Option<String>,
    pub started_at_ms: Option<u64>,
    pub completed_at_ms: Option<u64>,
}

/// Receiver side of one submission. Dropping it abandons the result
/// but not the task; use `WorkerPool::cancel` for that.
#[derive(Debug)]
pub struct TaskHandle {
    pub id: Uuid,
    pub(crate) rx: oneshot::Receiver<Result<PackResult, AppError>>,
}

impl TaskHandle {
    pub async fn join(self) -> Result<PackResult, AppError> {
        self.rx
            .await
            .map_err(|_| AppError::Internal("worker dropped result channel".into()))?
    }
}
