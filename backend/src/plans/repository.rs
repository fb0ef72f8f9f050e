use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::plans::model::{CuttingPlan, NewPlan, OptimizationScenario, PlanData, PlanStatus};

#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn fetch_scenario(&self, id: &Uuid) -> Result<Option<OptimizationScenario>, AppError>;

    /// Inserts the plan, its per-stock rows, and the stock reservations
    /// in a single transaction, and marks the scenario COMPLETED.
    /// Nothing persists on any failure.
    async fn persist_plan(&self, plan: NewPlan) -> Result<PlanData, AppError>;

    async fn fetch_plan(&self, id: &Uuid) -> Result<Option<CuttingPlan>, AppError>;

    /// Status change; moving to REJECTED releases the plan's stock
    /// reservations within the same transaction.
    async fn set_plan_status(
        &self,
        plan_id: &Uuid,
        status: PlanStatus,
        approver: Option<Uuid>,
    ) -> Result<(), AppError>;
}
