use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioStatus {
    Draft,
    Running,
    Completed,
    Failed,
}

impl ScenarioStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioStatus::Draft => "DRAFT",
            ScenarioStatus::Running => "RUNNING",
            ScenarioStatus::Completed => "COMPLETED",
            ScenarioStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(ScenarioStatus::Draft),
            "RUNNING" => Some(ScenarioStatus::Running),
            "COMPLETED" => Some(ScenarioStatus::Completed),
            "FAILED" => Some(ScenarioStatus::Failed),
            _ => None,
        }
    }
}

/// One parameterization of a packing run over a job. Immutable once
/// COMPLETED.
#[derive(Debug, Clone)]
pub struct OptimizationScenario {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub job_id: Uuid,
    pub name: String,
    pub algorithm: Option<String>,
    pub kerf: u32,
    pub allow_rotation: bool,
    pub status: ScenarioStatus,
    pub parameters_json: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    Draft,
    Approved,
    Rejected,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Draft => "DRAFT",
            PlanStatus::Approved => "APPROVED",
            PlanStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(PlanStatus::Draft),
            "APPROVED" => Some(PlanStatus::Approved),
            "REJECTED" => Some(PlanStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CuttingPlan {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub scenario_id: Uuid,
    pub plan_number: String,
    pub total_waste: i64,
    pub waste_percentage: f64,
    pub stock_used_count: i64,
    pub efficiency: f64,
    pub status: PlanStatus,
    pub approved_by: Option<Uuid>,
}

/// Everything a plan insert needs, persisted in one transaction.
#[derive(Debug, Clone)]
pub struct NewPlan {
    pub scenario_id: Uuid,
    pub total_waste: i64,
    /// Percent, DTO-only float; internal accounting is basis points.
    pub waste_percentage: f64,
    pub efficiency: f64,
    pub stocks: Vec<NewPlanStock>,
    /// Units to reserve per distinct stock item.
    pub reservations: Vec<StockReservation>,
}

/// One distinct stock unit of the plan, with its ordered placements as
/// the serialized strategy output.
#[derive(Debug, Clone)]
pub struct NewPlanStock {
    pub stock_item_id: Uuid,
    pub sequence: i64,
    pub placements_json: Value,
    pub waste: i64,
    pub waste_percentage: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct StockReservation {
    pub stock_item_id: Uuid,
    pub units: i64,
}

/// Identifiers and aggregate metrics of a persisted plan, carried on
/// the completion event.
#[derive(Debug, Clone)]
pub struct PlanData {
    pub plan_id: Uuid,
    pub plan_number: String,
    pub efficiency: f64,
    pub waste_percentage: f64,
    pub total_waste: i64,
    pub stock_used_count: i64,
}
