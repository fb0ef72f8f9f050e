use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cutting-job lifecycle. Transitions are CAS-guarded at the
/// repository so concurrent actors cannot race a job through an
/// illegal edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Optimizing,
    Optimized,
    InProduction,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Optimizing => "OPTIMIZING",
            JobStatus::Optimized => "OPTIMIZED",
            JobStatus::InProduction => "IN_PRODUCTION",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "OPTIMIZING" => Some(JobStatus::Optimizing),
            "OPTIMIZED" => Some(JobStatus::Optimized),
            "IN_PRODUCTION" => Some(JobStatus::InProduction),
            "COMPLETED" => Some(JobStatus::Completed),
            "FAILED" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (from, to),
            (Pending, Optimizing)
                | (Optimizing, Optimized)
                | (Optimizing, Failed)
                | (Optimized, InProduction)
                | (InProduction, Completed)
        )
    }
}

/// A grouping of order items sharing material and thickness, eligible
/// for joint packing.
#[derive(Debug, Clone)]
pub struct CuttingJob {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub job_number: String,
    pub material_type_id: Uuid,
    pub thickness: u32,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryType {
    Bar,
    Sheet,
    Circle,
}

impl GeometryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryType::Bar => "BAR",
            GeometryType::Sheet => "SHEET",
            GeometryType::Circle => "CIRCLE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BAR" => Some(GeometryType::Bar),
            "SHEET" => Some(GeometryType::Sheet),
            "CIRCLE" => Some(GeometryType::Circle),
            _ => None,
        }
    }

    pub fn is_one_dimensional(&self) -> bool {
        matches!(self, GeometryType::Bar)
    }
}

/// A job item joined with its order item's geometry: what the packing
/// run actually needs.
#[derive(Debug, Clone)]
pub struct JobPiece {
    pub order_item_id: Uuid,
    pub geometry: GeometryType,
    pub length: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub diameter: Option<u32>,
    pub quantity: u32,
    pub can_rotate: bool,
}
