use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockableDocumentType {
    Order,
    CuttingJob,
    CuttingPlan,
    OptimizationScenario,
    StockItem,
}

impl LockableDocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockableDocumentType::Order => "ORDER",
            LockableDocumentType::CuttingJob => "CUTTING_JOB",
            LockableDocumentType::CuttingPlan => "CUTTING_PLAN",
            LockableDocumentType::OptimizationScenario => "OPTIMIZATION_SCENARIO",
            LockableDocumentType::StockItem => "STOCK_ITEM",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ORDER" => Some(LockableDocumentType::Order),
            "CUTTING_JOB" => Some(LockableDocumentType::CuttingJob),
            "CUTTING_PLAN" => Some(LockableDocumentType::CuttingPlan),
            "OPTIMIZATION_SCENARIO" => Some(LockableDocumentType::OptimizationScenario),
            "STOCK_ITEM" => Some(LockableDocumentType::StockItem),
            _ => None,
        }
    }
}

/// Identity of one lockable document within a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub document_type: LockableDocumentType,
    pub document_id: Uuid,
}

/// One exclusive edit lease. Live iff `now < expires_at_ms`; a lock
/// exactly at its expiry is already expired.
#[derive(Debug, Clone)]
pub struct DocumentLock {
    pub tenant_id: Uuid,
    pub document_type: LockableDocumentType,
    pub document_id: Uuid,
    pub locked_by_user_id: Uuid,
    pub locked_at_ms: u64,
    pub expires_at_ms: u64,
    pub metadata_json: Option<Value>,
}

impl DocumentLock {
    pub fn is_live(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms
    }
}

#[derive(Debug, Clone)]
pub enum LockResult {
    Acquired(DocumentLock),
    AlreadyLocked {
        locked_by: Uuid,
        expires_at_ms: u64,
    },
}
