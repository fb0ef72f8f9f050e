use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::tenant;

/// The event taxonomy. Wire names are SCREAMING_SNAKE and stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    OptimizationRunRequested,
    OptimizationCompleted,
    OptimizationFailed,
    StockLow,
    OrderCreated,
    OrderStatusChanged,
    OrderCompleted,
    LockAcquired,
    LockReleased,
    Mention,
    DocumentShared,
    CommentAdded,
    ActivityRecorded,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OptimizationRunRequested => "OPTIMIZATION_RUN_REQUESTED",
            EventType::OptimizationCompleted => "OPTIMIZATION_COMPLETED",
            EventType::OptimizationFailed => "OPTIMIZATION_FAILED",
            EventType::StockLow => "STOCK_LOW",
            EventType::OrderCreated => "ORDER_CREATED",
            EventType::OrderStatusChanged => "ORDER_STATUS_CHANGED",
            EventType::OrderCompleted => "ORDER_COMPLETED",
            EventType::LockAcquired => "LOCK_ACQUIRED",
            EventType::LockReleased => "LOCK_RELEASED",
            EventType::Mention => "MENTION",
            EventType::DocumentShared => "DOCUMENT_SHARED",
            EventType::CommentAdded => "COMMENT_ADDED",
            EventType::ActivityRecorded => "ACTIVITY_RECORDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPTIMIZATION_RUN_REQUESTED" => Some(EventType::OptimizationRunRequested),
            "OPTIMIZATION_COMPLETED" => Some(EventType::OptimizationCompleted),
            "OPTIMIZATION_FAILED" => Some(EventType::OptimizationFailed),
            "STOCK_LOW" => Some(EventType::StockLow),
            "ORDER_CREATED" => Some(EventType::OrderCreated),
            "ORDER_STATUS_CHANGED" => Some(EventType::OrderStatusChanged),
            "ORDER_COMPLETED" => Some(EventType::OrderCompleted),
            "LOCK_ACQUIRED" => Some(EventType::LockAcquired),
            "LOCK_RELEASED" => Some(EventType::LockReleased),
            "MENTION" => Some(EventType::Mention),
            "DOCUMENT_SHARED" => Some(EventType::DocumentShared),
            "COMMENT_ADDED" => Some(EventType::CommentAdded),
            "ACTIVITY_RECORDED" => Some(EventType::ActivityRecorded),
            _ => None,
        }
    }
}

/// The envelope every subscriber sees. `tenant_id` defaults to the
/// publisher's ambient binding so handlers run under the right tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub aggregate: String,
    pub aggregate_id: String,
    pub payload: Value,
    pub tenant_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    pub fn new(
        event_type: EventType,
        aggregate: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            event_type,
            aggregate: aggregate.into(),
            aggregate_id: aggregate_id.into(),
            payload,
            tenant_id: tenant::current_optional(),
            correlation_id: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}
