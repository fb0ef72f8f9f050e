use thiserror::Error;
use uuid::Uuid;

/// Structured service error. Every service operation surfaces one of
/// these; the `code()` is the stable wire identifier while the display
/// message may carry context.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("document locked by {locked_by} until {expires_at_ms}")]
    AlreadyLocked { locked_by: Uuid, expires_at_ms: u64 },

    #[error("invalid state transition: {0}")]
    InvalidState(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("no tenant context bound to the current task")]
    NoTenantContext,

    #[error("worker pool is shut down")]
    PoolShutdown,

    #[error("worker pool queue is full")]
    QueueFull,

    #[error("operation timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::AlreadyLocked { .. } => "ALREADY_LOCKED",
            AppError::InvalidState(_) => "INVALID_STATE",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Forbidden => "FORBIDDEN",
            AppError::NoTenantContext => "NO_TENANT_CONTEXT",
            AppError::PoolShutdown => "POOL_SHUTDOWN",
            AppError::QueueFull => "QUEUE_FULL",
            AppError::Timeout => "TIMEOUT",
            AppError::Cancelled => "CANCELLED",
            AppError::DependencyUnavailable(_) => "DEPENDENCY_UNAVAILABLE",
            AppError::Internal(_) => "INTERNAL",
        }
    }

    /// Message safe to hand to callers. Internal causes stay generic;
    /// the full chain goes to the log instead.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".into()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(format!("json: {e}"))
    }
}
