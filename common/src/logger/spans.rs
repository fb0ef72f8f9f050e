use std::time::Duration;
use tracing::{Span, field};

use super::TraceId;

/// Root span for one logical operation (an optimization run, a lock
/// mutation, a notification fan-out). Tenant and job ids are recorded
/// later by whichever layer learns them first.
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "root",
        name = %name,
        trace_id = %trace_id.to_field(),
        tenant_id = field::Empty,
        job_id = field::Empty
    )
}

pub fn child_span(name: &'static str) -> Span {
    tracing::info_span!(
        "child",
        name = %name,
        tenant_id = field::Empty,
        job_id = field::Empty
    )
}

/// Awaits `fut`, warning when it ran longer than `max`.
pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = std::time::Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}
