use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub opt_completed: Arc<AtomicU64>,
    pub opt_failed: Arc<AtomicU64>,
    pub opt_timed_out: Arc<AtomicU64>,

    pub locks_acquired: Arc<AtomicU64>,
    pub locks_contended: Arc<AtomicU64>,
    pub locks_reaped: Arc<AtomicU64>,

    pub notif_sent: Arc<AtomicU64>,
    pub notif_failed: Arc<AtomicU64>,
    pub notif_skipped: Arc<AtomicU64>,

    pub bus_published: Arc<AtomicU64>,
    pub bus_handler_errors: Arc<AtomicU64>,
}
