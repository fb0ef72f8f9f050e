//! Ambient tenant context.
//!
//! One tenant id is bound to the current logical operation with
//! [`run`] and consulted by every repository call. The binding lives in
//! a tokio task-local, so it survives `.await` points inside the scoped
//! future but does NOT cross `tokio::spawn`; background work forked
//! from a tenant-bound operation must go through [`spawn_scoped`].
//!
//! This is deliberately not a process global: concurrent requests for
//! different tenants each carry their own binding.

use std::future::Future;

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::AppError;

tokio::task_local! {
    static CURRENT_TENANT: Uuid;
}

/// Executes `fut` with `tenant_id` bound. Nesting is allowed; the
/// innermost binding wins.
pub async fn run<F>(tenant_id: Uuid, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_TENANT.scope(tenant_id, fut).await
}

/// The bound tenant, failing with `NO_TENANT_CONTEXT` when unbound.
pub fn current() -> Result<Uuid, AppError> {
    CURRENT_TENANT
        .try_with(|t| *t)
        .map_err(|_| AppError::NoTenantContext)
}

/// The bound tenant, if any. Tenant-optional repositories use this and
/// log the omission.
pub fn current_optional() -> Option<Uuid> {
    CURRENT_TENANT.try_with(|t| *t).ok()
}

/// Spawns a task that inherits the caller's tenant binding, if one is
/// present.
pub fn spawn_scoped<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match current_optional() {
        Some(tenant_id) => tokio::spawn(run(tenant_id, fut)),
        None => tokio::spawn(fut),
    }
}
