//! Bus consumer for optimization requests.
//!
//! Binds the tenant from the event envelope, drives the engine, and
//! publishes the outcome event. Every engine error becomes an
//! OPTIMIZATION_FAILED event; nothing thrown here ever reaches the
//! dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use common::{TraceId, root_span};
use packing::Algorithm;
use serde::Deserialize;
use serde_json::json;
use tracing::{Instrument, field, info, warn};
use uuid::Uuid;

use crate::bus::{Event, EventBus, EventHandler, EventType};
use crate::error::AppError;
use crate::optimizer::engine::{OptimizationEngine, OptimizationInput};
use crate::tenant;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptimizationRequested {
    cutting_job_id: Uuid,
    scenario_id: Uuid,
    algorithm: Option<String>,
    kerf: Option<u32>,
    #[serde(default)]
    allow_rotation: bool,
    correlation_id: Option<Uuid>,
}

pub struct OptimizationConsumer {
    engine: Arc<OptimizationEngine>,
    bus: Arc<EventBus>,
}

impl OptimizationConsumer {
    pub fn new(engine: Arc<OptimizationEngine>, bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self { engine, bus })
    }

    /// Registers this consumer on the bus. Idempotent.
    pub fn register(self: &Arc<Self>) {
        self.bus
            .subscribe(EventType::OptimizationRunRequested, self.clone());
    }

    fn publish_failure(
        &self,
        tenant_id: Option<Uuid>,
        correlation_id: Option<Uuid>,
        scenario_id: Uuid,
        reason: &str,
    ) {
        let mut event = Event::new(
            EventType::OptimizationFailed,
            "optimization_scenario",
            scenario_id.to_string(),
            json!({ "scenarioId": scenario_id, "reason": reason }),
        );
        event.tenant_id = tenant_id;
        event.correlation_id = correlation_id;
        self.bus.publish(event);
    }
}

#[async_trait]
impl EventHandler for OptimizationConsumer {
    fn id(&self) -> &'static str {
        "optimization-consumer"
    }

    async fn handle(&self, event: Event) -> Result<(), AppError> {
        let request: OptimizationRequested = match serde_json::from_value(event.payload.clone()) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "malformed optimization request dropped");
                return Ok(());
            }
        };

        let correlation_id = request.correlation_id.or(event.correlation_id);

        let Some(tenant_id) = event.tenant_id else {
            warn!(scenario_id = %request.scenario_id, "optimization request without tenant");
            self.publish_failure(
                None,
                correlation_id,
                request.scenario_id,
                AppError::NoTenantContext.code(),
            );
            return Ok(());
        };

        let input = OptimizationInput {
            cutting_job_id: request.cutting_job_id,
            scenario_id: request.scenario_id,
            algorithm: request.algorithm.as_deref().and_then(Algorithm::parse),
            kerf: request.kerf,
            allow_rotation: request.allow_rotation,
        };

        let trace_id = correlation_id.map(TraceId::new).unwrap_or_default();
        let span = root_span("optimization_run", &trace_id);
        span.record("tenant_id", field::display(tenant_id));
        span.record("job_id", field::display(request.cutting_job_id));

        let outcome = tenant::run(tenant_id, self.engine.run(input))
            .instrument(span)
            .await;

        match outcome {
            Ok(data) => {
                info!(
                    scenario_id = %request.scenario_id,
                    plan_number = %data.plan_number,
                    "optimization completed"
                );
                let mut completed = Event::new(
                    EventType::OptimizationCompleted,
                    "optimization_scenario",
                    request.scenario_id.to_string(),
                    json!({
                        "scenarioId": request.scenario_id,
                        "planId": data.plan_id,
                        "planNumber": data.plan_number,
                        "efficiency": data.efficiency,
                        "wastePercentage": data.waste_percentage,
                    }),
                );
                completed.tenant_id = Some(tenant_id);
                completed.correlation_id = correlation_id;
                self.bus.publish(completed);
            }
            Err(e) => {
                warn!(
                    scenario_id = %request.scenario_id,
                    code = e.code(),
                    error = %e,
                    "optimization failed"
                );
                self.publish_failure(
                    Some(tenant_id),
                    correlation_id,
                    request.scenario_id,
                    e.code(),
                );
            }
        }

        Ok(())
    }
}
