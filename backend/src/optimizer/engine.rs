//! Orchestrates a single optimization run.
//!
//! Responsibilities:
//! - Load the job, scenario, items and candidate stock under the
//!   ambient tenant.
//! - Normalize order-item geometry into flat piece lists.
//! - Derive the algorithm (explicit parameter, then scenario, then the
//!   configured default for the job's dimensionality).
//! - Drive the CAS state machine PENDING -> OPTIMIZING -> OPTIMIZED /
//!   FAILED around the pool run.
//! - Persist the plan, its per-stock placements and the stock
//!   reservations in one transaction; nothing persists on failure.
//!
//! Non-responsibilities:
//! - Publishing outcome events (the consumer owns the event flow).
//! - Retrying: a failed run is resubmitted by the caller, never here.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::warn_if_slow;
use packing::{
    Algorithm, BarPiece, BarStock, PackOptions, PackRequest, PackResult, SheetPiece, SheetStock,
};
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::bus::{Event, EventBus, EventType};
use crate::config::OptimizationSettings;
use crate::error::AppError;
use crate::jobs::model::{CuttingJob, GeometryType, JobPiece, JobStatus};
use crate::jobs::repository::CuttingJobRepository;
use crate::metrics::counters::Counters;
use crate::plans::model::{NewPlan, NewPlanStock, OptimizationScenario, PlanData, ScenarioStatus, StockReservation};
use crate::plans::repository::PlanRepository;
use crate::pool::{PackTask, TaskKind, WorkerPool};
use crate::stock::{StockRepository, StockType};
use crate::tenant;

#[derive(Debug, Clone)]
pub struct OptimizationInput {
    pub cutting_job_id: Uuid,
    pub scenario_id: Uuid,
    /// Explicit override; falls back to the scenario, then to the
    /// configured default for the job's dimensionality.
    pub algorithm: Option<Algorithm>,
    pub kerf: Option<u32>,
    pub allow_rotation: bool,
}

pub struct OptimizationEngine {
    jobs: Arc<dyn CuttingJobRepository>,
    plans: Arc<dyn PlanRepository>,
    stock: Arc<dyn StockRepository>,
    pool: Arc<WorkerPool>,
    bus: Arc<EventBus>,
    counters: Counters,
    cfg: OptimizationSettings,
}

impl OptimizationEngine {
    pub fn new(
        jobs: Arc<dyn CuttingJobRepository>,
        plans: Arc<dyn PlanRepository>,
        stock: Arc<dyn StockRepository>,
        pool: Arc<WorkerPool>,
        bus: Arc<EventBus>,
        counters: Counters,
        cfg: OptimizationSettings,
    ) -> Self {
        Self {
            jobs,
            plans,
            stock,
            pool,
            bus,
            counters,
            cfg,
        }
    }

    /// Runs one optimization to a persisted plan. The job must be
    /// PENDING; on any failure after the run started the job ends up
    /// FAILED and no plan rows exist.
    #[instrument(
        skip(self, input),
        target = "engine",
        fields(job_id = %input.cutting_job_id, scenario_id = %input.scenario_id)
    )]
    pub async fn run(&self, input: OptimizationInput) -> Result<PlanData, AppError> {
        tenant::current()?;

        let job = self
            .jobs
            .fetch(&input.cutting_job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("cutting job {}", input.cutting_job_id)))?;

        let scenario = self
            .plans
            .fetch_scenario(&input.scenario_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("scenario {}", input.scenario_id)))?;

        if scenario.job_id != job.id {
            return Err(AppError::Validation(format!(
                "scenario {} does not belong to job {}",
                scenario.id, job.id
            )));
        }
        if scenario.status == ScenarioStatus::Completed {
            return Err(AppError::InvalidState(
                "scenario is immutable once completed".into(),
            ));
        }

        let pieces = self.jobs.fetch_pieces(&job.id).await?;
        if pieces.is_empty() {
            return Err(AppError::Validation("cutting job has no items".into()));
        }

        self.jobs
            .transition(&job.id, JobStatus::Pending, JobStatus::Optimizing)
            .await?;

        match self.execute(&job, &scenario, &input, &pieces).await {
            Ok(data) => {
                self.jobs
                    .transition(&job.id, JobStatus::Optimizing, JobStatus::Optimized)
                    .await?;
                self.counters.opt_completed.fetch_add(1, Ordering::Relaxed);
                info!(
                    plan_number = %data.plan_number,
                    efficiency = data.efficiency,
                    "optimization run persisted a plan"
                );
                Ok(data)
            }
            Err(e) => {
                if matches!(e, AppError::Timeout) {
                    self.counters.opt_timed_out.fetch_add(1, Ordering::Relaxed);
                }
                self.counters.opt_failed.fetch_add(1, Ordering::Relaxed);
                if let Err(te) = self
                    .jobs
                    .transition(&job.id, JobStatus::Optimizing, JobStatus::Failed)
                    .await
                {
                    warn!(error = %te, "could not mark job FAILED after run error");
                }
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        job: &CuttingJob,
        scenario: &OptimizationScenario,
        input: &OptimizationInput,
        pieces: &[JobPiece],
    ) -> Result<PlanData, AppError> {
        let one_dimensional = pieces.iter().all(|p| p.geometry.is_one_dimensional());
        let stock_type = if one_dimensional {
            StockType::Bar1D
        } else {
            StockType::Sheet2D
        };

        let algorithm = input
            .algorithm
            .or_else(|| scenario.algorithm.as_deref().and_then(Algorithm::parse))
            .unwrap_or(if one_dimensional {
                self.cfg.default_algorithm_1d
            } else {
                self.cfg.default_algorithm_2d
            });
        if algorithm.is_one_dimensional() != one_dimensional {
            return Err(AppError::Validation(format!(
                "algorithm {} does not match the job's dimensionality",
                algorithm.as_str()
            )));
        }

        let kerf = input.kerf.unwrap_or(scenario.kerf);

        let candidates = warn_if_slow(
            "load_candidate_stock",
            Duration::from_millis(100),
            self.stock
                .candidates(&job.material_type_id, job.thickness, stock_type),
        )
        .await?;
        if candidates.is_empty() {
            return Err(AppError::Validation(
                "no candidate stock for the job's material and thickness".into(),
            ));
        }

        let request = build_request(pieces, &candidates, one_dimensional)?;

        let task = PackTask {
            id: Uuid::new_v4(),
            kind: if one_dimensional {
                TaskKind::OneD
            } else {
                TaskKind::TwoD
            },
            algorithm,
            request,
            options: PackOptions {
                kerf,
                allow_rotation: input.allow_rotation,
            },
            timeout: if one_dimensional {
                self.cfg.timeout_1d
            } else {
                self.cfg.timeout_2d
            },
            created_at_ms: crate::time::now_ms(),
        };

        let result = self.pool.submit(task)?.join().await?;

        if result.used_stock.is_empty() {
            return Err(AppError::Validation(
                "no piece could be placed on the available stock".into(),
            ));
        }
        if !result.unplaced.is_empty() {
            warn!(
                unplaced = result.unplaced.len(),
                "packing left pieces unplaced; plan covers the remainder"
            );
        }

        let plan = assemble_plan(scenario.id, &result)?;
        let reserved_ids: Vec<Uuid> = plan
            .reservations
            .iter()
            .map(|r| r.stock_item_id)
            .collect();

        let data = self.plans.persist_plan(plan).await?;

        self.publish_stock_low(&reserved_ids).await;

        Ok(data)
    }

    /// Reservations may have pushed items under the low-water mark.
    async fn publish_stock_low(&self, stock_item_ids: &[Uuid]) {
        let levels = match self.stock.levels(stock_item_ids).await {
            Ok(levels) => levels,
            Err(e) => {
                warn!(error = %e, "stock level check failed after reservation");
                return;
            }
        };

        for level in levels {
            let current = level.quantity - level.reserved_qty;
            if current <= self.cfg.stock_low_threshold {
                self.bus.publish(Event::new(
                    EventType::StockLow,
                    "stock_item",
                    level.stock_item_id.to_string(),
                    json!({
                        "stockItemId": level.stock_item_id,
                        "threshold": self.cfg.stock_low_threshold,
                        "currentQty": current,
                    }),
                ));
            }
        }
    }
}

/// Flattens job pieces (quantity expanded, geometry checked) and stock
/// classes into the strategy payload. Circles pack as their bounding
/// square.
fn build_request(
    pieces: &[JobPiece],
    candidates: &[crate::stock::StockItem],
    one_dimensional: bool,
) -> Result<PackRequest, AppError> {
    if one_dimensional {
        let mut out = Vec::new();
        for piece in pieces {
            let length = piece.length.filter(|&l| l > 0).ok_or_else(|| {
                AppError::Validation(format!(
                    "bar item {} has no positive length",
                    piece.order_item_id
                ))
            })?;
            for n in 0..piece.quantity {
                out.push(BarPiece {
                    id: format!("{}:{n}", piece.order_item_id),
                    length,
                });
            }
        }

        let mut stock = Vec::new();
        for item in candidates {
            let length = item.length.filter(|&l| l > 0).ok_or_else(|| {
                AppError::Validation(format!("bar stock {} has no positive length", item.id))
            })?;
            stock.push(BarStock {
                stock_item_id: item.id.to_string(),
                length,
                available: item.available().clamp(0, u32::MAX as i64) as u32,
                unit_price: item.unit_price,
            });
        }
        return Ok(PackRequest::Bars { pieces: out, stock });
    }

    let mut out = Vec::new();
    for piece in pieces {
        let (width, height, can_rotate) = match piece.geometry {
            GeometryType::Sheet => {
                let w = piece.width.filter(|&v| v > 0);
                let h = piece.height.filter(|&v| v > 0);
                match (w, h) {
                    (Some(w), Some(h)) => (w, h, piece.can_rotate),
                    _ => {
                        return Err(AppError::Validation(format!(
                            "sheet item {} is missing width or height",
                            piece.order_item_id
                        )));
                    }
                }
            }
            GeometryType::Circle => {
                let d = piece.diameter.filter(|&v| v > 0).ok_or_else(|| {
                    AppError::Validation(format!(
                        "circle item {} has no positive diameter",
                        piece.order_item_id
                    ))
                })?;
                (d, d, false)
            }
            GeometryType::Bar => {
                return Err(AppError::Validation(format!(
                    "bar item {} mixed into a sheet job",
                    piece.order_item_id
                )));
            }
        };
        for n in 0..piece.quantity {
            out.push(SheetPiece {
                id: format!("{}:{n}", piece.order_item_id),
                width,
                height,
                can_rotate,
            });
        }
    }

    let mut stock = Vec::new();
    for item in candidates {
        let w = item.width.filter(|&v| v > 0);
        let h = item.height.filter(|&v| v > 0);
        let (width, height) = match (w, h) {
            (Some(w), Some(h)) => (w, h),
            _ => {
                return Err(AppError::Validation(format!(
                    "sheet stock {} is missing width or height",
                    item.id
                )));
            }
        };
        stock.push(SheetStock {
            stock_item_id: item.id.to_string(),
            width,
            height,
            available: item.available().clamp(0, u32::MAX as i64) as u32,
            unit_price: item.unit_price,
        });
    }
    Ok(PackRequest::Sheets { pieces: out, stock })
}

fn assemble_plan(scenario_id: Uuid, result: &PackResult) -> Result<NewPlan, AppError> {
    let mut stocks = Vec::with_capacity(result.used_stock.len());
    let mut units: Vec<(Uuid, i64)> = Vec::new();

    for (i, used) in result.used_stock.iter().enumerate() {
        let stock_item_id = Uuid::parse_str(&used.stock_item_id)
            .map_err(|_| AppError::Internal("strategy returned a non-uuid stock id".into()))?;

        stocks.push(NewPlanStock {
            stock_item_id,
            sequence: i as i64 + 1,
            placements_json: serde_json::to_value(&used.placements)?,
            waste: used.waste as i64,
            waste_percentage: used.waste_bps() as f64 / 100.0,
        });

        match units.iter_mut().find(|(id, _)| *id == stock_item_id) {
            Some((_, n)) => *n += 1,
            None => units.push((stock_item_id, 1)),
        }
    }

    Ok(NewPlan {
        scenario_id,
        total_waste: result.total_waste as i64,
        waste_percentage: result.waste_bps as f64 / 100.0,
        efficiency: result.efficiency_bps as f64 / 100.0,
        stocks,
        reservations: units
            .into_iter()
            .map(|(stock_item_id, n)| StockReservation {
                stock_item_id,
                units: n,
            })
            .collect(),
    })
}
