//! Bounded worker pool for CPU-bound packing runs.
//!
//! Responsibilities:
//! - FIFO queue with a hard ceiling (`QUEUE_FULL` beyond it).
//! - Worker tasks that execute packs on the blocking thread pool,
//!   scaling between the configured floor and ceiling.
//! - Cooperative cancellation plus a pool-enforced wall-clock timeout.
//! - Per-task and broadcast progress, run/wait statistics, health check.
//! - Drain-then-cancel shutdown.
//!
//! Workers are shared-nothing: a task payload is a serialized value
//! structure, and nothing survives a task inside the worker. A timed
//! out pack keeps its blocking thread only until the strategy observes
//! the cancel flag at the next piece boundary.

pub mod task;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use packing::{BarPiece, BarStock, CancelToken, PackRequest, PackResult, pack};
use parking_lot::Mutex;
use tokio::sync::{Notify, broadcast, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PoolSettings;
use crate::error::AppError;
use crate::time::now_ms;

pub use task::{PackTask, TaskHandle, TaskKind, TaskPhase, TaskProgress};

struct QueuedTask {
    task: PackTask,
    cancel: CancelToken,
    done: oneshot::Sender<Result<PackResult, AppError>>,
    enqueued: Instant,
}

struct TaskEntry {
    cancel: CancelToken,
    progress: TaskProgress,
}

struct PoolInner {
    cfg: PoolSettings,
    queue: Mutex<VecDeque<QueuedTask>>,
    wakeup: Notify,
    shutting_down: AtomicBool,
    workers: AtomicUsize,
    busy: AtomicUsize,
    tasks: Mutex<HashMap<Uuid, TaskEntry>>,
    progress_tx: broadcast::Sender<TaskProgress>,

    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    timed_out: AtomicU64,
    run_ms_total: AtomicU64,
    wait_ms_total: AtomicU64,
    finished: AtomicU64,
}

impl PoolInner {
    fn slot_floor(&self) -> usize {
        self.cfg.min_workers * self.cfg.concurrent_tasks_per_worker.max(1)
    }

    fn slot_ceiling(&self) -> usize {
        self.cfg.max_workers * self.cfg.concurrent_tasks_per_worker.max(1)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timed_out: u64,
    pub run_time_mean_ms: f64,
    pub wait_time_mean_ms: f64,
    /// Busy slots over live slots.
    pub utilization: f64,
    pub queue_size: usize,
    pub workers: usize,
}

pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub fn new(cfg: PoolSettings) -> Arc<Self> {
        let (progress_tx, _) = broadcast::channel(1024);
        let inner = Arc::new(PoolInner {
            cfg,
            queue: Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
            shutting_down: AtomicBool::new(false),
            workers: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
            tasks: Mutex::new(HashMap::new()),
            progress_tx,
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            run_ms_total: AtomicU64::new(0),
            wait_ms_total: AtomicU64::new(0),
            finished: AtomicU64::new(0),
        });

        for _ in 0..inner.slot_floor() {
            spawn_worker(inner.clone());
        }

        Arc::new(Self { inner })
    }

    /// Enqueues a task. Fails with `POOL_SHUTDOWN` once shutdown began
    /// and `QUEUE_FULL` when the queue is at its ceiling.
    pub fn submit(&self, task: PackTask) -> Result<TaskHandle, AppError> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(AppError::PoolShutdown);
        }

        let (done, rx) = oneshot::channel();
        let cancel = CancelToken::new();
        let id = task.id;

        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.cfg.max_queue {
                return Err(AppError::QueueFull);
            }
            self.inner.tasks.lock().insert(
                id,
                TaskEntry {
                    cancel: cancel.clone(),
                    progress: TaskProgress {
                        task_id: id,
                        phase: TaskPhase::Queued,
                        progress: 0.0,
                        message: None,
                        started_at_ms: None,
                        completed_at_ms: None,
                    },
                },
            );
            queue.push_back(QueuedTask {
                task,
                cancel,
                done,
                enqueued: Instant::now(),
            });
        }

        self.inner.wakeup.notify_one();
        self.maybe_grow();

        Ok(TaskHandle { id, rx })
    }

    /// Requests cancellation. Returns true when the task was found
    /// queued or running. A still-queued task completes `CANCELLED`
    /// immediately, without any strategy invocation; a running one
    /// unwinds at its next cancellation check.
    pub fn cancel(&self, task_id: Uuid) -> bool {
        let found = {
            let tasks = self.inner.tasks.lock();
            match tasks.get(&task_id) {
                Some(entry) => {
                    entry.cancel.cancel();
                    true
                }
                None => false,
            }
        };
        if !found {
            return false;
        }

        let dequeued = {
            let mut queue = self.inner.queue.lock();
            queue
                .iter()
                .position(|q| q.task.id == task_id)
                .and_then(|pos| queue.remove(pos))
        };
        if let Some(q) = dequeued {
            finish_task(
                &self.inner,
                q.task.id,
                q.enqueued.elapsed().as_millis() as u64,
                0,
                TaskPhase::Cancelled,
                Err(AppError::Cancelled),
                q.done,
            );
        }

        true
    }

    /// Latest progress for a queued or running task.
    pub fn progress(&self, task_id: Uuid) -> Option<TaskProgress> {
        self.inner
            .tasks
            .lock()
            .get(&task_id)
            .map(|e| e.progress.clone())
    }

    /// Pool-wide progress feed for broadcasting to clients.
    pub fn on_progress(&self) -> broadcast::Receiver<TaskProgress> {
        self.inner.progress_tx.subscribe()
    }

    pub fn stats(&self) -> PoolStats {
        let finished = self.inner.finished.load(Ordering::Relaxed);
        let workers = self.inner.workers.load(Ordering::Relaxed);
        let busy = self.inner.busy.load(Ordering::Relaxed);
        let mean = |total: u64| {
            if finished == 0 {
                0.0
            } else {
                total as f64 / finished as f64
            }
        };
        PoolStats {
            completed: self.inner.completed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            cancelled: self.inner.cancelled.load(Ordering::Relaxed),
            timed_out: self.inner.timed_out.load(Ordering::Relaxed),
            run_time_mean_ms: mean(self.inner.run_ms_total.load(Ordering::Relaxed)),
            wait_time_mean_ms: mean(self.inner.wait_ms_total.load(Ordering::Relaxed)),
            utilization: if workers == 0 {
                0.0
            } else {
                busy as f64 / workers as f64
            },
            queue_size: self.inner.queue.lock().len(),
            workers,
        }
    }

    /// Submits a trivial 1D task with a tight timeout; failure means
    /// the pool cannot currently serve work.
    pub async fn health_check(&self) -> Result<(), AppError> {
        let task = PackTask {
            id: Uuid::new_v4(),
            kind: TaskKind::OneD,
            algorithm: packing::Algorithm::Ffd1D,
            request: PackRequest::Bars {
                pieces: vec![BarPiece {
                    id: "health".into(),
                    length: 1,
                }],
                stock: vec![BarStock {
                    stock_item_id: "health".into(),
                    length: 10,
                    available: 1,
                    unit_price: None,
                }],
            },
            options: packing::PackOptions {
                kerf: 0,
                allow_rotation: false,
            },
            timeout: Duration::from_secs(1),
            created_at_ms: now_ms(),
        };

        match self.submit(task)?.join().await {
            Ok(result) if result.unplaced.is_empty() => Ok(()),
            Ok(_) => Err(AppError::DependencyUnavailable(
                "health pack produced unplaced pieces".into(),
            )),
            Err(e) => Err(AppError::DependencyUnavailable(format!(
                "health pack failed: {e}"
            ))),
        }
    }

    /// Refuses new submissions, drains the queue within `grace`, then
    /// cancels whatever is still in flight.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        self.inner.wakeup.notify_waiters();
        info!("worker pool shutting down");

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            let idle = self.inner.queue.lock().is_empty()
                && self.inner.busy.load(Ordering::SeqCst) == 0;
            if idle {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        warn!("grace period elapsed; cancelling in-flight packs");
        for entry in self.inner.tasks.lock().values() {
            entry.cancel.cancel();
        }
        // also flush anything still queued
        let drained: Vec<QueuedTask> = self.inner.queue.lock().drain(..).collect();
        for q in drained {
            finish_task(
                &self.inner,
                q.task.id,
                q.enqueued.elapsed().as_millis() as u64,
                0,
                TaskPhase::Cancelled,
                Err(AppError::Cancelled),
                q.done,
            );
        }
    }

    fn maybe_grow(&self) {
        let inner = &self.inner;
        let workers = inner.workers.load(Ordering::SeqCst);
        let busy = inner.busy.load(Ordering::SeqCst);
        if workers < inner.slot_ceiling() && busy >= workers {
            spawn_worker(inner.clone());
        }
    }
}

fn spawn_worker(inner: Arc<PoolInner>) {
    inner.workers.fetch_add(1, Ordering::SeqCst);
    tokio::spawn(worker_loop(inner));
}

async fn worker_loop(inner: Arc<PoolInner>) {
    loop {
        let next = inner.queue.lock().pop_front();
        match next {
            Some(q) => run_task(&inner, q).await,
            None => {
                if inner.shutting_down.load(Ordering::SeqCst) {
                    inner.workers.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
                let waited =
                    tokio::time::timeout(inner.cfg.idle_timeout, inner.wakeup.notified()).await;
                if waited.is_err() {
                    // idle past the window: retire unless at the floor
                    let floor = inner.slot_floor();
                    let retired = inner
                        .workers
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                            (n > floor).then_some(n - 1)
                        })
                        .is_ok();
                    if retired {
                        debug!("idle worker retired");
                        return;
                    }
                }
            }
        }
    }
}

async fn run_task(inner: &Arc<PoolInner>, q: QueuedTask) {
    let task_id = q.task.id;
    let wait_ms = q.enqueued.elapsed().as_millis() as u64;

    if q.cancel.is_cancelled() {
        finish_task(
            inner,
            task_id,
            wait_ms,
            0,
            TaskPhase::Cancelled,
            Err(AppError::Cancelled),
            q.done,
        );
        return;
    }

    inner.busy.fetch_add(1, Ordering::SeqCst);
    let started_at = now_ms();
    {
        let mut tasks = inner.tasks.lock();
        if let Some(entry) = tasks.get_mut(&task_id) {
            entry.progress.phase = TaskPhase::Running;
            entry.progress.started_at_ms = Some(started_at);
        }
    }
    let _ = inner.progress_tx.send(TaskProgress {
        task_id,
        phase: TaskPhase::Running,
        progress: 0.0,
        message: None,
        started_at_ms: Some(started_at),
        completed_at_ms: None,
    });

    let started = Instant::now();
    let cancel = q.cancel.clone();
    let algorithm = q.task.algorithm;
    let request = q.task.request.clone();
    let options = q.task.options;
    let progress_inner = inner.clone();

    let blocking = tokio::task::spawn_blocking(move || {
        let cb = move |p: f64| {
            let _ = progress_inner.progress_tx.send(TaskProgress {
                task_id,
                phase: TaskPhase::Running,
                progress: p,
                message: None,
                started_at_ms: Some(started_at),
                completed_at_ms: None,
            });
            if let Some(entry) = progress_inner.tasks.lock().get_mut(&task_id) {
                entry.progress.progress = p;
            }
        };
        pack(algorithm, &request, &options, &cancel, Some(&cb))
    });

    let (phase, outcome) = match tokio::time::timeout(q.task.timeout, blocking).await {
        Err(_) => {
            // the blocking thread unwinds at its next cancellation check
            q.cancel.cancel();
            (TaskPhase::TimedOut, Err(AppError::Timeout))
        }
        Ok(Err(join_err)) => (
            TaskPhase::Failed,
            Err(AppError::Internal(format!("pack worker panicked: {join_err}"))),
        ),
        Ok(Ok(Ok(result))) => (TaskPhase::Completed, Ok(result)),
        Ok(Ok(Err(packing::PackError::Cancelled))) => {
            (TaskPhase::Cancelled, Err(AppError::Cancelled))
        }
        Ok(Ok(Err(e))) => (TaskPhase::Failed, Err(AppError::Validation(e.to_string()))),
    };

    let run_ms = started.elapsed().as_millis() as u64;
    inner.busy.fetch_sub(1, Ordering::SeqCst);
    finish_task(inner, task_id, wait_ms, run_ms, phase, outcome, q.done);
}

fn finish_task(
    inner: &Arc<PoolInner>,
    task_id: Uuid,
    wait_ms: u64,
    run_ms: u64,
    phase: TaskPhase,
    outcome: Result<PackResult, AppError>,
    done: oneshot::Sender<Result<PackResult, AppError>>,
) {
    let counter = match phase {
        TaskPhase::Completed => &inner.completed,
        TaskPhase::Cancelled => &inner.cancelled,
        TaskPhase::TimedOut => &inner.timed_out,
        _ => &inner.failed,
    };
    counter.fetch_add(1, Ordering::Relaxed);
    inner.finished.fetch_add(1, Ordering::Relaxed);
    inner.wait_ms_total.fetch_add(wait_ms, Ordering::Relaxed);
    inner.run_ms_total.fetch_add(run_ms, Ordering::Relaxed);

    inner.tasks.lock().remove(&task_id);

    let _ = inner.progress_tx.send(TaskProgress {
        task_id,
        phase,
        progress: if phase == TaskPhase::Completed { 1.0 } else { 0.0 },
        message: outcome.as_ref().err().map(|e| e.code().to_string()),
        started_at_ms: None,
        completed_at_ms: Some(now_ms()),
    });

    // receiver may have gone away; that is fine
    let _ = done.send(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(min: usize, max: usize, max_queue: usize) -> PoolSettings {
        PoolSettings {
            min_workers: min,
            max_workers: max,
            idle_timeout: Duration::from_secs(60),
            max_queue,
            concurrent_tasks_per_worker: 1,
        }
    }

    fn small_task(timeout: Duration) -> PackTask {
        PackTask {
            id: Uuid::new_v4(),
            kind: TaskKind::OneD,
            algorithm: packing::Algorithm::Bfd1D,
            request: PackRequest::Bars {
                pieces: vec![
                    BarPiece { id: "a".into(), length: 2500 },
                    BarPiece { id: "b".into(), length: 1500 },
                ],
                stock: vec![BarStock {
                    stock_item_id: "s".into(),
                    length: 6000,
                    available: 2,
                    unit_price: None,
                }],
            },
            options: packing::PackOptions { kerf: 3, allow_rotation: false },
            timeout,
            created_at_ms: now_ms(),
        }
    }

    /// A payload heavy enough to outlive a tight pool timeout: tiny bars
    /// force one open bar per piece, so placement cost grows
    /// quadratically with the piece count.
    fn heavy_task(timeout: Duration) -> PackTask {
        let pieces = (0..60_000)
            .map(|i| BarPiece { id: format!("p{i}"), length: 2 })
            .collect();
        PackTask {
            id: Uuid::new_v4(),
            kind: TaskKind::OneD,
            algorithm: packing::Algorithm::Ffd1D,
            request: PackRequest::Bars {
                pieces,
                stock: vec![BarStock {
                    stock_item_id: "s".into(),
                    length: 3,
                    available: 100_000,
                    unit_price: None,
                }],
            },
            options: packing::PackOptions { kerf: 3, allow_rotation: false },
            timeout,
            created_at_ms: now_ms(),
        }
    }

    #[tokio::test]
    async fn submit_and_join_completes() {
        let pool = WorkerPool::new(settings(1, 2, 16));
        let result = pool
            .submit(small_task(Duration::from_secs(5)))
            .unwrap()
            .join()
            .await
            .unwrap();
        assert_eq!(result.stock_used_count(), 1);

        let stats = pool.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.queue_size, 0);
    }

    #[tokio::test]
    async fn queue_ceiling_yields_queue_full() {
        // no workers: everything stays queued
        let pool = WorkerPool::new(settings(0, 0, 2));
        pool.submit(small_task(Duration::from_secs(5))).unwrap();
        pool.submit(small_task(Duration::from_secs(5))).unwrap();
        let err = pool.submit(small_task(Duration::from_secs(5))).unwrap_err();
        assert_eq!(err.code(), "QUEUE_FULL");
    }

    #[tokio::test]
    async fn cancel_before_execution_is_cancelled_without_running() {
        let pool = WorkerPool::new(settings(0, 0, 16));
        let handle = pool.submit(small_task(Duration::from_secs(5))).unwrap();
        assert!(pool.cancel(handle.id));

        let err = handle.join().await.unwrap_err();
        assert_eq!(err.code(), "CANCELLED");
        assert_eq!(pool.stats().cancelled, 1);
        assert_eq!(pool.stats().queue_size, 0);
    }

    #[tokio::test]
    async fn cancel_unknown_task_returns_false() {
        let pool = WorkerPool::new(settings(1, 1, 16));
        assert!(!pool.cancel(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn pool_timeout_beats_a_heavy_task() {
        let pool = WorkerPool::new(settings(1, 1, 16));
        let err = pool
            .submit(heavy_task(Duration::from_millis(20)))
            .unwrap()
            .join()
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TIMEOUT");
        assert_eq!(pool.stats().timed_out, 1);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_submissions() {
        let pool = WorkerPool::new(settings(1, 1, 16));
        pool.shutdown(Duration::from_millis(100)).await;
        let err = pool.submit(small_task(Duration::from_secs(1))).unwrap_err();
        assert_eq!(err.code(), "POOL_SHUTDOWN");
    }

    #[tokio::test]
    async fn health_check_passes_on_a_live_pool() {
        let pool = WorkerPool::new(settings(1, 2, 16));
        pool.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn progress_broadcast_reports_running_and_completed() {
        let pool = WorkerPool::new(settings(1, 1, 16));
        let mut feed = pool.on_progress();

        let handle = pool.submit(small_task(Duration::from_secs(5))).unwrap();
        let task_id = handle.id;
        handle.join().await.unwrap();

        let mut phases = Vec::new();
        while let Ok(update) = feed.try_recv() {
            if update.task_id == task_id {
                phases.push(update.phase);
            }
        }
        assert!(phases.contains(&TaskPhase::Running));
        assert_eq!(*phases.last().unwrap(), TaskPhase::Completed);
    }

    #[tokio::test]
    async fn pool_grows_under_load_up_to_ceiling() {
        let pool = WorkerPool::new(settings(1, 4, 64));
        let handles: Vec<_> = (0..8)
            .map(|_| pool.submit(small_task(Duration::from_secs(5))).unwrap())
            .collect();
        for h in handles {
            h.join().await.unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.completed, 8);
        assert!(stats.workers <= 4);
    }
}
