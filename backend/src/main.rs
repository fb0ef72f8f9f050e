use std::sync::Arc;
use std::time::Duration;

use backend::{
    activity::repository_sqlx::SqlxActivityRepository,
    activity::service::ActivityFeedService,
    bus::broker::{BusForwarder, InMemoryBroker, MessageBroker},
    bus::{EventBus, EventType},
    config::AppConfig,
    db::Db,
    jobs::repository::CuttingJobRepository,
    jobs::repository_sqlx::SqlxCuttingJobRepository,
    locks::repository_sqlx::SqlxLockRepository,
    locks::service::DocumentLockService,
    metrics::counters::Counters,
    notifications::channels::{ChannelAdapter, InAppChannel, LoggingChannel},
    notifications::repository_sqlx::{SqlxNotificationRepository, SqlxPreferencesRepository},
    notifications::service::NotificationService,
    optimizer::{OptimizationConsumer, OptimizationEngine},
    plans::repository_sqlx::SqlxPlanRepository,
    pool::WorkerPool,
    registry::ServiceRegistry,
    stock::repository_sqlx::SqlxStockRepository,
    subscribers::{MentionNotifier, OptimizationActivityRecorder},
};
use common::init_logger;

/// Connects, migrates, and unwinds jobs a crashed run left OPTIMIZING.
async fn init_db(cfg: &AppConfig) -> anyhow::Result<Db> {
    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await?;

    let jobs = SqlxCuttingJobRepository::new(db.pool.clone());
    let recovered = jobs.recover_interrupted().await?;
    if recovered > 0 {
        tracing::warn!(recovered, "reset interrupted optimization runs to FAILED");
    }

    Ok(db)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_logger("cutting-backend", is_production);

    tracing::info!("starting cutting backend");

    let cfg = AppConfig::from_env();
    let counters = Counters::default();

    let db = init_db(&cfg).await?;
    let bus = EventBus::new(counters.clone());
    let pool = WorkerPool::new(cfg.pool.clone());

    // repositories
    let jobs: Arc<dyn CuttingJobRepository> =
        Arc::new(SqlxCuttingJobRepository::new(db.pool.clone()));
    let plans = Arc::new(SqlxPlanRepository::new(db.pool.clone()));
    let stock = Arc::new(SqlxStockRepository::new(db.pool.clone()));

    // optimization pipeline
    let engine = Arc::new(OptimizationEngine::new(
        jobs.clone(),
        plans,
        stock,
        pool.clone(),
        bus.clone(),
        counters.clone(),
        cfg.optimization.clone(),
    ));
    let consumer = OptimizationConsumer::new(engine, bus.clone());
    consumer.register();

    // document locks + reaper
    let locks = DocumentLockService::new(
        Arc::new(SqlxLockRepository::new(db.pool.clone())),
        bus.clone(),
        cfg.locks.clone(),
        counters.clone(),
    );
    let _reaper = locks.spawn_reaper();
    locks.register_routes(ServiceRegistry::global());

    // notifications
    let adapters: Vec<Arc<dyn ChannelAdapter>> = vec![
        Arc::new(InAppChannel),
        Arc::new(LoggingChannel::email()),
        Arc::new(LoggingChannel::sms()),
        Arc::new(LoggingChannel::push()),
    ];
    let notifications = NotificationService::new(
        Arc::new(SqlxNotificationRepository::new(db.pool.clone())),
        Arc::new(SqlxPreferencesRepository::new(db.pool.clone())),
        adapters,
        cfg.notifications.clone(),
        counters.clone(),
    );

    // activity feed and the bus-reversed edges
    let activity = ActivityFeedService::new(
        Arc::new(SqlxActivityRepository::new(db.pool.clone())),
        bus.clone(),
    );
    MentionNotifier::new(notifications).register(&bus);
    OptimizationActivityRecorder::new(activity).register(&bus);

    // durable inbound seam: broker deliveries re-enter the bus
    let _broker = if cfg.broker.url.is_empty() {
        None
    } else {
        let broker = InMemoryBroker::new(cfg.broker.clone());
        broker.subscribe(
            EventType::OptimizationRunRequested.as_str(),
            BusForwarder::new(bus.clone()),
        );
        tracing::info!(url = %cfg.broker.url, "broker bridge subscribed");
        Some(broker)
    };

    pool.health_check().await?;
    tracing::info!("backend started; waiting for shutdown signal");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    pool.shutdown(Duration::from_secs(10)).await;
    Ok(())
}
