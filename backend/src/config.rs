use std::time::Duration;

/// Worker pool sizing. Defaults are tuned for a 16-physical-core host:
/// CPU-bound packing should never saturate the runtime's I/O threads.
#[derive(Clone, Debug)]
pub struct PoolSettings {
    pub min_workers: usize,
    pub max_workers: usize,

    /// How long an idle worker above the floor waits before retiring.
    pub idle_timeout: Duration,

    /// Queued-task ceiling; submissions beyond it fail with QUEUE_FULL
    /// instead of growing memory unboundedly.
    pub max_queue: usize,

    /// Packs one worker slot runs concurrently. Values above 1 multiply
    /// the effective slot count; packing is CPU-bound so 1 is right for
    /// almost every deployment.
    pub concurrent_tasks_per_worker: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_workers: 4,
            max_workers: 12,
            idle_timeout: Duration::from_secs(60),
            max_queue: 256,
            concurrent_tasks_per_worker: 1,
        }
    }
}

/// Pessimistic document-lock leases.
#[derive(Clone, Debug)]
pub struct LockSettings {
    /// Lease window granted by acquire and refresh.
    pub lease: Duration,
    /// Cadence of the expired-lock reaper.
    pub reap_interval: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lease: Duration::from_millis(900_000),
            reap_interval: Duration::from_millis(60_000),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OptimizationSettings {
    /// Wall-clock ceiling the pool enforces on a 1D run.
    pub timeout_1d: Duration,
    /// Wall-clock ceiling for a 2D run; sheet nesting is much heavier.
    pub timeout_2d: Duration,
    pub default_kerf_mm: u32,
    pub default_algorithm_1d: packing::Algorithm,
    pub default_algorithm_2d: packing::Algorithm,
    /// Remaining-unit threshold below which STOCK_LOW is published
    /// after a plan reserves stock.
    pub stock_low_threshold: i64,
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        Self {
            timeout_1d: Duration::from_millis(120_000),
            timeout_2d: Duration::from_millis(300_000),
            default_kerf_mm: 3,
            default_algorithm_1d: packing::Algorithm::Bfd1D,
            default_algorithm_2d: packing::Algorithm::BottomLeft2D,
            stock_low_threshold: 5,
        }
    }
}

#[derive(Clone, Debug)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub default_channel: &'static str,
    /// Ceiling on one adapter send attempt.
    pub per_channel_timeout: Duration,
    /// Sleep before each retry; the schedule length bounds the retries.
    pub retry_backoff: Vec<Duration>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_channel: "in_app",
            per_channel_timeout: Duration::from_millis(10_000),
            retry_backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(4),
                Duration::from_secs(16),
            ],
        }
    }
}

#[derive(Clone, Debug)]
pub struct BrokerSettings {
    pub url: String,
    pub prefetch: usize,
    /// Visibility window: an unacknowledged delivery past this is
    /// treated as failed and becomes eligible for redelivery.
    pub ack_timeout: Duration,
    /// Total deliveries before a message is dead-lettered.
    pub max_deliveries: u32,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            prefetch: 16,
            ack_timeout: Duration::from_millis(30_000),
            max_deliveries: 2,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    pub pool: PoolSettings,
    pub locks: LockSettings,
    pub optimization: OptimizationSettings,
    pub notifications: NotificationSettings,
    pub broker: BrokerSettings,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://cutshop_dev.db".to_string());

        let broker_url = std::env::var("BROKER_URL").unwrap_or_default();

        Self {
            database_url,
            broker: BrokerSettings {
                url: broker_url,
                ..BrokerSettings::default()
            },
            ..Self::default()
        }
    }
}
