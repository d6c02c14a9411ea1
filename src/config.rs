//! Explicitly enumerated configuration records.
//!
//! Every tunable the engine, the DLQ, and the timer manager read is a named
//! field here, not a dynamic map with arbitrary keys, each with a documented
//! default, loaded from environment variables with `anyhow::Context` and
//! falling back to defaults when optional.

use std::time::Duration;

use anyhow::{Context, Result};

/// Tunables for [`crate::queue::PriorityQueue`] and [`crate::worker::WorkerPool`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of worker tasks pulling from the priority channels.
    pub worker_count: usize,
    /// Bounded capacity of the High-priority channel.
    pub high_capacity: usize,
    /// Bounded capacity of the Medium-priority channel.
    pub medium_capacity: usize,
    /// Bounded capacity of the Low-priority channel.
    pub low_capacity: usize,
    /// Ceiling on `retry_count` before a job is escalated to the DLQ.
    pub max_retries: u32,
    /// Base interval for exponential backoff.
    pub base_interval: Duration,
    /// Ceiling on computed backoff, before jitter.
    pub max_backoff: Duration,
    /// Upper bound of the uniform jitter added to backoff.
    pub jitter_max: Duration,
    /// Capacity of the job tracking cache.
    pub tracking_capacity: usize,
    /// Default bounded deadline for a publisher call, when the destination
    /// does not specify one.
    pub publisher_timeout: Duration,
    /// Circuit breaker thresholds, shared across all destinations.
    pub breaker: CircuitBreakerConfig,
    /// Small bounded backoff used when retrying a failed DLQ write.
    pub dlq_write_retry_interval: Duration,
    /// Number of times to retry a DLQ write before giving up and logging at
    /// error level with the job left in `Failed`.
    pub dlq_write_retry_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 10,
            high_capacity: 1_000,
            medium_capacity: 5_000,
            low_capacity: 10_000,
            max_retries: 3,
            base_interval: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            jitter_max: Duration::from_secs(1),
            tracking_capacity: 10_000,
            publisher_timeout: Duration::from_secs(10),
            breaker: CircuitBreakerConfig::default(),
            dlq_write_retry_interval: Duration::from_millis(200),
            dlq_write_retry_attempts: 5,
        }
    }
}

impl EngineConfig {
    /// Load overrides from the environment, falling back to [`Default`] for
    /// anything unset. Numeric env vars that fail to parse are an error.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("ALERT_PUBLISHER_WORKER_COUNT") {
            cfg.worker_count = v
                .parse()
                .context("ALERT_PUBLISHER_WORKER_COUNT must be a valid number")?;
        }
        if let Ok(v) = std::env::var("ALERT_PUBLISHER_HIGH_CAPACITY") {
            cfg.high_capacity = v
                .parse()
                .context("ALERT_PUBLISHER_HIGH_CAPACITY must be a valid number")?;
        }
        if let Ok(v) = std::env::var("ALERT_PUBLISHER_MEDIUM_CAPACITY") {
            cfg.medium_capacity = v
                .parse()
                .context("ALERT_PUBLISHER_MEDIUM_CAPACITY must be a valid number")?;
        }
        if let Ok(v) = std::env::var("ALERT_PUBLISHER_LOW_CAPACITY") {
            cfg.low_capacity = v
                .parse()
                .context("ALERT_PUBLISHER_LOW_CAPACITY must be a valid number")?;
        }
        if let Ok(v) = std::env::var("ALERT_PUBLISHER_MAX_RETRIES") {
            cfg.max_retries = v
                .parse()
                .context("ALERT_PUBLISHER_MAX_RETRIES must be a valid number")?;
        }
        Ok(cfg)
    }
}

/// Per-destination circuit breaker thresholds.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in `Closed` before tripping to `Open`.
    pub failure_threshold: u32,
    /// Consecutive successes in `HalfOpen` before closing.
    pub success_threshold: u32,
    /// How long `Open` is held before a probe is allowed.
    pub cooldown_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown_timeout: Duration::from_secs(30),
        }
    }
}

/// Connection settings for the durable dead-letter store.
#[derive(Debug, Clone)]
pub struct DlqConfig {
    /// Postgres connection string.
    pub database_url: String,
}

impl DlqConfig {
    /// Load from `DATABASE_URL`. Write-retry tunables live on
    /// [`EngineConfig`] since it's the engine, not the store, that owns the
    /// retry loop.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
        })
    }
}

/// Tunables for [`crate::timers::manager::GroupTimerManager`].
#[derive(Debug, Clone)]
pub struct TimerManagerConfig {
    /// Default `GroupWait` duration for newly formed groups.
    pub default_group_wait: Duration,
    /// Default `GroupInterval` duration.
    pub default_group_interval: Duration,
    /// Default `RepeatInterval` duration.
    pub default_repeat_interval: Duration,
    /// Ceiling on concurrently Active timers this instance will install.
    pub max_concurrent_timers: usize,
    /// Grace added to a timer's duration to compute its durable TTL.
    pub storage_grace: Duration,
    /// TTL used for the distributed lock acquired at expiration.
    pub lock_ttl: Duration,
}

impl Default for TimerManagerConfig {
    fn default() -> Self {
        Self {
            default_group_wait: Duration::from_secs(30),
            default_group_interval: Duration::from_secs(5 * 60),
            default_repeat_interval: Duration::from_secs(4 * 60 * 60),
            max_concurrent_timers: 100_000,
            storage_grace: Duration::from_secs(60),
            lock_ttl: Duration::from_secs(30),
        }
    }
}

/// Connection settings for the timer store's backing KV store.
#[derive(Debug, Clone)]
pub struct TimerStorageConfig {
    /// Redis connection URL. `None` selects the in-memory fallback and logs
    /// a startup warning that HA guarantees are not provided.
    pub redis_url: Option<String>,
}

impl TimerStorageConfig {
    /// Load `REDIS_URL` if present; absence is not an error, it selects the
    /// in-memory fallback.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL").ok(),
        }
    }
}
