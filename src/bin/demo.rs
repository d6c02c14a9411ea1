//! Demonstrates wiring the publishing engine and group timer manager
//! together outside of any admin HTTP facade. Bootstrap shape: init
//! telemetry, load config, connect storage, run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use alert_publisher::config::{EngineConfig, TimerManagerConfig, TimerStorageConfig};
use alert_publisher::dlq::InMemoryDeadLetterStore;
use alert_publisher::job::{AlertStatus, Classification, DestinationDescriptor, EnrichedAlert};
use alert_publisher::publisher::{AlertGroupManager, PublishError, Publisher};
use alert_publisher::telemetry;
use alert_publisher::timers::model::GroupSnapshot;
use alert_publisher::timers::storage::{InMemoryTimerStorage, TimerStorage};
use alert_publisher::timers::GroupTimerManager;
use alert_publisher::PublishingEngine;

/// A publisher that logs instead of calling out over the network; stands in
/// for a real PagerDuty/Slack/webhook integration.
struct LoggingPublisher;

#[async_trait]
impl Publisher for LoggingPublisher {
    async fn deliver(
        &self,
        alert: &EnrichedAlert,
        destination: &DestinationDescriptor,
        _deadline: Duration,
    ) -> Result<(), PublishError> {
        tracing::info!(
            fingerprint = %alert.fingerprint,
            destination = %destination.name,
            "delivered alert"
        );
        Ok(())
    }
}

struct StaticGroupManager;

#[async_trait]
impl AlertGroupManager for StaticGroupManager {
    async fn get_group(&self, group_key: &str) -> Option<GroupSnapshot> {
        Some(GroupSnapshot {
            group_key: group_key.to_string(),
            alert_count: 1,
            labels: Default::default(),
        })
    }
}

struct LoggingTimerCallback;

#[async_trait]
impl alert_publisher::timers::manager::TimerCallback for LoggingTimerCallback {
    async fn on_expired(
        &self,
        group_key: &str,
        kind: alert_publisher::timers::model::TimerKind,
        _snapshot: Option<GroupSnapshot>,
    ) -> Result<()> {
        tracing::info!(group_key, ?kind, "group timer fired");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();
    tracing::info!("starting alert publisher demo");

    let engine_config = EngineConfig::from_env().context("failed to load engine config")?;
    let timer_config = TimerManagerConfig::default();
    let timer_storage_config = TimerStorageConfig::from_env();

    let mut publishers: HashMap<String, Arc<dyn Publisher>> = HashMap::new();
    publishers.insert("webhook".to_string(), Arc::new(LoggingPublisher));

    let dlq = Arc::new(InMemoryDeadLetterStore::new());
    let engine = Arc::new(PublishingEngine::new(engine_config, dlq, publishers));
    engine.start().await;

    let timer_storage: Arc<dyn TimerStorage> = match timer_storage_config.redis_url {
        Some(ref url) => Arc::new(
            alert_publisher::timers::storage::RedisTimerStorage::connect(url)
                .await
                .context("failed to connect to redis timer storage")?,
        ),
        None => {
            tracing::warn!("REDIS_URL not set; using in-memory timer storage (no HA guarantees)");
            Arc::new(InMemoryTimerStorage::new())
        }
    };

    let timer_manager = GroupTimerManager::new(
        timer_config,
        timer_storage,
        Arc::new(StaticGroupManager),
        uuid::Uuid::new_v4().to_string(),
    );
    timer_manager
        .on_timer_expired(Arc::new(LoggingTimerCallback))
        .await;

    let (restored, missed) = timer_manager.restore_timers().await;
    tracing::info!(restored, missed, "timer restoration complete");

    engine
        .submit(
            EnrichedAlert {
                fingerprint: "demo-alert-1".into(),
                labels: Default::default(),
                annotations: Default::default(),
                status: AlertStatus::Firing,
                classification: Some(Classification {
                    severity: "critical".into(),
                    confidence: 0.95,
                }),
            },
            DestinationDescriptor {
                name: "demo-webhook".into(),
                kind: "webhook".into(),
                config: serde_json::json!({}),
            },
        )
        .context("submit failed")?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let counters = engine.stats().counters;
    tracing::info!(?counters, "engine stats after demo run");

    engine.stop(Duration::from_secs(5)).await.ok();
    timer_manager.shutdown(Duration::from_secs(5)).await.ok();

    Ok(())
}
