//! End-to-end scenarios for the group timer manager.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use alert_publisher::config::TimerManagerConfig;
use alert_publisher::publisher::AlertGroupManager;
use alert_publisher::timers::manager::TimerCallback;
use alert_publisher::timers::model::{GroupSnapshot, GroupTimer, TimerKind};
use alert_publisher::timers::storage::{InMemoryTimerStorage, TimerStorage};
use alert_publisher::timers::GroupTimerManager;

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

struct RecordingCallback {
    fired: Arc<std::sync::Mutex<Vec<(String, TimerKind)>>>,
}

#[async_trait]
impl TimerCallback for RecordingCallback {
    async fn on_expired(
        &self,
        group_key: &str,
        kind: TimerKind,
        _snapshot: Option<GroupSnapshot>,
    ) -> anyhow::Result<()> {
        self.fired
            .lock()
            .unwrap()
            .push((group_key.to_string(), kind));
        Ok(())
    }
}

fn fast_config() -> TimerManagerConfig {
    TimerManagerConfig {
        storage_grace: Duration::from_secs(60),
        lock_ttl: Duration::from_secs(5),
        ..TimerManagerConfig::default()
    }
}

#[tokio::test]
async fn scenario_7_group_wait_fires_once_after_unreset_join() {
    let storage = Arc::new(InMemoryTimerStorage::new());
    let manager = GroupTimerManager::new(
        fast_config(),
        storage,
        Arc::new(StaticGroupManager),
        "inst-1",
    );
    let fired = Arc::new(std::sync::Mutex::new(Vec::new()));
    manager
        .on_timer_expired(Arc::new(RecordingCallback {
            fired: fired.clone(),
        }))
        .await;

    manager
        .start_timer("g-join", TimerKind::GroupWait, Duration::from_millis(30))
        .await
        .unwrap();

    // A second alert joins the group partway through the wait. Joining
    // without an explicit reset does not restart the timer — `GetTimer`
    // still reports the same `started_at`/`expires_at`.
    let before_join = manager.get_timer("g-join").await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let after_join = manager.get_timer("g-join").await.unwrap();
    assert_eq!(before_join.expires_at, after_join.expires_at);

    tokio::time::sleep(Duration::from_millis(40)).await;

    let calls = fired.lock().unwrap().clone();
    assert_eq!(calls, vec![("g-join".to_string(), TimerKind::GroupWait)]);
    assert!(manager.get_timer("g-join").await.is_none());
}

#[tokio::test]
async fn scenario_8_ha_restore_splits_restored_and_missed_and_fires_before_returning() {
    let storage = Arc::new(InMemoryTimerStorage::new());

    let now = chrono::Utc::now();

    let mut missed = GroupTimer::new("missed-group", TimerKind::GroupWait, Duration::from_secs(30), "inst-0");
    missed.started_at = now - chrono::Duration::seconds(31);
    missed.expires_at = now - chrono::Duration::seconds(1);
    storage.save(&missed, Duration::from_secs(60)).await.unwrap();

    let mut soon = GroupTimer::new("soon-group", TimerKind::GroupInterval, Duration::from_secs(10), "inst-0");
    soon.started_at = now;
    soon.expires_at = now + chrono::Duration::seconds(10);
    storage.save(&soon, Duration::from_secs(70)).await.unwrap();

    let mut later = GroupTimer::new("later-group", TimerKind::RepeatInterval, Duration::from_secs(3600), "inst-0");
    later.started_at = now;
    later.expires_at = now + chrono::Duration::seconds(3600);
    storage.save(&later, Duration::from_secs(3660)).await.unwrap();

    let manager = GroupTimerManager::new(
        fast_config(),
        storage.clone(),
        Arc::new(StaticGroupManager),
        "inst-1",
    );
    let fired = Arc::new(std::sync::Mutex::new(Vec::new()));
    manager
        .on_timer_expired(Arc::new(RecordingCallback {
            fired: fired.clone(),
        }))
        .await;

    let (restored, missed_count) = manager.restore_timers().await;
    assert_eq!(restored, 2);
    assert_eq!(missed_count, 1);

    // The missed timer's callback has already run by the time `restore_timers`
    // returns control — no need to wait or poll.
    let calls = fired.lock().unwrap().clone();
    assert_eq!(calls, vec![("missed-group".to_string(), TimerKind::GroupWait)]);

    // Its persisted record is gone; the two restored timers are still live.
    assert!(storage.load("missed-group").await.unwrap().is_none());
    assert!(storage.load("soon-group").await.unwrap().is_some());
    assert!(storage.load("later-group").await.unwrap().is_some());

    let stats = manager.get_stats();
    assert_eq!(stats.restored, 2);
    assert_eq!(stats.missed, 1);
    assert_eq!(stats.fired, 1);

    manager.shutdown(Duration::from_secs(1)).await.unwrap();
}
