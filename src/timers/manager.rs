//! Group Timer Manager.
//!
//! Per-group one-shot timers layered over [`super::storage::TimerStorage`],
//! with a distributed lock taken at expiration for exactly-once fan-out
//! across instances.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::TimerManagerConfig;
use crate::error::TimerError;
use crate::publisher::AlertGroupManager;

use super::model::{GroupSnapshot, GroupTimer, TimerKind, TimerState};
use super::storage::TimerStorage;

/// Callback invoked serially per firing. Errors are logged but do not stop
/// other registered callbacks from running.
#[async_trait::async_trait]
pub trait TimerCallback: Send + Sync {
    async fn on_expired(
        &self,
        group_key: &str,
        kind: TimerKind,
        snapshot: Option<GroupSnapshot>,
    ) -> anyhow::Result<()>;
}

/// Aggregate counters for `GetStats()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerManagerStats {
    pub active_count: usize,
    pub restored: u64,
    pub missed: u64,
    pub fired: u64,
    pub callback_errors: u64,
}

struct LocalTimer {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

struct Inner {
    config: TimerManagerConfig,
    storage: Arc<dyn TimerStorage>,
    group_manager: Arc<dyn AlertGroupManager>,
    callbacks: tokio::sync::RwLock<Vec<Arc<dyn TimerCallback>>>,
    local: std::sync::RwLock<HashMap<String, LocalTimer>>,
    instance_id: String,
    shutdown: CancellationToken,
    accepting: std::sync::atomic::AtomicBool,
    restored: std::sync::atomic::AtomicU64,
    missed: std::sync::atomic::AtomicU64,
    fired: std::sync::atomic::AtomicU64,
    callback_errors: std::sync::atomic::AtomicU64,
}

/// Owns per-group timers and their expiration pipeline.
pub struct GroupTimerManager {
    inner: Arc<Inner>,
}

impl GroupTimerManager {
    pub fn new(
        config: TimerManagerConfig,
        storage: Arc<dyn TimerStorage>,
        group_manager: Arc<dyn AlertGroupManager>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                storage,
                group_manager,
                callbacks: tokio::sync::RwLock::new(Vec::new()),
                local: std::sync::RwLock::new(HashMap::new()),
                instance_id: instance_id.into(),
                shutdown: CancellationToken::new(),
                accepting: std::sync::atomic::AtomicBool::new(true),
                restored: std::sync::atomic::AtomicU64::new(0),
                missed: std::sync::atomic::AtomicU64::new(0),
                fired: std::sync::atomic::AtomicU64::new(0),
                callback_errors: std::sync::atomic::AtomicU64::new(0),
            }),
        }
    }

    /// Register a callback; multiple may be registered and all are invoked
    /// serially per firing.
    pub async fn on_timer_expired(&self, callback: Arc<dyn TimerCallback>) {
        self.inner.callbacks.write().await.push(callback);
    }

    /// Validate inputs, cancel any existing timer for `group_key`, persist
    /// the new record, and install a local scheduled task.
    pub async fn start_timer(
        &self,
        group_key: &str,
        kind: TimerKind,
        duration: Duration,
    ) -> Result<GroupTimer, TimerError> {
        if duration.is_zero() {
            return Err(TimerError::InvalidDuration(kind, duration));
        }
        if !self.inner.accepting.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(TimerError::Storage(crate::error::TimerStorageError::Unavailable(
                "timer manager is shutting down".into(),
            )));
        }
        {
            let active = self.inner.local.read().unwrap_or_else(|e| e.into_inner()).len();
            if active >= self.inner.config.max_concurrent_timers {
                return Err(TimerError::TooManyTimers(self.inner.config.max_concurrent_timers));
            }
        }

        self.cancel_local(group_key);

        let timer = GroupTimer::new(group_key, kind, duration, self.inner.instance_id.clone());
        let ttl = duration + self.inner.config.storage_grace;
        self.inner.storage.save(&timer, ttl).await?;
        self.install_local_task(timer.clone(), duration);

        Ok(timer)
    }

    /// Cancel the timer for `group_key`, both locally and in storage.
    /// Returns whether a timer existed.
    pub async fn cancel_timer(&self, group_key: &str) -> bool {
        let existed_locally = self.cancel_local(group_key);
        let existed_in_storage = self
            .inner
            .storage
            .load(group_key)
            .await
            .ok()
            .flatten()
            .is_some();
        let _ = self.inner.storage.delete(group_key).await;
        existed_locally || existed_in_storage
    }

    /// Semantically cancel + start, tracking reset metadata.
    pub async fn reset_timer(
        &self,
        group_key: &str,
        kind: TimerKind,
        duration: Duration,
    ) -> Result<GroupTimer, TimerError> {
        let previous_resets = self
            .inner
            .storage
            .load(group_key)
            .await
            .ok()
            .flatten()
            .map(|t| t.metadata.reset_count)
            .unwrap_or(0);

        self.cancel_local(group_key);
        let mut timer = GroupTimer::new(group_key, kind, duration, self.inner.instance_id.clone());
        timer.metadata.reset_count = previous_resets + 1;
        timer.metadata.last_reset_at = Some(chrono::Utc::now());

        let ttl = duration + self.inner.config.storage_grace;
        self.inner.storage.save(&timer, ttl).await?;
        self.install_local_task(timer.clone(), duration);

        Ok(timer)
    }

    pub async fn get_timer(&self, group_key: &str) -> Option<GroupTimer> {
        self.inner.storage.load(group_key).await.ok().flatten()
    }

    /// `filter` is currently limited to kind; `None` lists every active
    /// timer persisted for this deployment.
    pub async fn list_active_timers(&self, filter: Option<TimerKind>) -> Vec<GroupTimer> {
        self.inner
            .storage
            .list()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|t| t.state == TimerState::Active)
            .filter(|t| filter.is_none_or(|k| k == t.timer_kind))
            .collect()
    }

    pub fn get_stats(&self) -> TimerManagerStats {
        use std::sync::atomic::Ordering::Relaxed;
        TimerManagerStats {
            active_count: self.inner.local.read().unwrap_or_else(|e| e.into_inner()).len(),
            restored: self.inner.restored.load(Relaxed),
            missed: self.inner.missed.load(Relaxed),
            fired: self.inner.fired.load(Relaxed),
            callback_errors: self.inner.callback_errors.load(Relaxed),
        }
    }

    /// At startup: list every persisted timer; fire already-elapsed ones
    /// immediately (`Missed`) and reinstall the rest with their remaining
    /// duration.
    pub async fn restore_timers(&self) -> (u64, u64) {
        let persisted = self.inner.storage.list().await.unwrap_or_default();
        let mut restored = 0u64;
        let mut missed = 0u64;

        for mut timer in persisted {
            if timer.is_expired() {
                timer.state = TimerState::Missed;
                missed += 1;
                self.inner.missed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Inner::run_expiration(self.inner.clone(), timer.group_key.clone(), timer.timer_kind).await;
            } else {
                let remaining = timer.remaining();
                restored += 1;
                self.inner.restored.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                self.install_local_task(timer, remaining);
            }
        }

        (restored, missed)
    }

    /// Stop accepting new timer starts, cancel in-process tasks (persisted
    /// records remain for the next instance to restore), and wait up to
    /// `grace` for in-flight callbacks.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), crate::error::ShutdownError> {
        self.inner.accepting.store(false, std::sync::atomic::Ordering::SeqCst);
        self.inner.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = {
            let mut local = self.inner.local.write().unwrap_or_else(|e| e.into_inner());
            local.drain().map(|(_, t)| t.handle).collect()
        };

        match tokio::time::timeout(grace, futures::future::join_all(handles)).await {
            Ok(_) => Ok(()),
            Err(_) => Err(crate::error::ShutdownError::Cancelled(grace)),
        }
    }

    fn cancel_local(&self, group_key: &str) -> bool {
        let removed = self
            .inner
            .local
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(group_key);
        if let Some(timer) = removed {
            timer.cancel.cancel();
            true
        } else {
            false
        }
    }

    fn install_local_task(&self, timer: GroupTimer, remaining: Duration) {
        let cancel = CancellationToken::new();
        let inner = self.inner.clone();
        let group_key = timer.group_key.clone();
        let kind = timer.timer_kind;
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = task_cancel.cancelled() => {
                    debug!(group_key = %group_key, "timer cancelled before firing");
                }
                () = tokio::time::sleep(remaining) => {
                    Inner::run_expiration(inner.clone(), group_key.clone(), kind).await;
                    inner.local.write().unwrap_or_else(|e| e.into_inner()).remove(&group_key);
                }
            }
        });

        self.inner
            .local
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(timer.group_key.clone(), LocalTimer { handle, cancel });
    }
}

impl Inner {
    /// The expiration pipeline.
    async fn run_expiration(inner: Arc<Inner>, group_key: String, kind: TimerKind) {
        let lock = match inner.storage.acquire_lock(&group_key, inner.config.lock_ttl).await {
            Ok(lock) => lock,
            Err(crate::error::TimerStorageError::LockHeld(_)) => {
                debug!(group_key = %group_key, "lock held by another instance, skipping");
                return;
            }
            Err(err) => {
                error!(group_key = %group_key, error = %err, "failed to acquire timer lock");
                return;
            }
        };

        let snapshot = inner.group_manager.get_group(&group_key).await;

        let callbacks = inner.callbacks.read().await.clone();
        for callback in callbacks.iter() {
            if let Err(err) = callback.on_expired(&group_key, kind, snapshot.clone()).await {
                inner
                    .callback_errors
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                error!(group_key = %group_key, error = %err, "timer callback failed");
            }
        }
        inner.fired.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        if let Err(err) = inner.storage.delete(&group_key).await {
            warn!(group_key = %group_key, error = %err, "failed to delete expired timer record");
        }

        if let Err(err) = inner.storage.release_lock(&lock).await {
            warn!(group_key = %group_key, error = %err, "failed to release timer lock");
        }
    }
}

impl Clone for GroupTimerManager {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}
