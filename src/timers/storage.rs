//! Timer Storage: the persistent side of group timers, plus the
//! distributed lock used at expiration.
//!
//! The Redis backend uses `redis::aio::ConnectionManager` over plain
//! GET/SET/DEL with TTL, and a `SET NX`/Lua compare-and-delete lock to
//! decide "who currently owns this" across instances.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::warn;
use uuid::Uuid;

use crate::error::TimerStorageError;

use super::model::GroupTimer;

/// A held distributed lock; `release` is a no-op if another instance has
/// since acquired the lock for the same key (compare-and-delete on `lock_id`).
pub struct LockHandle {
    pub group_key: String,
    pub lock_id: Uuid,
}

/// Abstracts the persistent side of group timers.
#[async_trait]
pub trait TimerStorage: Send + Sync {
    /// Upsert, with TTL derived by the caller as `duration + grace`.
    async fn save(&self, timer: &GroupTimer, ttl: Duration) -> Result<(), TimerStorageError>;

    async fn load(&self, group_key: &str) -> Result<Option<GroupTimer>, TimerStorageError>;

    async fn delete(&self, group_key: &str) -> Result<(), TimerStorageError>;

    /// Used only at startup and for admin queries.
    async fn list(&self) -> Result<Vec<GroupTimer>, TimerStorageError>;

    /// Acquire a mutual-exclusion lock on `group_key`, returning a handle
    /// whose `lock_id` must be presented back to [`Self::release_lock`].
    async fn acquire_lock(
        &self,
        group_key: &str,
        ttl: Duration,
    ) -> Result<LockHandle, TimerStorageError>;

    /// Release `handle` only if it is still the current holder
    /// (compare-and-delete).
    async fn release_lock(&self, handle: &LockHandle) -> Result<(), TimerStorageError>;
}

/// In-memory fallback for environments without a KV store. HA guarantees are
/// explicitly not provided: a second instance has no visibility into this
/// instance's timers or locks.
#[derive(Default)]
pub struct InMemoryTimerStorage {
    timers: RwLock<HashMap<String, GroupTimer>>,
    locks: RwLock<HashMap<String, Uuid>>,
}

impl InMemoryTimerStorage {
    pub fn new() -> Self {
        warn!("using in-memory timer storage: no HA guarantees across instances");
        Self::default()
    }
}

#[async_trait]
impl TimerStorage for InMemoryTimerStorage {
    async fn save(&self, timer: &GroupTimer, _ttl: Duration) -> Result<(), TimerStorageError> {
        self.timers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(timer.group_key.clone(), timer.clone());
        Ok(())
    }

    async fn load(&self, group_key: &str) -> Result<Option<GroupTimer>, TimerStorageError> {
        Ok(self
            .timers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(group_key)
            .cloned())
    }

    async fn delete(&self, group_key: &str) -> Result<(), TimerStorageError> {
        self.timers.write().unwrap_or_else(|e| e.into_inner()).remove(group_key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<GroupTimer>, TimerStorageError> {
        Ok(self
            .timers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect())
    }

    async fn acquire_lock(
        &self,
        group_key: &str,
        _ttl: Duration,
    ) -> Result<LockHandle, TimerStorageError> {
        let mut locks = self.locks.write().unwrap_or_else(|e| e.into_inner());
        if locks.contains_key(group_key) {
            return Err(TimerStorageError::LockHeld(group_key.to_string()));
        }
        let lock_id = Uuid::new_v4();
        locks.insert(group_key.to_string(), lock_id);
        Ok(LockHandle {
            group_key: group_key.to_string(),
            lock_id,
        })
    }

    async fn release_lock(&self, handle: &LockHandle) -> Result<(), TimerStorageError> {
        let mut locks = self.locks.write().unwrap_or_else(|e| e.into_inner());
        if locks.get(&handle.group_key) == Some(&handle.lock_id) {
            locks.remove(&handle.group_key);
        }
        Ok(())
    }
}

/// Redis-backed [`TimerStorage`] for multi-instance deployments, using
/// `timer:{group_key}` / `lock:timer:{group_key}` keys.
pub struct RedisTimerStorage {
    conn: redis::aio::ConnectionManager,
}

impl RedisTimerStorage {
    pub async fn connect(redis_url: &str) -> Result<Self, TimerStorageError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| TimerStorageError::Unavailable(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| TimerStorageError::Unavailable(e.to_string()))?;
        Ok(Self { conn })
    }

    fn timer_key(group_key: &str) -> String {
        format!("timer:{group_key}")
    }

    fn lock_key(group_key: &str) -> String {
        format!("lock:timer:{group_key}")
    }

    /// Sorted-set index on `expires_at`, enabling admin listing in expiry
    /// order.
    fn index_key() -> &'static str {
        "timer:index:expires_at"
    }
}

#[async_trait]
impl TimerStorage for RedisTimerStorage {
    async fn save(&self, timer: &GroupTimer, ttl: Duration) -> Result<(), TimerStorageError> {
        let payload = serde_json::to_string(timer)
            .map_err(|e| TimerStorageError::Unavailable(e.to_string()))?;
        let mut conn = self.conn.clone();
        let ttl_secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(Self::timer_key(&timer.group_key), payload, ttl_secs)
            .await
            .map_err(|e| TimerStorageError::Unavailable(e.to_string()))?;
        conn.zadd::<_, _, _, ()>(
            Self::index_key(),
            &timer.group_key,
            timer.expires_at.timestamp(),
        )
        .await
        .map_err(|e| TimerStorageError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn load(&self, group_key: &str) -> Result<Option<GroupTimer>, TimerStorageError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(Self::timer_key(group_key))
            .await
            .map_err(|e| TimerStorageError::Unavailable(e.to_string()))?;
        raw.map(|s| serde_json::from_str(&s).map_err(|e| TimerStorageError::Unavailable(e.to_string())))
            .transpose()
    }

    async fn delete(&self, group_key: &str) -> Result<(), TimerStorageError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::timer_key(group_key))
            .await
            .map_err(|e| TimerStorageError::Unavailable(e.to_string()))?;
        conn.zrem::<_, _, ()>(Self::index_key(), group_key)
            .await
            .map_err(|e| TimerStorageError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<GroupTimer>, TimerStorageError> {
        let mut conn = self.conn.clone();
        let group_keys: Vec<String> = conn
            .zrange(Self::index_key(), 0, -1)
            .await
            .map_err(|e| TimerStorageError::Unavailable(e.to_string()))?;

        let mut timers = Vec::with_capacity(group_keys.len());
        for key in group_keys {
            if let Some(timer) = self.load(&key).await? {
                timers.push(timer);
            }
        }
        Ok(timers)
    }

    async fn acquire_lock(
        &self,
        group_key: &str,
        ttl: Duration,
    ) -> Result<LockHandle, TimerStorageError> {
        let lock_id = Uuid::new_v4();
        let mut conn = self.conn.clone();
        let acquired: bool = redis::cmd("SET")
            .arg(Self::lock_key(group_key))
            .arg(lock_id.to_string())
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<Option<String>>(&mut conn)
            .await
            .map(|r| r.is_some())
            .map_err(|e| TimerStorageError::Unavailable(e.to_string()))?;

        if !acquired {
            return Err(TimerStorageError::LockHeld(group_key.to_string()));
        }

        Ok(LockHandle {
            group_key: group_key.to_string(),
            lock_id,
        })
    }

    async fn release_lock(&self, handle: &LockHandle) -> Result<(), TimerStorageError> {
        // Compare-and-delete: only remove the key if it still holds our
        // lock_id, via a small Lua script for atomicity.
        const SCRIPT: &str = r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
        "#;
        let mut conn = self.conn.clone();
        redis::Script::new(SCRIPT)
            .key(Self::lock_key(&handle.group_key))
            .arg(handle.lock_id.to_string())
            .invoke_async::<i64>(&mut conn)
            .await
            .map_err(|e| TimerStorageError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timers::model::TimerKind;

    fn timer(key: &str) -> GroupTimer {
        GroupTimer::new(key, TimerKind::GroupWait, Duration::from_secs(30), "test-instance")
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let storage = InMemoryTimerStorage::new();
        storage.save(&timer("g1"), Duration::from_secs(90)).await.unwrap();
        let loaded = storage.load("g1").await.unwrap().unwrap();
        assert_eq!(loaded.group_key, "g1");
    }

    #[tokio::test]
    async fn delete_removes_timer() {
        let storage = InMemoryTimerStorage::new();
        storage.save(&timer("g1"), Duration::from_secs(90)).await.unwrap();
        storage.delete("g1").await.unwrap();
        assert!(storage.load("g1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lock_is_mutually_exclusive_until_released() {
        let storage = InMemoryTimerStorage::new();
        let handle = storage.acquire_lock("g1", Duration::from_secs(30)).await.unwrap();
        let err = storage.acquire_lock("g1", Duration::from_secs(30)).await.unwrap_err();
        assert!(matches!(err, TimerStorageError::LockHeld(_)));
        storage.release_lock(&handle).await.unwrap();
        assert!(storage.acquire_lock("g1", Duration::from_secs(30)).await.is_ok());
    }

    #[tokio::test]
    async fn release_is_a_no_op_for_a_stale_handle() {
        let storage = InMemoryTimerStorage::new();
        let handle = storage.acquire_lock("g1", Duration::from_secs(30)).await.unwrap();
        storage.release_lock(&handle).await.unwrap();
        let new_handle = storage.acquire_lock("g1", Duration::from_secs(30)).await.unwrap();
        // Releasing the old (already-released) handle must not disturb the
        // new holder's lock.
        storage.release_lock(&handle).await.unwrap();
        assert!(storage
            .acquire_lock("g1", Duration::from_secs(30))
            .await
            .is_err());
        storage.release_lock(&new_handle).await.unwrap();
    }

    #[tokio::test]
    async fn list_returns_all_saved_timers() {
        let storage = InMemoryTimerStorage::new();
        storage.save(&timer("g1"), Duration::from_secs(90)).await.unwrap();
        storage.save(&timer("g2"), Duration::from_secs(90)).await.unwrap();
        assert_eq!(storage.list().await.unwrap().len(), 2);
    }
}
