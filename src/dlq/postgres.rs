//! Postgres-backed [`DeadLetterStore`].
//!
//! A `sqlx::PgPool` wrapped in a thin struct, one query per trait method,
//! `FromRow` structs mapped back into domain types. No `.context(...)` here
//! since every error is a typed [`DlqError`] rather than an `anyhow` chain.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::classify::ErrorKind;
use crate::error::DlqError;
use crate::job::{JobPriority, PublishingJob};

use super::store::{DeadLetterStore, DlqEntry, DlqFilter, DlqStats, ReplayOutcome};

/// Postgres-backed implementation. Construction runs `CREATE TABLE IF NOT
/// EXISTS` plus the required secondary indices, so the store is usable
/// against a bare database without a separate migration step.
pub struct PostgresDeadLetterStore {
    pool: PgPool,
}

impl PostgresDeadLetterStore {
    /// Connect and ensure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, DlqError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| DlqError::StorageUnavailable(e.to_string()))?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Wrap an already-constructed pool (tests, shared-pool setups).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_schema(&self) -> Result<(), DlqError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dead_letter_entries (
                id UUID PRIMARY KEY,
                job_id UUID NOT NULL,
                alert_fingerprint TEXT NOT NULL,
                alert JSONB NOT NULL,
                destination JSONB NOT NULL,
                destination_name TEXT NOT NULL,
                priority SMALLINT NOT NULL,
                error_kind TEXT NOT NULL,
                last_error TEXT NOT NULL,
                retry_count INTEGER NOT NULL,
                failed_at TIMESTAMPTZ NOT NULL,
                replayed BOOLEAN NOT NULL DEFAULT FALSE,
                replayed_job_id UUID
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DlqError::StorageUnavailable(e.to_string()))?;

        for (name, column) in [
            ("idx_dle_destination_name", "destination_name"),
            ("idx_dle_priority", "priority"),
            ("idx_dle_error_kind", "error_kind"),
            ("idx_dle_replayed", "replayed"),
            ("idx_dle_alert_fingerprint", "alert_fingerprint"),
        ] {
            let sql = format!("CREATE INDEX IF NOT EXISTS {name} ON dead_letter_entries ({column})");
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| DlqError::StorageUnavailable(e.to_string()))?;
        }
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_dle_failed_at ON dead_letter_entries (failed_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DlqError::StorageUnavailable(e.to_string()))?;

        Ok(())
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<DlqEntry, DlqError> {
        let priority_raw: i16 = row.try_get("priority").map_err(row_err)?;
        let priority = priority_from_i16(priority_raw);
        let error_kind_raw: String = row.try_get("error_kind").map_err(row_err)?;
        let error_kind = error_kind_from_str(&error_kind_raw);
        let alert: serde_json::Value = row.try_get("alert").map_err(row_err)?;
        let destination: serde_json::Value = row.try_get("destination").map_err(row_err)?;

        Ok(DlqEntry {
            id: row.try_get("id").map_err(row_err)?,
            job_id: row.try_get("job_id").map_err(row_err)?,
            alert: serde_json::from_value(alert)
                .map_err(|e| DlqError::StorageUnavailable(e.to_string()))?,
            destination: serde_json::from_value(destination)
                .map_err(|e| DlqError::StorageUnavailable(e.to_string()))?,
            priority,
            error_kind,
            last_error: row.try_get("last_error").map_err(row_err)?,
            retry_count: row.try_get::<i32, _>("retry_count").map_err(row_err)? as u32,
            failed_at: row.try_get("failed_at").map_err(row_err)?,
            replayed: row.try_get("replayed").map_err(row_err)?,
            replayed_job_id: row.try_get("replayed_job_id").map_err(row_err)?,
        })
    }
}

fn row_err(e: sqlx::Error) -> DlqError {
    DlqError::StorageUnavailable(e.to_string())
}

fn priority_to_i16(p: JobPriority) -> i16 {
    match p {
        JobPriority::High => 0,
        JobPriority::Medium => 1,
        JobPriority::Low => 2,
    }
}

fn priority_from_i16(v: i16) -> JobPriority {
    match v {
        0 => JobPriority::High,
        2 => JobPriority::Low,
        _ => JobPriority::Medium,
    }
}

fn error_kind_to_str(k: ErrorKind) -> &'static str {
    match k {
        ErrorKind::Transient => "transient",
        ErrorKind::Permanent => "permanent",
        ErrorKind::Unknown => "unknown",
    }
}

fn error_kind_from_str(s: &str) -> ErrorKind {
    match s {
        "transient" => ErrorKind::Transient,
        "permanent" => ErrorKind::Permanent,
        _ => ErrorKind::Unknown,
    }
}

#[async_trait]
impl DeadLetterStore for PostgresDeadLetterStore {
    async fn write(&self, job: &PublishingJob) -> Result<DlqEntry, DlqError> {
        let entry = DlqEntry::from_job(job);
        let alert_json = serde_json::to_value(&entry.alert)
            .map_err(|e| DlqError::Rejected(e.to_string()))?;
        let destination_json = serde_json::to_value(&entry.destination)
            .map_err(|e| DlqError::Rejected(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO dead_letter_entries
                (id, job_id, alert_fingerprint, alert, destination, destination_name,
                 priority, error_kind, last_error, retry_count, failed_at, replayed, replayed_job_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(entry.id)
        .bind(entry.job_id)
        .bind(&entry.alert.fingerprint)
        .bind(&alert_json)
        .bind(&destination_json)
        .bind(&entry.destination.name)
        .bind(priority_to_i16(entry.priority))
        .bind(error_kind_to_str(entry.error_kind))
        .bind(&entry.last_error)
        .bind(entry.retry_count as i32)
        .bind(entry.failed_at)
        .bind(entry.replayed)
        .bind(entry.replayed_job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| DlqError::Rejected(e.to_string()))?;

        Ok(entry)
    }

    async fn list(
        &self,
        filter: &DlqFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<DlqEntry>, DlqError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM dead_letter_entries
            WHERE ($1::TEXT IS NULL OR destination_name = $1)
              AND ($2::TEXT IS NULL OR error_kind = $2)
              AND ($3::SMALLINT IS NULL OR priority = $3)
              AND ($4::TIMESTAMPTZ IS NULL OR failed_at >= $4)
            ORDER BY failed_at DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(filter.destination.as_deref())
        .bind(filter.error_kind.map(error_kind_to_str))
        .bind(filter.priority.map(priority_to_i16))
        .bind(filter.since)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(row_err)?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn get(&self, id: Uuid) -> Result<Option<DlqEntry>, DlqError> {
        let row = sqlx::query("SELECT * FROM dead_letter_entries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(row_err)?;
        row.as_ref().map(Self::row_to_entry).transpose()
    }

    async fn replay(&self, id: Uuid) -> Result<ReplayOutcome, DlqError> {
        // Conditional UPDATE does the check-and-flip atomically under the
        // row lock, so two concurrent replays of the same entry can't both
        // observe "not yet replayed".
        let new_job_id = Uuid::new_v4();
        let flipped = sqlx::query(
            r#"
            UPDATE dead_letter_entries SET replayed = TRUE, replayed_job_id = $2
            WHERE id = $1 AND replayed = FALSE
            RETURNING replayed_job_id
            "#,
        )
        .bind(id)
        .bind(new_job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(row_err)?;

        if let Some(row) = flipped {
            let job_id: Uuid = row.try_get("replayed_job_id").map_err(row_err)?;
            return Ok(ReplayOutcome {
                job_id,
                first_replay: true,
            });
        }

        let row = sqlx::query("SELECT replayed, replayed_job_id FROM dead_letter_entries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(row_err)?
            .ok_or(DlqError::NotFound(id))?;

        let already_replayed: bool = row.try_get("replayed").map_err(row_err)?;
        if !already_replayed {
            return Err(DlqError::NotFound(id));
        }
        let job_id: Option<Uuid> = row.try_get("replayed_job_id").map_err(row_err)?;
        let job_id = job_id.ok_or(DlqError::NotFound(id))?;
        Ok(ReplayOutcome {
            job_id,
            first_replay: false,
        })
    }

    async fn purge(&self, older_than: chrono::Duration) -> Result<u64, DlqError> {
        let cutoff: DateTime<Utc> = Utc::now() - older_than;
        let result = sqlx::query("DELETE FROM dead_letter_entries WHERE failed_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(row_err)?;
        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<DlqStats, DlqError> {
        let total_row = sqlx::query(
            "SELECT COUNT(*) AS total, MIN(failed_at) AS oldest, MAX(failed_at) AS newest, \
             COUNT(*) FILTER (WHERE replayed) AS replayed_count FROM dead_letter_entries",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(row_err)?;

        let mut stats = DlqStats {
            total: total_row.try_get::<i64, _>("total").map_err(row_err)? as u64,
            oldest: total_row.try_get("oldest").map_err(row_err)?,
            newest: total_row.try_get("newest").map_err(row_err)?,
            replayed_count: total_row.try_get::<i64, _>("replayed_count").map_err(row_err)? as u64,
            ..Default::default()
        };

        for row in sqlx::query("SELECT destination_name, COUNT(*) AS n FROM dead_letter_entries GROUP BY destination_name")
            .fetch_all(&self.pool)
            .await
            .map_err(row_err)?
        {
            let name: String = row.try_get("destination_name").map_err(row_err)?;
            let n: i64 = row.try_get("n").map_err(row_err)?;
            stats.by_destination.insert(name, n as u64);
        }

        for row in sqlx::query("SELECT error_kind, COUNT(*) AS n FROM dead_letter_entries GROUP BY error_kind")
            .fetch_all(&self.pool)
            .await
            .map_err(row_err)?
        {
            let kind: String = row.try_get("error_kind").map_err(row_err)?;
            let n: i64 = row.try_get("n").map_err(row_err)?;
            stats.by_error_kind.insert(kind, n as u64);
        }

        for row in sqlx::query("SELECT priority, COUNT(*) AS n FROM dead_letter_entries GROUP BY priority")
            .fetch_all(&self.pool)
            .await
            .map_err(row_err)?
        {
            let priority_raw: i16 = row.try_get("priority").map_err(row_err)?;
            let n: i64 = row.try_get("n").map_err(row_err)?;
            stats
                .by_priority
                .insert(format!("{:?}", priority_from_i16(priority_raw)), n as u64);
        }

        Ok(stats)
    }
}
