//! Postgres-backed stores.
//!
//! Expected tables (owned by deployment migrations): `alerts` keyed by
//! fingerprint, `alert_history` append-only, `silences` with JSONB matchers,
//! `group_timers` unique on `(group_key, fire_type)`, and `dead_letters`.
//! All statements use the runtime query API so the crate builds without a
//! live database.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;
use url::Url;

use klaxon_contracts::notification::RenderedNotification;
use klaxon_model::{
    Alert, AlertStatus, AlertTransition, Fingerprint, GroupKey, HistoryEntry,
    JobId, Matcher, Priority, Severity, Silence, SilenceId, SilenceStatus,
    StoredAlert,
};

use crate::error::{AlertError, Result};

use super::traits::{
    AlertStore, AlertUpsert, DeadLetterEntry, DeadLetterPage, DeadLetterStore,
    FireType, SilenceStats, SilenceStore, TimerRecord, TimerStore,
};

/// Durable alert rows plus the history log, backed by Postgres.
#[derive(Clone)]
pub struct PostgresAlertStore {
    pool: PgPool,
}

impl fmt::Debug for PostgresAlertStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresAlertStore")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl PostgresAlertStore {
    /// Verify connectivity before handing the store out.
    pub async fn new(pool: PgPool) -> Result<Self> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| {
                AlertError::Internal(format!(
                    "Alert store failed Postgres health check: {e}"
                ))
            })?;
        info!("Alert store connected to Postgres");
        Ok(Self { pool })
    }
}

fn corrupt(context: &str, err: impl fmt::Display) -> AlertError {
    tracing::error!(context, error = %err, "stored row failed to decode");
    AlertError::DataCorruption(format!("{context}: {err}"))
}

fn stored_alert_from_row(row: &PgRow) -> Result<StoredAlert> {
    let fingerprint_hex: String = row.try_get("fingerprint")?;
    let fingerprint = Fingerprint::from_str(&fingerprint_hex)
        .map_err(|e| corrupt("alert fingerprint column", e))?;
    let labels: serde_json::Value = row.try_get("labels")?;
    let annotations: serde_json::Value = row.try_get("annotations")?;
    let status: String = row.try_get("status")?;
    let severity: Option<String> = row.try_get("severity")?;
    let generator_url: Option<String> = row.try_get("generator_url")?;
    let occurrence_count: i64 = row.try_get("occurrence_count")?;

    let severity = severity
        .map(|s| Severity::from_str(&s))
        .transpose()
        .map_err(|e| corrupt("alert severity column", e))?;
    let generator_url = generator_url
        .map(|raw| Url::parse(&raw))
        .transpose()
        .map_err(|e| corrupt("alert generator_url column", e))?;

    Ok(StoredAlert {
        alert: Alert {
            fingerprint,
            alert_name: row.try_get("alert_name")?,
            labels: serde_json::from_value(labels)
                .map_err(|e| corrupt("alert labels column", e))?,
            annotations: serde_json::from_value(annotations)
                .map_err(|e| corrupt("alert annotations column", e))?,
            status: AlertStatus::from_str(&status)
                .map_err(|e| corrupt("alert status column", e))?,
            starts_at: row.try_get("starts_at")?,
            ends_at: row.try_get("ends_at")?,
            generator_url,
            severity,
        },
        occurrence_count: occurrence_count.max(0) as u64,
        first_seen: row.try_get("first_seen")?,
        last_seen: row.try_get("last_seen")?,
    })
}

const ALERT_COLUMNS: &str = "fingerprint, alert_name, labels, annotations, status, \
     starts_at, ends_at, generator_url, severity, occurrence_count, first_seen, last_seen";

#[async_trait]
impl AlertStore for PostgresAlertStore {
    async fn upsert_firing(&self, alert: &Alert) -> Result<AlertUpsert> {
        // Single statement so concurrent ingests of one fingerprint serialize
        // on the row; xmax = 0 distinguishes insert from update.
        let sql = format!(
            r#"
            INSERT INTO alerts
                (fingerprint, alert_name, labels, annotations, status,
                 starts_at, ends_at, generator_url, severity,
                 occurrence_count, first_seen, last_seen)
            VALUES ($1, $2, $3, $4, 'firing', $5, NULL, $6, $7, 1, NOW(), NOW())
            ON CONFLICT (fingerprint) DO UPDATE SET
                occurrence_count = alerts.occurrence_count + 1,
                last_seen = NOW(),
                status = 'firing',
                ends_at = NULL,
                labels = EXCLUDED.labels,
                annotations = EXCLUDED.annotations
            RETURNING {ALERT_COLUMNS}, (xmax = 0) AS inserted
            "#
        );
        let row = sqlx::query(&sql)
            .bind(alert.fingerprint.as_hex())
            .bind(&alert.alert_name)
            .bind(serde_json::to_value(&alert.labels)?)
            .bind(serde_json::to_value(&alert.annotations)?)
            .bind(alert.starts_at)
            .bind(alert.generator_url.as_ref().map(Url::as_str))
            .bind(alert.severity.map(|s| s.as_str()))
            .fetch_one(&self.pool)
            .await?;

        let inserted: bool = row.try_get("inserted")?;
        Ok(AlertUpsert {
            inserted,
            stored: stored_alert_from_row(&row)?,
        })
    }

    async fn resolve(
        &self,
        fingerprint: Fingerprint,
        ends_at: DateTime<Utc>,
    ) -> Result<Option<StoredAlert>> {
        let sql = format!(
            r#"
            UPDATE alerts
            SET status = 'resolved',
                ends_at = $2,
                last_seen = GREATEST(last_seen, $2)
            WHERE fingerprint = $1
            RETURNING {ALERT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(fingerprint.as_hex())
            .bind(ends_at)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(stored_alert_from_row).transpose()
    }

    async fn get(&self, fingerprint: Fingerprint) -> Result<Option<StoredAlert>> {
        let sql =
            format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE fingerprint = $1");
        let row = sqlx::query(&sql)
            .bind(fingerprint.as_hex())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(stored_alert_from_row).transpose()
    }

    async fn set_severity(
        &self,
        fingerprint: Fingerprint,
        severity: Severity,
    ) -> Result<()> {
        sqlx::query("UPDATE alerts SET severity = $2 WHERE fingerprint = $1")
            .bind(fingerprint.as_hex())
            .bind(severity.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn firing_fingerprints(&self) -> Result<Vec<Fingerprint>> {
        let rows =
            sqlx::query("SELECT fingerprint FROM alerts WHERE status = 'firing'")
                .fetch_all(&self.pool)
                .await?;
        rows.iter()
            .map(|row| {
                let hex: String = row.try_get("fingerprint")?;
                Fingerprint::from_str(&hex)
                    .map_err(|e| corrupt("alert fingerprint column", e))
            })
            .collect()
    }

    async fn append_history(&self, entry: &HistoryEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_history (fingerprint, transition, recorded_at, detail)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(entry.fingerprint.as_hex())
        .bind(entry.transition.as_str())
        .bind(entry.recorded_at)
        .bind(entry.detail.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn history(
        &self,
        fingerprint: Fingerprint,
        limit: u32,
    ) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT fingerprint, transition, recorded_at, detail
            FROM alert_history
            WHERE fingerprint = $1
            ORDER BY recorded_at DESC
            LIMIT $2
            "#,
        )
        .bind(fingerprint.as_hex())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let hex: String = row.try_get("fingerprint")?;
                let transition: String = row.try_get("transition")?;
                Ok(HistoryEntry {
                    fingerprint: Fingerprint::from_str(&hex)
                        .map_err(|e| corrupt("history fingerprint column", e))?,
                    transition: AlertTransition::from_str(&transition)
                        .map_err(|e| corrupt("history transition column", e))?,
                    recorded_at: row.try_get("recorded_at")?,
                    detail: row.try_get("detail")?,
                })
            })
            .collect()
    }
}

/// Silence rows with JSONB matchers and optimistic `updated_at` locking.
#[derive(Clone)]
pub struct PostgresSilenceStore {
    pool: PgPool,
}

impl fmt::Debug for PostgresSilenceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresSilenceStore")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl PostgresSilenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SILENCE_COLUMNS: &str = "id, created_by, comment, starts_at, ends_at, \
     matchers, status, created_at, updated_at";

fn silence_from_row(row: &PgRow) -> Result<Silence> {
    let matchers: serde_json::Value = row.try_get("matchers")?;
    let matchers: Vec<Matcher> = serde_json::from_value(matchers)
        .map_err(|e| corrupt("silence matchers column", e))?;
    let status: String = row.try_get("status")?;
    Ok(Silence {
        id: SilenceId(row.try_get("id")?),
        created_by: row.try_get("created_by")?,
        comment: row.try_get("comment")?,
        starts_at: row.try_get("starts_at")?,
        ends_at: row.try_get("ends_at")?,
        matchers,
        status: SilenceStatus::from_str(&status)
            .map_err(|e| corrupt("silence status column", e))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl SilenceStore for PostgresSilenceStore {
    async fn create(&self, silence: &Silence) -> Result<Silence> {
        silence.validate()?;
        let now = Utc::now();
        let status = silence.status_at(now);
        let sql = format!(
            r#"
            INSERT INTO silences
                (id, created_by, comment, starts_at, ends_at, matchers,
                 status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
            RETURNING {SILENCE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(silence.id.0)
            .bind(&silence.created_by)
            .bind(&silence.comment)
            .bind(silence.starts_at)
            .bind(silence.ends_at)
            .bind(serde_json::to_value(&silence.matchers)?)
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    AlertError::Conflict(format!(
                        "silence {} already exists",
                        silence.id
                    ))
                }
                _ => AlertError::from(e),
            })?;
        silence_from_row(&row)
    }

    async fn get(&self, id: SilenceId) -> Result<Option<Silence>> {
        let sql = format!("SELECT {SILENCE_COLUMNS} FROM silences WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(silence_from_row).transpose()
    }

    async fn list(&self, status: Option<SilenceStatus>) -> Result<Vec<Silence>> {
        let rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {SILENCE_COLUMNS} FROM silences WHERE status = $1 \
                     ORDER BY created_at"
                );
                sqlx::query(&sql)
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {SILENCE_COLUMNS} FROM silences ORDER BY created_at"
                );
                sqlx::query(&sql).fetch_all(&self.pool).await?
            }
        };
        rows.iter().map(silence_from_row).collect()
    }

    async fn update(
        &self,
        silence: &Silence,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<Silence> {
        silence.validate()?;
        let sql = format!(
            r#"
            UPDATE silences
            SET created_by = $3,
                comment = $4,
                starts_at = $5,
                ends_at = $6,
                matchers = $7,
                status = $8,
                updated_at = NOW()
            WHERE id = $1 AND updated_at = $2
            RETURNING {SILENCE_COLUMNS}
            "#
        );
        let now = Utc::now();
        let row = sqlx::query(&sql)
            .bind(silence.id.0)
            .bind(expected_updated_at)
            .bind(&silence.created_by)
            .bind(&silence.comment)
            .bind(silence.starts_at)
            .bind(silence.ends_at)
            .bind(serde_json::to_value(&silence.matchers)?)
            .bind(silence.status_at(now).as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => silence_from_row(&row),
            // Distinguish a stale token from a missing row.
            None => match self.get(silence.id).await? {
                Some(current) => Err(AlertError::Conflict(format!(
                    "silence {} was modified at {}, caller expected {}",
                    silence.id, current.updated_at, expected_updated_at
                ))),
                None => {
                    Err(AlertError::NotFound(format!("silence {}", silence.id)))
                }
            },
        }
    }

    async fn delete(&self, id: SilenceId) -> Result<()> {
        let result = sqlx::query("DELETE FROM silences WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AlertError::NotFound(format!("silence {id}")));
        }
        Ok(())
    }

    async fn bulk_update_status(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE silences
            SET status = CASE
                    WHEN $1 < starts_at THEN 'pending'
                    WHEN $1 < ends_at THEN 'active'
                    ELSE 'expired'
                END
            WHERE status <> CASE
                    WHEN $1 < starts_at THEN 'pending'
                    WHEN $1 < ends_at THEN 'active'
                    ELSE 'expired'
                END
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn expire(&self, id: SilenceId, now: DateTime<Utc>) -> Result<Silence> {
        let sql = format!(
            r#"
            UPDATE silences
            SET ends_at = $2, status = 'expired', updated_at = NOW()
            WHERE id = $1
            RETURNING {SILENCE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id.0)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => silence_from_row(&row),
            None => Err(AlertError::NotFound(format!("silence {id}"))),
        }
    }

    async fn expiring_soon(
        &self,
        now: DateTime<Utc>,
        within: Duration,
    ) -> Result<Vec<Silence>> {
        let cutoff = now + within;
        let sql = format!(
            r#"
            SELECT {SILENCE_COLUMNS} FROM silences
            WHERE status = 'active' AND ends_at > $1 AND ends_at <= $2
            ORDER BY ends_at
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(silence_from_row).collect()
    }

    async fn stats(&self) -> Result<SilenceStats> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*)::bigint AS count FROM silences GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = SilenceStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            let count = count.max(0) as u64;
            match SilenceStatus::from_str(&status)
                .map_err(|e| corrupt("silence status column", e))?
            {
                SilenceStatus::Pending => stats.pending = count,
                SilenceStatus::Active => stats.active = count,
                SilenceStatus::Expired => stats.expired = count,
            }
        }
        Ok(stats)
    }

    async fn active(&self, now: DateTime<Utc>) -> Result<Vec<Silence>> {
        let sql = format!(
            r#"
            SELECT {SILENCE_COLUMNS} FROM silences
            WHERE starts_at <= $1 AND ends_at > $1
            ORDER BY created_at
            "#
        );
        let rows = sqlx::query(&sql).bind(now).fetch_all(&self.pool).await?;
        rows.iter().map(silence_from_row).collect()
    }
}

/// Group timer records coordinating flushes across restarts and replicas.
#[derive(Clone)]
pub struct PostgresTimerStore {
    pool: PgPool,
}

impl fmt::Debug for PostgresTimerStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresTimerStore")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl PostgresTimerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn timer_from_row(row: &PgRow) -> Result<TimerRecord> {
    let group_key: String = row.try_get("group_key")?;
    let fire_type: String = row.try_get("fire_type")?;
    Ok(TimerRecord {
        group_key: GroupKey::from(group_key),
        fire_type: FireType::from_str(&fire_type)?,
        fire_at: row.try_get("fire_at")?,
        owner_id: row.try_get("owner_id")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl TimerStore for PostgresTimerStore {
    async fn put_if_absent(&self, record: &TimerRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO group_timers (group_key, fire_type, fire_at, owner_id, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (group_key, fire_type) DO NOTHING
            "#,
        )
        .bind(record.group_key.as_str())
        .bind(record.fire_type.as_str())
        .bind(record.fire_at)
        .bind(&record.owner_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn reschedule(&self, record: &TimerRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO group_timers (group_key, fire_type, fire_at, owner_id, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (group_key, fire_type) DO UPDATE SET
                fire_at = EXCLUDED.fire_at,
                owner_id = EXCLUDED.owner_id,
                updated_at = NOW()
            "#,
        )
        .bind(record.group_key.as_str())
        .bind(record.fire_type.as_str())
        .bind(record.fire_at)
        .bind(&record.owner_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, group_key: &GroupKey, fire_type: FireType) -> Result<()> {
        sqlx::query(
            "DELETE FROM group_timers WHERE group_key = $1 AND fire_type = $2",
        )
        .bind(group_key.as_str())
        .bind(fire_type.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn all(&self) -> Result<Vec<TimerRecord>> {
        let rows = sqlx::query(
            "SELECT group_key, fire_type, fire_at, owner_id, updated_at FROM group_timers",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(timer_from_row).collect()
    }

    async fn claim(
        &self,
        group_key: &GroupKey,
        fire_type: FireType,
        owner_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE group_timers
            SET owner_id = $3, updated_at = NOW()
            WHERE group_key = $1 AND fire_type = $2
            "#,
        )
        .bind(group_key.as_str())
        .bind(fire_type.as_str())
        .bind(owner_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn is_owner(
        &self,
        group_key: &GroupKey,
        fire_type: FireType,
        owner_id: &str,
    ) -> Result<bool> {
        let row = sqlx::query(
            "SELECT owner_id FROM group_timers WHERE group_key = $1 AND fire_type = $2",
        )
        .bind(group_key.as_str())
        .bind(fire_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => {
                let current: String = row.try_get("owner_id")?;
                Ok(current == owner_id)
            }
            None => Ok(false),
        }
    }
}

/// Terminal job failures parked for inspection and replay.
#[derive(Clone)]
pub struct PostgresDeadLetterStore {
    pool: PgPool,
}

impl fmt::Debug for PostgresDeadLetterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresDeadLetterStore")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl PostgresDeadLetterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const DEAD_LETTER_COLUMNS: &str = "job_id, group_key, target_name, priority, \
     attempts, reason, last_error, first_attempt_at, last_attempt_at, payload";

fn dead_letter_from_row(row: &PgRow) -> Result<DeadLetterEntry> {
    let priority: String = row.try_get("priority")?;
    let payload: serde_json::Value = row.try_get("payload")?;
    let payload: RenderedNotification = serde_json::from_value(payload)
        .map_err(|e| corrupt("dead letter payload column", e))?;
    let group_key: String = row.try_get("group_key")?;
    let attempts: i32 = row.try_get("attempts")?;
    Ok(DeadLetterEntry {
        job_id: JobId(row.try_get("job_id")?),
        group_key: GroupKey::from(group_key),
        target_name: row.try_get("target_name")?,
        priority: Priority::from_str(&priority)
            .map_err(|e| corrupt("dead letter priority column", e))?,
        attempts: attempts.max(0) as u32,
        reason: row.try_get("reason")?,
        last_error: row.try_get("last_error")?,
        first_attempt_at: row.try_get("first_attempt_at")?,
        last_attempt_at: row.try_get("last_attempt_at")?,
        payload,
    })
}

#[async_trait]
impl DeadLetterStore for PostgresDeadLetterStore {
    async fn push(&self, entry: &DeadLetterEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dead_letters
                (job_id, group_key, target_name, priority, attempts, reason,
                 last_error, first_attempt_at, last_attempt_at, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(entry.job_id.0)
        .bind(entry.group_key.as_str())
        .bind(&entry.target_name)
        .bind(entry.priority.as_str())
        .bind(entry.attempts as i32)
        .bind(&entry.reason)
        .bind(&entry.last_error)
        .bind(entry.first_attempt_at)
        .bind(entry.last_attempt_at)
        .bind(serde_json::to_value(&entry.payload)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, offset: u64, limit: u32) -> Result<DeadLetterPage> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*)::bigint FROM dead_letters")
                .fetch_one(&self.pool)
                .await?;
        let sql = format!(
            r#"
            SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters
            ORDER BY last_attempt_at DESC
            OFFSET $1 LIMIT $2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(offset as i64)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(DeadLetterPage {
            entries: rows
                .iter()
                .map(dead_letter_from_row)
                .collect::<Result<_>>()?,
            total: total.max(0) as u64,
        })
    }

    async fn get(&self, job_id: JobId) -> Result<Option<DeadLetterEntry>> {
        let sql = format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM dead_letters WHERE job_id = $1"
        );
        let row = sqlx::query(&sql)
            .bind(job_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(dead_letter_from_row).transpose()
    }

    async fn remove(&self, job_id: JobId) -> Result<()> {
        sqlx::query("DELETE FROM dead_letters WHERE job_id = $1")
            .bind(job_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM dead_letters")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
