// Postgres-backed trigger store
//
// Expected schema:
//
//   CREATE TABLE triggers (
//       id              UUID PRIMARY KEY,
//       cron_expression TEXT,
//       time_zone       TEXT,
//       next_run_at     TIMESTAMPTZ,
//       last_run_at     TIMESTAMPTZ,
//       is_active       BOOLEAN NOT NULL,
//       status          TEXT NOT NULL,
//       version         BIGINT NOT NULL,
//       created_at      TIMESTAMPTZ NOT NULL,
//       updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
//   );
//   CREATE INDEX idx_triggers_due ON triggers (next_run_at)
//       WHERE is_active AND status = 'idle';

use crate::errors::StoreError;
use crate::model::{Recurrence, TriggerRecord, TriggerStatus};
use crate::store::TriggerStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use tracing::instrument;
use uuid::Uuid;

pub struct PgTriggerStore {
    pool: PgPool,
}

impl PgTriggerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn record_from_row(row: &PgRow) -> Result<TriggerRecord, StoreError> {
        let cron_expression: Option<String> = row.try_get("cron_expression")?;
        let time_zone: Option<String> = row.try_get("time_zone")?;

        let recurrence = match (cron_expression, time_zone) {
            (Some(expression), Some(zone)) => {
                let time_zone = Tz::from_str(&zone).map_err(|_| {
                    StoreError::Backend(format!("stored timezone '{zone}' is not a valid IANA id"))
                })?;
                Recurrence::Cron {
                    expression,
                    time_zone,
                }
            }
            (None, None) => Recurrence::OneShot,
            _ => {
                return Err(StoreError::Backend(
                    "cron_expression and time_zone must be set together".to_string(),
                ))
            }
        };

        let status_text: String = row.try_get("status")?;
        let status = TriggerStatus::parse(&status_text).ok_or_else(|| {
            StoreError::Backend(format!("unknown trigger status '{status_text}'"))
        })?;

        Ok(TriggerRecord {
            id: row.try_get("id")?,
            recurrence,
            next_run_at: row.try_get("next_run_at")?,
            last_run_at: row.try_get("last_run_at")?,
            is_active: row.try_get("is_active")?,
            status,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn recurrence_columns(record: &TriggerRecord) -> (Option<&str>, Option<String>) {
        match &record.recurrence {
            Recurrence::OneShot => (None, None),
            Recurrence::Cron {
                expression,
                time_zone,
            } => (Some(expression.as_str()), Some(time_zone.to_string())),
        }
    }
}

#[async_trait]
impl TriggerStore for PgTriggerStore {
    #[instrument(skip(self))]
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<TriggerRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, cron_expression, time_zone, next_run_at, last_run_at,
                   is_active, status, version, created_at
            FROM triggers
            WHERE is_active = true
              AND status = 'idle'
              AND next_run_at IS NOT NULL
              AND next_run_at <= $1
            ORDER BY next_run_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(Self::record_from_row(row)?);
        }

        tracing::debug!(count = records.len(), "Found triggers due for execution");
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> Result<Option<TriggerRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, cron_expression, time_zone, next_run_at, last_run_at,
                   is_active, status, version, created_at
            FROM triggers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    #[instrument(skip(self, record), fields(trigger_id = %record.id, version = record.version))]
    async fn save(&self, record: &TriggerRecord) -> Result<TriggerRecord, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE triggers
            SET next_run_at = $3,
                last_run_at = $4,
                is_active = $5,
                status = $6,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING version
            "#,
        )
        .bind(record.id)
        .bind(record.version)
        .bind(record.next_run_at)
        .bind(record.last_run_at)
        .bind(record.is_active)
        .bind(record.status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let mut updated = record.clone();
                updated.version = row.try_get("version")?;
                Ok(updated)
            }
            None => {
                // Zero rows is either a missing record or a stale version.
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM triggers WHERE id = $1)")
                        .bind(record.id)
                        .fetch_one(&self.pool)
                        .await?;

                if exists {
                    Err(StoreError::Conflict {
                        id: record.id,
                        version: record.version,
                    })
                } else {
                    Err(StoreError::NotFound(record.id))
                }
            }
        }
    }

    #[instrument(skip(self, record), fields(trigger_id = %record.id))]
    async fn create(&self, record: &TriggerRecord) -> Result<(), StoreError> {
        let (cron_expression, time_zone) = Self::recurrence_columns(record);

        sqlx::query(
            r#"
            INSERT INTO triggers (
                id, cron_expression, time_zone, next_run_at, last_run_at,
                is_active, status, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            "#,
        )
        .bind(record.id)
        .bind(cron_expression)
        .bind(time_zone)
        .bind(record.next_run_at)
        .bind(record.last_run_at)
        .bind(record.is_active)
        .bind(record.status.as_str())
        .bind(record.version)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(trigger_id = %record.id, "Trigger created");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid, version: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM triggers WHERE id = $1 AND version = $2")
            .bind(id)
            .bind(version)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM triggers WHERE id = $1)")
                    .bind(id)
                    .fetch_one(&self.pool)
                    .await?;

            if exists {
                return Err(StoreError::Conflict { id, version });
            }
            return Err(StoreError::NotFound(id));
        }

        tracing::info!(trigger_id = %id, "Trigger deleted");
        Ok(())
    }
}
