//! PostgreSQL implementation of [`GrantStore`] and [`DeliveryLog`].
//!
//! Capture-time fields are stored as a JSONB `body`; identity, markers and a
//! few query columns are real columns. Every write is one statement.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use grantflow_core::{
    AttemptFilter, AttemptStatus, DeliveryAttempt, DeliveryStats, ExportMarkers, Grant, GrantDraft, Result,
};

use crate::error::{map_unique_violation, StoreError};
use crate::{DeliveryLog, GrantStore, DEFAULT_HISTORY_LIMIT};

const GRANT_COLUMNS: &str = "id, body, forwarded, forwarded_at, forwarded_attempt, export_status, \
     external_row_id, external_url, export_error, exported_at, captured_at, updated_at";

const ATTEMPT_COLUMNS: &str = "id, grant_id, sequence, attempt_number, status, http_status, created_at, \
     sent_at, next_retry_at, response_body, error_kind, error_message, latency_ms, trigger";

// ── Row types ────────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct GrantRow {
    id: String,
    body: serde_json::Value,
    forwarded: bool,
    forwarded_at: Option<DateTime<Utc>>,
    forwarded_attempt: Option<Uuid>,
    export_status: String,
    external_row_id: Option<String>,
    external_url: Option<String>,
    export_error: Option<String>,
    exported_at: Option<DateTime<Utc>>,
    captured_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<GrantRow> for Grant {
    type Error = StoreError;

    fn try_from(row: GrantRow) -> std::result::Result<Self, Self::Error> {
        let data: GrantDraft = serde_json::from_value(row.body)
            .map_err(|e| StoreError::Decode(format!("grant {} body: {}", row.id, e)))?;
        let export_status = row.export_status.parse().map_err(StoreError::Decode)?;
        Ok(Grant {
            id: row.id,
            data,
            forwarded: row.forwarded,
            forwarded_at: row.forwarded_at,
            forwarded_attempt: row.forwarded_attempt,
            export: ExportMarkers {
                export_status,
                external_row_id: row.external_row_id,
                external_url: row.external_url,
                export_error: row.export_error,
                exported_at: row.exported_at,
            },
            captured_at: row.captured_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AttemptRow {
    id: Uuid,
    grant_id: String,
    sequence: i32,
    attempt_number: i32,
    status: String,
    http_status: Option<i32>,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    next_retry_at: Option<DateTime<Utc>>,
    response_body: Option<String>,
    error_kind: Option<String>,
    error_message: Option<String>,
    latency_ms: Option<i64>,
    trigger: String,
}

impl TryFrom<AttemptRow> for DeliveryAttempt {
    type Error = StoreError;

    fn try_from(row: AttemptRow) -> std::result::Result<Self, Self::Error> {
        Ok(DeliveryAttempt {
            id: row.id,
            grant_id: row.grant_id,
            sequence: row.sequence.max(0) as u32,
            attempt_number: row.attempt_number.max(0) as u32,
            status: row.status.parse().map_err(StoreError::Decode)?,
            http_status: row.http_status.map(|s| s as u16),
            created_at: row.created_at,
            sent_at: row.sent_at,
            next_retry_at: row.next_retry_at,
            response_body: row.response_body,
            error_kind: row.error_kind.map(|k| k.parse()).transpose().map_err(StoreError::Decode)?,
            error_message: row.error_message,
            latency_ms: row.latency_ms.map(|ms| ms.max(0) as u64),
            trigger: row.trigger.parse().map_err(StoreError::Decode)?,
        })
    }
}

fn decode_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter()
        .map(|r| T::try_from(r).map_err(Into::into))
        .collect()
}

// ── Store ────────────────────────────────────────────────────────────

/// PostgreSQL-backed store. Cheap to clone (the pool is reference counted).
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn body(grant: &Grant) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&grant.data)?)
    }

    /// Subquery yielding the latest attempt per grant.
    fn latest_attempts_sql() -> String {
        format!(
            "SELECT DISTINCT ON (grant_id) {ATTEMPT_COLUMNS} FROM delivery_attempts \
             ORDER BY grant_id, sequence DESC, attempt_number DESC"
        )
    }
}

#[async_trait]
impl GrantStore for PgStore {
    async fn get(&self, id: &str) -> Result<Option<Grant>> {
        let row = sqlx::query_as::<_, GrantRow>(&format!("SELECT {GRANT_COLUMNS} FROM grants WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(row.map(Grant::try_from).transpose()?)
    }

    async fn insert(&self, grant: &Grant) -> Result<()> {
        let publication: Option<NaiveDate> = grant.data.publication_date;
        sqlx::query(
            "INSERT INTO grants (id, source, natural_code, title, publication_date, is_open, relevance_score,
                                 body, forwarded, forwarded_at, forwarded_attempt, export_status,
                                 external_row_id, external_url, export_error, exported_at, captured_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
        )
        .bind(&grant.id)
        .bind(grant.data.source.prefix())
        .bind(&grant.data.natural_code)
        .bind(&grant.data.title)
        .bind(publication)
        .bind(grant.data.is_open)
        .bind(grant.data.relevance_score)
        .bind(Self::body(grant)?)
        .bind(grant.forwarded)
        .bind(grant.forwarded_at)
        .bind(grant.forwarded_attempt)
        .bind(grant.export.export_status.as_str())
        .bind(&grant.export.external_row_id)
        .bind(&grant.export.external_url)
        .bind(&grant.export.export_error)
        .bind(grant.export.exported_at)
        .bind(grant.captured_at)
        .bind(grant.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, &grant.id))?;
        Ok(())
    }

    async fn update(&self, grant: &Grant) -> Result<()> {
        let result = sqlx::query(
            "UPDATE grants SET
                title = $2,
                publication_date = $3,
                is_open = $4,
                relevance_score = $5,
                body = $6,
                updated_at = $7
             WHERE id = $1",
        )
        .bind(&grant.id)
        .bind(&grant.data.title)
        .bind(grant.data.publication_date)
        .bind(grant.data.is_open)
        .bind(grant.data.relevance_score)
        .bind(Self::body(grant)?)
        .bind(grant.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("grant {}", grant.id)).into());
        }
        Ok(())
    }

    async fn pending_forward(&self, limit: usize) -> Result<Vec<Grant>> {
        let rows = sqlx::query_as::<_, GrantRow>(&format!(
            "SELECT {GRANT_COLUMNS} FROM grants g
             WHERE g.forwarded = false
               AND NOT EXISTS (SELECT 1 FROM delivery_attempts a WHERE a.grant_id = g.id)
             ORDER BY g.captured_at, g.id
             LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;
        decode_all(rows)
    }

    async fn mark_forwarded(&self, id: &str, attempt_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE grants SET forwarded = true, forwarded_at = $2, forwarded_attempt = $3
             WHERE id = $1 AND forwarded = false",
        )
        .bind(id)
        .bind(at)
        .bind(attempt_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_export(&self, id: &str, export: &ExportMarkers) -> Result<()> {
        let result = sqlx::query(
            "UPDATE grants SET
                export_status = $2,
                external_row_id = $3,
                external_url = $4,
                export_error = $5,
                exported_at = $6
             WHERE id = $1",
        )
        .bind(id)
        .bind(export.export_status.as_str())
        .bind(&export.external_row_id)
        .bind(&export.external_url)
        .bind(&export.export_error)
        .bind(export.exported_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("grant {id}")).into());
        }
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM grants")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(n.max(0) as u64)
    }
}

#[async_trait]
impl DeliveryLog for PgStore {
    async fn append(&self, attempt: &DeliveryAttempt) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO delivery_attempts ({ATTEMPT_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(attempt.id)
        .bind(&attempt.grant_id)
        .bind(attempt.sequence as i32)
        .bind(attempt.attempt_number as i32)
        .bind(attempt.status.as_str())
        .bind(attempt.http_status.map(i32::from))
        .bind(attempt.created_at)
        .bind(attempt.sent_at)
        .bind(attempt.next_retry_at)
        .bind(&attempt.response_body)
        .bind(attempt.error_kind.map(|k| k.as_str()))
        .bind(&attempt.error_message)
        .bind(attempt.latency_ms.map(|ms| ms as i64))
        .bind(attempt.trigger.as_str())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn latest_for(&self, grant_id: &str) -> Result<Option<DeliveryAttempt>> {
        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM delivery_attempts
             WHERE grant_id = $1
             ORDER BY sequence DESC, attempt_number DESC
             LIMIT 1"
        ))
        .bind(grant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(row.map(DeliveryAttempt::try_from).transpose()?)
    }

    async fn next_sequence(&self, grant_id: &str) -> Result<u32> {
        let max = sqlx::query_scalar::<_, Option<i32>>(
            "SELECT MAX(sequence) FROM delivery_attempts WHERE grant_id = $1",
        )
        .bind(grant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(max.unwrap_or(0).max(0) as u32 + 1)
    }

    async fn due_retries(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<DeliveryAttempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM ({}) latest
             WHERE status = 'retrying' AND next_retry_at <= $1
             ORDER BY next_retry_at
             LIMIT $2",
            Self::latest_attempts_sql()
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;
        decode_all(rows)
    }

    async fn latest_failed(&self, limit: usize) -> Result<Vec<DeliveryAttempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM ({}) latest
             WHERE status = 'failed'
             ORDER BY created_at
             LIMIT $1",
            Self::latest_attempts_sql()
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;
        decode_all(rows)
    }

    async fn history(&self, filter: &AttemptFilter) -> Result<Vec<DeliveryAttempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM delivery_attempts
             WHERE ($1::text IS NULL OR grant_id = $1)
               AND ($2::text IS NULL OR status = $2)
             ORDER BY created_at DESC, sequence DESC, attempt_number DESC
             LIMIT $3"
        ))
        .bind(&filter.grant_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit.unwrap_or(DEFAULT_HISTORY_LIMIT) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;
        decode_all(rows)
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<DeliveryStats> {
        let (total, successful, failed, retrying, pending) = sqlx::query_as::<_, (i64, i64, i64, i64, i64)>(
            "SELECT COUNT(*),
                    COUNT(*) FILTER (WHERE status = 'success'),
                    COUNT(*) FILTER (WHERE status = 'failed'),
                    COUNT(*) FILTER (WHERE status = 'retrying'),
                    COUNT(*) FILTER (WHERE status = 'pending')
             FROM delivery_attempts",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from)?;

        let pending_retries = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM ({}) latest WHERE status = 'retrying' AND next_retry_at <= $1",
            Self::latest_attempts_sql()
        ))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from)?;

        let forwarded = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM grants WHERE forwarded = true")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)?;

        let as_u64 = |n: i64| n.max(0) as u64;
        Ok(DeliveryStats {
            total_attempts: as_u64(total),
            successful: as_u64(successful),
            failed: as_u64(failed),
            retrying: as_u64(retrying),
            pending: as_u64(pending),
            pending_retries: as_u64(pending_retries),
            success_rate: if total > 0 { successful as f64 / total as f64 } else { 0.0 },
            forwarded_grants: as_u64(forwarded),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grantflow_core::{Source, Trigger};

    #[test]
    fn grant_row_decodes_body_and_markers() {
        let draft = GrantDraft::new(Source::Gazette, "BOE-A-2024-1", "Orden de ayudas");
        let row = GrantRow {
            id: "BOE-BOE-A-2024-1".into(),
            body: serde_json::to_value(&draft).unwrap(),
            forwarded: true,
            forwarded_at: Some(Utc::now()),
            forwarded_attempt: Some(Uuid::new_v4()),
            export_status: "export_failed".into(),
            external_row_id: None,
            external_url: None,
            export_error: Some("sheet locked".into()),
            exported_at: None,
            captured_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let grant = Grant::try_from(row).unwrap();
        assert_eq!(grant.data, draft);
        assert!(grant.forwarded);
        assert_eq!(grant.export.export_status, grantflow_core::ExportStatus::ExportFailed);
    }

    #[test]
    fn attempt_row_rejects_unknown_status() {
        let row = AttemptRow {
            id: Uuid::new_v4(),
            grant_id: "g".into(),
            sequence: 1,
            attempt_number: 1,
            status: "exploded".into(),
            http_status: None,
            created_at: Utc::now(),
            sent_at: None,
            next_retry_at: None,
            response_body: None,
            error_kind: None,
            error_message: None,
            latency_ms: None,
            trigger: Trigger::Auto.as_str().into(),
        };
        assert!(matches!(DeliveryAttempt::try_from(row), Err(StoreError::Decode(_))));
    }

    #[test]
    fn attempt_row_decodes_optional_fields() {
        let row = AttemptRow {
            id: Uuid::new_v4(),
            grant_id: "g".into(),
            sequence: 2,
            attempt_number: 3,
            status: AttemptStatus::Failed.as_str().into(),
            http_status: Some(503),
            created_at: Utc::now(),
            sent_at: Some(Utc::now()),
            next_retry_at: None,
            response_body: Some("unavailable".into()),
            error_kind: Some("max_retries".into()),
            error_message: Some("gave up".into()),
            latency_ms: Some(42),
            trigger: "sweep".into(),
        };
        let attempt = DeliveryAttempt::try_from(row).unwrap();
        assert_eq!(attempt.http_status, Some(503));
        assert_eq!(attempt.error_kind, Some(grantflow_core::ErrorKind::MaxRetries));
        assert_eq!(attempt.trigger, Trigger::Sweep);
    }
}
