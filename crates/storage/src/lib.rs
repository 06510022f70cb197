//! Grant and delivery-history persistence.
//!
//! Two traits split the concerns: [`GrantStore`] owns canonical records and
//! their markers, [`DeliveryLog`] owns the append-only attempt history.
//! [`MemoryStore`] implements both for tests and database-less runs;
//! [`PgStore`] implements both on PostgreSQL.

pub mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use grantflow_core::{AttemptFilter, DeliveryAttempt, DeliveryStats, ExportMarkers, Grant, Result};

pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Canonical grant records.
///
/// Every write is a single atomic statement. `update` replaces capture-time
/// fields only; delivery and export markers change exclusively through
/// [`mark_forwarded`](Self::mark_forwarded) and [`set_export`](Self::set_export).
#[async_trait]
pub trait GrantStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Grant>>;

    /// Insert a new grant. An existing id yields `GrantError::PersistenceConflict`.
    async fn insert(&self, grant: &Grant) -> Result<()>;

    /// Overwrite capture-time fields of an existing grant.
    async fn update(&self, grant: &Grant) -> Result<()>;

    /// Unforwarded grants with no delivery attempt at all, oldest first.
    async fn pending_forward(&self, limit: usize) -> Result<Vec<Grant>>;

    /// Conditional `forwarded = false → true`. Returns whether this call set it.
    async fn mark_forwarded(&self, id: &str, attempt_id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// Record the downstream export outcome.
    async fn set_export(&self, id: &str, export: &ExportMarkers) -> Result<()>;

    async fn count(&self) -> Result<u64>;
}

/// Append-only delivery attempt history.
#[async_trait]
pub trait DeliveryLog: Send + Sync {
    async fn append(&self, attempt: &DeliveryAttempt) -> Result<()>;

    /// Highest `(sequence, attempt_number)` for the grant.
    async fn latest_for(&self, grant_id: &str) -> Result<Option<DeliveryAttempt>>;

    /// `max(sequence) + 1`, or 1 when the grant has no attempts.
    async fn next_sequence(&self, grant_id: &str) -> Result<u32>;

    /// Latest attempt per grant that is `retrying` with `next_retry_at <= now`.
    async fn due_retries(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<DeliveryAttempt>>;

    /// Latest attempt per grant whose status is terminal `failed`.
    async fn latest_failed(&self, limit: usize) -> Result<Vec<DeliveryAttempt>>;

    /// Attempts matching the filter, newest first.
    async fn history(&self, filter: &AttemptFilter) -> Result<Vec<DeliveryAttempt>>;

    async fn stats(&self, now: DateTime<Utc>) -> Result<DeliveryStats>;
}

/// Default page size for history queries without an explicit limit.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;
