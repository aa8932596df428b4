// Trigger persistence boundary

pub mod memory;
pub mod postgres;

pub use memory::InMemoryTriggerStore;
pub use postgres::PgTriggerStore;

use crate::errors::StoreError;
use crate::model::TriggerRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Abstraction over the persistent trigger store.
///
/// Every mutation is a compare-and-swap keyed on the record's `version`: the
/// store rejects a write whose supplied version no longer matches the stored
/// one with the typed [`StoreError::Conflict`], so callers can treat
/// contention as routine rather than as a defect.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    /// All records eligible for claiming at `now` (active, idle, due),
    /// ordered by `next_run_at` ascending so the earliest-due trigger is
    /// claimed first.
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<TriggerRecord>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TriggerRecord>, StoreError>;

    /// Persist `record` if and only if the stored version still equals
    /// `record.version`. On success returns the record with its version
    /// bumped; on a stale version returns [`StoreError::Conflict`].
    async fn save(&self, record: &TriggerRecord) -> Result<TriggerRecord, StoreError>;

    /// Insert a new record.
    async fn create(&self, record: &TriggerRecord) -> Result<(), StoreError>;

    /// Delete the record if its stored version still equals `version`.
    async fn delete(&self, id: Uuid, version: i64) -> Result<(), StoreError>;
}
