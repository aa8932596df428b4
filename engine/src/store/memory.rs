// In-memory trigger store for tests and single-process embedding

use crate::errors::StoreError;
use crate::model::TriggerRecord;
use crate::store::TriggerStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// A `TriggerStore` backed by a map. Honors the same compare-and-swap
/// contract as the Postgres adapter, so claim-contention behavior is
/// identical under test.
#[derive(Default)]
pub struct InMemoryTriggerStore {
    records: Mutex<HashMap<Uuid, TriggerRecord>>,
}

impl InMemoryTriggerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl TriggerStore for InMemoryTriggerStore {
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<TriggerRecord>, StoreError> {
        let records = self.records.lock().await;
        let mut due: Vec<TriggerRecord> = records
            .values()
            .filter(|record| record.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|record| record.next_run_at);
        Ok(due)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TriggerRecord>, StoreError> {
        Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn save(&self, record: &TriggerRecord) -> Result<TriggerRecord, StoreError> {
        let mut records = self.records.lock().await;
        let stored = records
            .get_mut(&record.id)
            .ok_or(StoreError::NotFound(record.id))?;

        if stored.version != record.version {
            return Err(StoreError::Conflict {
                id: record.id,
                version: record.version,
            });
        }

        let mut updated = record.clone();
        updated.version += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn create(&self, record: &TriggerRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::Backend(format!(
                "trigger {} already exists",
                record.id
            )));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid, version: i64) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let stored = records.get(&id).ok_or(StoreError::NotFound(id))?;
        if stored.version != version {
            return Err(StoreError::Conflict { id, version });
        }
        records.remove(&id);
        Ok(())
    }
}
