// Poll-and-claim loop over the trigger store

use crate::clock::Clock;
use crate::errors::StoreError;
use crate::model::TriggerRecord;
use crate::store::TriggerStore;
use crate::telemetry;
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// Polls the store for due triggers and claims them one by one.
///
/// Claiming is a compare-and-swap: losing a claim to a competing instance is
/// routine and skipped silently. Any other store failure aborts the whole
/// cycle with an empty result; the next scheduled poll retries.
pub struct TriggerFetcher {
    name: String,
    store: Arc<dyn TriggerStore>,
    clock: Arc<dyn Clock>,
}

impl TriggerFetcher {
    pub fn new(name: impl Into<String>, store: Arc<dyn TriggerStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            store,
            clock,
        }
    }

    /// Returns the due triggers this instance exclusively won the claim for,
    /// each now `Ready` with an incremented version, in ascending due-time
    /// order.
    #[instrument(skip(self), fields(handler = %self.name))]
    pub async fn poll(&self) -> Vec<TriggerRecord> {
        let now = self.clock.now();

        let due = match self.store.find_due(now).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to query due triggers, aborting poll cycle");
                return Vec::new();
            }
        };
        debug!(count = due.len(), "Found due triggers");

        let mut claimed = Vec::with_capacity(due.len());
        for mut record in due {
            record.claim();
            match self.store.save(&record).await {
                Ok(saved) => claimed.push(saved),
                Err(StoreError::Conflict { .. }) => {
                    telemetry::record_claim_conflict(&self.name);
                    debug!(trigger_id = %record.id, "Trigger claimed by another instance, skipping");
                }
                Err(e) => {
                    error!(
                        trigger_id = %record.id,
                        error = %e,
                        "Failed to mark trigger ready, aborting poll cycle"
                    );
                    return Vec::new();
                }
            }
        }

        claimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::TriggerStatus;
    use crate::store::InMemoryTriggerStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::collections::HashSet;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 1, 12, 0, 0).unwrap()
    }

    fn fetcher(store: Arc<dyn TriggerStore>, at: DateTime<Utc>) -> TriggerFetcher {
        TriggerFetcher::new("report", store, Arc::new(ManualClock::new(at)))
    }

    /// Store wrapper that fails specific save calls, simulating competing
    /// instances or a failing backend.
    struct FlakyStore {
        inner: InMemoryTriggerStore,
        conflict_ids: HashSet<Uuid>,
        fail_saves: bool,
        fail_queries: bool,
    }

    impl FlakyStore {
        fn conflicting_on(ids: HashSet<Uuid>) -> Self {
            Self {
                inner: InMemoryTriggerStore::new(),
                conflict_ids: ids,
                fail_saves: false,
                fail_queries: false,
            }
        }
    }

    #[async_trait]
    impl TriggerStore for FlakyStore {
        async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<TriggerRecord>, StoreError> {
            if self.fail_queries {
                return Err(StoreError::Backend("store unreachable".to_string()));
            }
            self.inner.find_due(now).await
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<TriggerRecord>, StoreError> {
            self.inner.find_by_id(id).await
        }

        async fn save(&self, record: &TriggerRecord) -> Result<TriggerRecord, StoreError> {
            if self.fail_saves {
                return Err(StoreError::Backend("store unreachable".to_string()));
            }
            if self.conflict_ids.contains(&record.id) {
                return Err(StoreError::Conflict {
                    id: record.id,
                    version: record.version,
                });
            }
            self.inner.save(record).await
        }

        async fn create(&self, record: &TriggerRecord) -> Result<(), StoreError> {
            self.inner.create(record).await
        }

        async fn delete(&self, id: Uuid, version: i64) -> Result<(), StoreError> {
            self.inner.delete(id, version).await
        }
    }

    #[tokio::test]
    async fn test_poll_claims_only_eligible_records_in_due_order() {
        let store = Arc::new(InMemoryTriggerStore::new());
        let t = now();

        let second = TriggerRecord::one_shot(Some(t - Duration::seconds(5)), t);
        let first = TriggerRecord::one_shot(Some(t - Duration::minutes(2)), t);
        let not_due = TriggerRecord::one_shot(Some(t + Duration::minutes(2)), t);
        let unscheduled = TriggerRecord::one_shot(None, t);
        let mut inactive = TriggerRecord::one_shot(Some(t - Duration::minutes(1)), t);
        inactive.is_active = false;

        for record in [&second, &first, &not_due, &unscheduled, &inactive] {
            store.create(record).await.unwrap();
        }

        let claimed = fetcher(store.clone(), t).poll().await;

        let ids: Vec<Uuid> = claimed.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
        for record in &claimed {
            assert_eq!(record.status, TriggerStatus::Ready);
            assert_eq!(record.version, 2);
        }

        // Claimed records are no longer eligible on the next cycle.
        assert!(fetcher(store, t).poll().await.is_empty());
    }

    #[tokio::test]
    async fn test_conflicts_skip_only_the_contended_records() {
        let t = now();
        let contended = TriggerRecord::one_shot(Some(t - Duration::seconds(30)), t);
        let free = TriggerRecord::one_shot(Some(t - Duration::seconds(10)), t);

        let store = Arc::new(FlakyStore::conflicting_on(HashSet::from([contended.id])));
        store.create(&contended).await.unwrap();
        store.create(&free).await.unwrap();

        let claimed = fetcher(store, t).poll().await;

        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, free.id);
    }

    #[tokio::test]
    async fn test_query_failure_aborts_cycle_with_empty_result() {
        let t = now();
        let mut store = FlakyStore::conflicting_on(HashSet::new());
        store.fail_queries = true;
        let record = TriggerRecord::one_shot(Some(t - Duration::seconds(10)), t);
        store.inner.create(&record).await.unwrap();

        let claimed = fetcher(Arc::new(store), t).poll().await;
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn test_save_failure_aborts_cycle_with_empty_result() {
        let t = now();
        let mut store = FlakyStore::conflicting_on(HashSet::new());
        store.fail_saves = true;
        let record = TriggerRecord::one_shot(Some(t - Duration::seconds(10)), t);
        store.inner.create(&record).await.unwrap();

        let claimed = fetcher(Arc::new(store), t).poll().await;
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn test_nothing_due_returns_empty() {
        let t = now();
        let store = Arc::new(InMemoryTriggerStore::new());
        let record = TriggerRecord::one_shot(Some(t + Duration::minutes(5)), t);
        store.create(&record).await.unwrap();

        assert!(fetcher(store, t).poll().await.is_empty());
    }
}
