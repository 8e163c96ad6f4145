//! Outbox: the pending subset of the replica, read in upload batches

use crate::db::ReplicaStore;
use crate::error::Result;
use crate::models::{EntityType, SyncRecord, TenantId};

/// A pending record paired with the version it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxItem {
    pub record: SyncRecord,
    /// CAS token for the acknowledgment of this upload
    pub observed_version: i64,
}

/// Read-only view over the replica's pending records
#[derive(Clone, Copy)]
pub struct OutboxView<'a> {
    store: &'a dyn ReplicaStore,
}

impl<'a> OutboxView<'a> {
    pub fn new(store: &'a dyn ReplicaStore) -> Self {
        Self { store }
    }

    /// Oldest `max_size` pending records of one type.
    ///
    /// Records past `max_size` stay pending and are picked up by a later batch.
    pub fn pending_batch(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        max_size: usize,
    ) -> Result<Vec<OutboxItem>> {
        if max_size == 0 {
            return Ok(Vec::new());
        }

        let records = self.store.pending_page(tenant_id, entity_type, max_size)?;
        Ok(records
            .into_iter()
            .map(|record| OutboxItem {
                observed_version: record.version(),
                record,
            })
            .collect())
    }

    /// Whether any record of the tenant is waiting for upload
    pub fn has_pending(&self, tenant_id: &TenantId) -> Result<bool> {
        Ok(self
            .store
            .pending_counts(tenant_id)?
            .values()
            .any(|count| *count > 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::{Database, SqliteReplicaStore};
    use crate::models::{EntityPayload, Expense};
    use std::sync::Arc;

    fn expense(description: &str) -> EntityPayload {
        EntityPayload::Expense(Expense {
            description: description.to_string(),
            category: "supplies".to_string(),
            amount_cents: 1_200,
            incurred_at: 1,
            is_deleted: false,
        })
    }

    #[test]
    fn batch_is_oldest_first_and_capped() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = SqliteReplicaStore::new(Database::open_in_memory().unwrap(), clock.clone());
        let tenant = TenantId::new("shop-1").unwrap();

        let first = store.create(&tenant, expense("first")).unwrap();
        clock.advance(10);
        let second = store.create(&tenant, expense("second")).unwrap();
        clock.advance(10);
        store.create(&tenant, expense("third")).unwrap();

        let outbox = OutboxView::new(&store);
        let batch = outbox.pending_batch(&tenant, EntityType::Expense, 2).unwrap();

        let ids: Vec<_> = batch.iter().map(|item| item.record.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert_eq!(batch[0].observed_version, 1);
        assert_eq!(store.list_pending(&tenant, None).unwrap().len(), 3);
    }

    #[test]
    fn empty_outbox_has_nothing_pending() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = SqliteReplicaStore::new(Database::open_in_memory().unwrap(), clock);
        let tenant = TenantId::new("shop-1").unwrap();

        let outbox = OutboxView::new(&store);
        assert!(!outbox.has_pending(&tenant).unwrap());
        assert!(outbox
            .pending_batch(&tenant, EntityType::Sale, 10)
            .unwrap()
            .is_empty());

        store.create(&tenant, expense("ink")).unwrap();
        assert!(outbox.has_pending(&tenant).unwrap());
        assert!(outbox
            .pending_batch(&tenant, EntityType::Expense, 0)
            .unwrap()
            .is_empty());
    }
}
