//! Conflict resolution policies

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::transport::RemoteRecord;
use crate::db::{ReplicaStore, ReplicaWrite};
use crate::error::Result;
use crate::models::{EntityType, RecordKey, SyncRecord, SyncState};

/// Reason stored on records left for manual adjudication
pub const MANUAL_CONFLICT_REASON: &str = "manual conflict pending";

/// How a divergence between the local and remote value is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    LocalWins,
    RemoteWins,
    /// Newer modification time wins; ties go to the server
    LastWriteWins,
    Manual,
}

impl ConflictPolicy {
    /// Built-in policy for an entity type.
    ///
    /// Sales and their lines are facts recorded at the till and must survive
    /// any server-side edit. Shop settings are owned by the back office.
    pub const fn default_for(entity_type: EntityType) -> Self {
        match entity_type {
            EntityType::Sale | EntityType::SaleItem | EntityType::SalePayment => Self::LocalWins,
            EntityType::ShopSettings => Self::RemoteWins,
            EntityType::Category
            | EntityType::Product
            | EntityType::Customer
            | EntityType::Expense
            | EntityType::PurchaseOrder => Self::LastWriteWins,
        }
    }
}

/// Policy lookup with per-type overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyTable {
    overrides: BTreeMap<EntityType, ConflictPolicy>,
}

impl PolicyTable {
    pub const fn new(overrides: BTreeMap<EntityType, ConflictPolicy>) -> Self {
        Self { overrides }
    }

    #[must_use]
    pub fn with_override(mut self, entity_type: EntityType, policy: ConflictPolicy) -> Self {
        self.overrides.insert(entity_type, policy);
        self
    }

    pub fn policy_for(&self, entity_type: EntityType) -> ConflictPolicy {
        self.overrides
            .get(&entity_type)
            .copied()
            .unwrap_or_else(|| ConflictPolicy::default_for(entity_type))
    }
}

/// Where a conflict was detected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictOrigin {
    /// Server refused an upload; carries the server's conflict type
    Upload(String),
    /// Downloaded change for a record with unsynced local state
    Download,
}

/// A divergent local and remote value for the same record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Local record as observed by the session
    pub local: SyncRecord,
    pub remote: RemoteRecord,
    pub origin: ConflictOrigin,
}

impl Conflict {
    pub fn key(&self) -> RecordKey {
        self.local.key()
    }

    pub const fn entity_type(&self) -> EntityType {
        self.local.entity_type()
    }

    pub const fn observed_version(&self) -> i64 {
        self.local.meta.local_version
    }

    pub const fn local_updated_at(&self) -> i64 {
        self.local.meta.local_updated_at
    }

    pub const fn remote_updated_at(&self) -> i64 {
        self.remote.updated_at
    }
}

/// Outcome of applying a policy to a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keep the local value and queue it for re-upload
    KeepLocal,
    /// Adopt the server value as synced
    TakeRemote,
    /// Leave the record in `Conflict` for manual adjudication
    Deferred,
}

impl Resolution {
    /// State the record ends up in
    pub const fn target_state(self) -> SyncState {
        match self {
            Self::KeepLocal => SyncState::Pending,
            Self::TakeRemote => SyncState::Synced,
            Self::Deferred => SyncState::Conflict,
        }
    }

    /// Guarded store write carrying out this resolution
    pub fn to_write(self, conflict: &Conflict) -> ReplicaWrite {
        let key = conflict.key();
        let observed_version = conflict.observed_version();
        match self {
            Self::KeepLocal => ReplicaWrite::KeepLocal {
                key,
                observed_version,
                remote_ref: conflict.remote.remote_ref.clone(),
            },
            Self::TakeRemote => ReplicaWrite::AdoptRemote {
                key,
                expected_version: Some(observed_version),
                payload: conflict.remote.payload.clone(),
                remote_updated_at: conflict.remote.updated_at,
                remote_ref: conflict.remote.remote_ref.clone(),
            },
            Self::Deferred => ReplicaWrite::Defer {
                key,
                observed_version,
                reason: MANUAL_CONFLICT_REASON.to_string(),
            },
        }
    }
}

/// Settle a conflict under the given policy
pub const fn resolve(conflict: &Conflict, policy: ConflictPolicy) -> Resolution {
    match policy {
        ConflictPolicy::LocalWins => Resolution::KeepLocal,
        ConflictPolicy::RemoteWins => Resolution::TakeRemote,
        ConflictPolicy::LastWriteWins => {
            if conflict.local_updated_at() > conflict.remote_updated_at() {
                Resolution::KeepLocal
            } else {
                Resolution::TakeRemote
            }
        }
        ConflictPolicy::Manual => Resolution::Deferred,
    }
}

/// Decision made by whoever adjudicates a deferred conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualChoice {
    KeepLocal,
    TakeRemote,
}

/// Apply a manual decision to a record left in `Conflict`.
///
/// Returns `false` when the record was edited after the conflict was raised;
/// the edit already re-queued it and the decision is dropped.
pub fn apply_manual_resolution(
    store: &dyn ReplicaStore,
    conflict: &Conflict,
    choice: ManualChoice,
) -> Result<bool> {
    let resolution = match choice {
        ManualChoice::KeepLocal => Resolution::KeepLocal,
        ManualChoice::TakeRemote => Resolution::TakeRemote,
    };
    let outcome = store.apply_batch(&[resolution.to_write(conflict)])?;
    Ok(outcome.applied == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::{Database, SqliteReplicaStore};
    use crate::models::{
        EntityId, EntityPayload, Product, Sale, SaleStatus, ShopSettings, SyncMetadata, TenantId,
    };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn tenant() -> TenantId {
        TenantId::new("shop-1").unwrap()
    }

    fn product(name: &str) -> EntityPayload {
        EntityPayload::Product(Product {
            name: name.to_string(),
            sku: None,
            category_id: None,
            price_cents: 100,
            cost_cents: 60,
            stock_quantity: 4,
            is_deleted: false,
        })
    }

    fn conflict(payload: EntityPayload, local_at: i64, remote: EntityPayload, remote_at: i64) -> Conflict {
        let id = EntityId::new();
        Conflict {
            local: SyncRecord {
                id,
                tenant_id: tenant(),
                payload,
                meta: SyncMetadata {
                    local_version: 3,
                    sync_state: SyncState::Pending,
                    local_updated_at: local_at,
                    remote_updated_at: None,
                    remote_ref: None,
                    sync_error: None,
                },
            },
            remote: RemoteRecord {
                id,
                updated_at: remote_at,
                remote_ref: Some("srv-9".to_string()),
                payload: remote,
            },
            origin: ConflictOrigin::Download,
        }
    }

    #[test]
    fn default_policies_follow_entity_ownership() {
        let table = PolicyTable::default();
        assert_eq!(table.policy_for(EntityType::Sale), ConflictPolicy::LocalWins);
        assert_eq!(table.policy_for(EntityType::SaleItem), ConflictPolicy::LocalWins);
        assert_eq!(table.policy_for(EntityType::SalePayment), ConflictPolicy::LocalWins);
        assert_eq!(table.policy_for(EntityType::ShopSettings), ConflictPolicy::RemoteWins);
        assert_eq!(table.policy_for(EntityType::Product), ConflictPolicy::LastWriteWins);
        assert_eq!(table.policy_for(EntityType::Expense), ConflictPolicy::LastWriteWins);
    }

    #[test]
    fn overrides_replace_defaults() {
        let table = PolicyTable::default().with_override(EntityType::Product, ConflictPolicy::Manual);
        assert_eq!(table.policy_for(EntityType::Product), ConflictPolicy::Manual);
        assert_eq!(table.policy_for(EntityType::Customer), ConflictPolicy::LastWriteWins);
    }

    #[test]
    fn local_wins_keeps_sale_even_when_remote_is_newer() {
        let sale = |total| {
            EntityPayload::Sale(Sale {
                receipt_number: "R-1".to_string(),
                customer_id: None,
                status: SaleStatus::Completed,
                subtotal_cents: total,
                tax_cents: 0,
                total_cents: total,
                completed_at: 1,
            })
        };
        let conflict = conflict(sale(500), 10, sale(900), 1_000);
        let resolution = resolve(&conflict, ConflictPolicy::default_for(EntityType::Sale));
        assert_eq!(resolution, Resolution::KeepLocal);
        assert_eq!(resolution.target_state(), SyncState::Pending);
    }

    #[test]
    fn last_write_wins_prefers_newer_side() {
        let newer_local = conflict(product("local"), 200, product("remote"), 100);
        assert_eq!(
            resolve(&newer_local, ConflictPolicy::LastWriteWins),
            Resolution::KeepLocal
        );

        let newer_remote = conflict(product("local"), 100, product("remote"), 200);
        assert_eq!(
            resolve(&newer_remote, ConflictPolicy::LastWriteWins),
            Resolution::TakeRemote
        );
    }

    #[test]
    fn last_write_wins_tie_goes_to_remote() {
        let tie = conflict(product("local"), 150, product("remote"), 150);
        let resolution = resolve(&tie, ConflictPolicy::LastWriteWins);
        assert_eq!(resolution, Resolution::TakeRemote);
        assert_eq!(resolution.target_state(), SyncState::Synced);
    }

    #[test]
    fn remote_wins_adopts_server_settings() {
        let local = EntityPayload::ShopSettings(ShopSettings {
            allow_credit_sales: true,
            ..ShopSettings::default()
        });
        let remote = EntityPayload::ShopSettings(ShopSettings::default());
        let conflict = conflict(local, 500, remote.clone(), 100);

        let write = resolve(&conflict, ConflictPolicy::RemoteWins).to_write(&conflict);
        assert_eq!(
            write,
            ReplicaWrite::AdoptRemote {
                key: conflict.key(),
                expected_version: Some(3),
                payload: remote,
                remote_updated_at: 100,
                remote_ref: Some("srv-9".to_string()),
            }
        );
    }

    #[test]
    fn manual_policy_defers_with_reason() {
        let conflict = conflict(product("a"), 1, product("b"), 2);
        let resolution = resolve(&conflict, ConflictPolicy::Manual);
        assert_eq!(resolution.target_state(), SyncState::Conflict);
        assert!(matches!(
            resolution.to_write(&conflict),
            ReplicaWrite::Defer { ref reason, .. } if reason == MANUAL_CONFLICT_REASON
        ));
    }

    #[test]
    fn policy_names_parse_from_config() {
        let policy: ConflictPolicy = serde_json::from_str("\"last_write_wins\"").unwrap();
        assert_eq!(policy, ConflictPolicy::LastWriteWins);
    }

    #[test]
    fn manual_resolution_takes_remote_value() {
        let clock = Arc::new(ManualClock::new(100));
        let store = SqliteReplicaStore::new(Database::open_in_memory().unwrap(), clock);
        let local = store.create(&tenant(), product("mine")).unwrap();
        store
            .apply_batch(&[ReplicaWrite::Defer {
                key: local.key(),
                observed_version: local.version(),
                reason: MANUAL_CONFLICT_REASON.to_string(),
            }])
            .unwrap();

        let conflict = Conflict {
            local: local.clone(),
            remote: RemoteRecord {
                id: local.id,
                updated_at: 300,
                remote_ref: None,
                payload: product("theirs"),
            },
            origin: ConflictOrigin::Upload("version".to_string()),
        };

        assert!(apply_manual_resolution(&store, &conflict, ManualChoice::TakeRemote).unwrap());
        let stored = store.get(&local.key()).unwrap().unwrap();
        assert_eq!(stored.state(), SyncState::Synced);
        assert_eq!(stored.payload, product("theirs"));
        assert_eq!(stored.version(), local.version() + 1);
    }

    #[test]
    fn manual_resolution_dropped_after_local_edit() {
        let clock = Arc::new(ManualClock::new(100));
        let store = SqliteReplicaStore::new(Database::open_in_memory().unwrap(), clock);
        let local = store.create(&tenant(), product("mine")).unwrap();
        let conflict = Conflict {
            local: local.clone(),
            remote: RemoteRecord {
                id: local.id,
                updated_at: 300,
                remote_ref: None,
                payload: product("theirs"),
            },
            origin: ConflictOrigin::Download,
        };
        store
            .upsert(&tenant(), &local.id, product("edited"), Some(local.version()))
            .unwrap();

        assert!(!apply_manual_resolution(&store, &conflict, ManualChoice::TakeRemote).unwrap());
        let stored = store.get(&local.key()).unwrap().unwrap();
        assert_eq!(stored.payload, product("edited"));
        assert_eq!(stored.state(), SyncState::Pending);
    }
}
