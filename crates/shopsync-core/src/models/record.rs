//! Syncable record: business payload plus sync metadata

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{EntityId, EntityPayload, EntityType, TenantId};
use crate::error::Error;

/// Reconciliation state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Matches the last value acknowledged by or accepted from the server
    Synced,
    /// Locally mutated, waiting for upload
    Pending,
    /// Divergent edit awaiting manual adjudication
    Conflict,
    /// Rejected by server-side validation; needs a user correction
    Failed,
}

impl SyncState {
    /// Stable storage name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Conflict => "conflict",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(Self::Synced),
            "pending" => Ok(Self::Pending),
            "conflict" => Ok(Self::Conflict),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!("unknown sync state: {other}"))),
        }
    }
}

/// Sync bookkeeping attached to every record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Incremented on every mutation of the stored value
    pub local_version: i64,
    pub sync_state: SyncState,
    /// Last local modification (Unix ms)
    pub local_updated_at: i64,
    /// Server timestamp of the last value adopted or acknowledged (Unix ms)
    pub remote_updated_at: Option<i64>,
    /// Server-assigned identifier/etag, set once acknowledged
    pub remote_ref: Option<String>,
    /// Reason for `Failed` / `Conflict`, shown to the user
    pub sync_error: Option<String>,
}

/// Identifies one record within a tenant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub tenant_id: TenantId,
    pub entity_type: EntityType,
    pub id: EntityId,
}

impl RecordKey {
    pub const fn new(tenant_id: TenantId, entity_type: EntityType, id: EntityId) -> Self {
        Self {
            tenant_id,
            entity_type,
            id,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tenant_id, self.entity_type, self.id)
    }
}

/// A record stored in the local replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub id: EntityId,
    pub tenant_id: TenantId,
    pub payload: EntityPayload,
    pub meta: SyncMetadata,
}

impl SyncRecord {
    pub const fn entity_type(&self) -> EntityType {
        self.payload.entity_type()
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.tenant_id.clone(), self.entity_type(), self.id)
    }

    pub const fn state(&self) -> SyncState {
        self.meta.sync_state
    }

    pub const fn version(&self) -> i64 {
        self.meta.local_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_state_round_trips_storage_names() {
        for state in [
            SyncState::Synced,
            SyncState::Pending,
            SyncState::Conflict,
            SyncState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<SyncState>().unwrap(), state);
        }
        assert!("done".parse::<SyncState>().is_err());
    }

    #[test]
    fn record_key_display_includes_scope() {
        let id = EntityId::new();
        let key = RecordKey::new(TenantId::new("shop").unwrap(), EntityType::Sale, id);
        assert_eq!(key.to_string(), format!("shop/sale/{id}"));
    }
}
