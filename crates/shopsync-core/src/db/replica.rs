//! Local replica store
//!
//! Every record carries a `local_version` that acts as a compare-and-swap
//! token. Business writes go through [`ReplicaStore::upsert`], which bumps the
//! version and marks the record `Pending` in the same transaction. Sync writes
//! name the version they observed and become no-ops when a local write has
//! advanced it since, so an acknowledgment for version N never clobbers a
//! concurrent edit at N+1.

use std::collections::BTreeMap;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::Database;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::models::{
    EntityId, EntityPayload, EntityType, RecordKey, SyncMetadata, SyncRecord, SyncState, TenantId,
};

const RECORD_COLUMNS: &str = "tenant_id, entity_type, id, payload, local_version, sync_state, \
     local_updated_at, remote_updated_at, remote_ref, sync_error";

/// A sync-originated write, guarded by the version the session observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaWrite {
    /// Server accepted the uploaded value
    Acknowledge {
        key: RecordKey,
        observed_version: i64,
        remote_ref: Option<String>,
        remote_updated_at: i64,
    },
    /// Server rejected the value on validation; not retried automatically
    Reject {
        key: RecordKey,
        observed_version: i64,
        reason: String,
    },
    /// Conflict left for manual adjudication
    Defer {
        key: RecordKey,
        observed_version: i64,
        reason: String,
    },
    /// Local value won; queue it for re-upload
    KeepLocal {
        key: RecordKey,
        observed_version: i64,
        remote_ref: Option<String>,
    },
    /// Store the server value as `Synced`. `expected_version = None` means the
    /// record must not exist locally yet.
    AdoptRemote {
        key: RecordKey,
        expected_version: Option<i64>,
        payload: EntityPayload,
        remote_updated_at: i64,
        remote_ref: Option<String>,
    },
}

impl ReplicaWrite {
    pub const fn key(&self) -> &RecordKey {
        match self {
            Self::Acknowledge { key, .. }
            | Self::Reject { key, .. }
            | Self::Defer { key, .. }
            | Self::KeepLocal { key, .. }
            | Self::AdoptRemote { key, .. } => key,
        }
    }
}

/// Result of applying a batch of sync writes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Writes whose version guard matched
    pub applied: usize,
    /// Writes skipped because a local edit raced them
    pub stale: Vec<RecordKey>,
}

/// Trait for replica storage operations
pub trait ReplicaStore: Send + Sync {
    /// Apply a local business mutation.
    ///
    /// Increments `local_version` and sets `Pending`. When `expected_version`
    /// is given (0 meaning "must not exist"), the write fails with
    /// [`Error::VersionConflict`] if the stored version differs.
    fn upsert(
        &self,
        tenant_id: &TenantId,
        id: &EntityId,
        payload: EntityPayload,
        expected_version: Option<i64>,
    ) -> Result<SyncRecord>;

    /// Create a new record with a fresh client-generated id
    fn create(&self, tenant_id: &TenantId, payload: EntityPayload) -> Result<SyncRecord> {
        self.upsert(tenant_id, &EntityId::new(), payload, Some(0))
    }

    /// Get a record by key
    fn get(&self, key: &RecordKey) -> Result<Option<SyncRecord>>;

    /// List records of one type, most recently changed first
    fn list(&self, tenant_id: &TenantId, entity_type: EntityType) -> Result<Vec<SyncRecord>>;

    /// List records awaiting upload, oldest change first
    fn list_pending(
        &self,
        tenant_id: &TenantId,
        entity_type: Option<EntityType>,
    ) -> Result<Vec<SyncRecord>>;

    /// First `limit` pending records of one type, oldest change first
    fn pending_page(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        limit: usize,
    ) -> Result<Vec<SyncRecord>>;

    /// List records in a given state (e.g. `Failed` for user remediation)
    fn list_by_state(&self, tenant_id: &TenantId, state: SyncState) -> Result<Vec<SyncRecord>>;

    /// Pending record counts per entity type
    fn pending_counts(&self, tenant_id: &TenantId) -> Result<BTreeMap<EntityType, usize>>;

    /// Change the sync state if `local_version` still equals `observed_version`.
    ///
    /// Returns `false` (and changes nothing) when the record moved on.
    fn mark_state(
        &self,
        key: &RecordKey,
        new_state: SyncState,
        observed_version: i64,
    ) -> Result<bool>;

    /// Mark an uploaded version `Synced` and record the server reference
    fn acknowledge(
        &self,
        key: &RecordKey,
        observed_version: i64,
        remote_ref: Option<String>,
        remote_updated_at: i64,
    ) -> Result<bool> {
        let outcome = self.apply_batch(&[ReplicaWrite::Acknowledge {
            key: key.clone(),
            observed_version,
            remote_ref,
            remote_updated_at,
        }])?;
        Ok(outcome.applied == 1)
    }

    /// Apply sync writes atomically; each write is individually version-guarded
    fn apply_batch(&self, writes: &[ReplicaWrite]) -> Result<BatchOutcome>;
}

/// `SQLite` implementation of `ReplicaStore`
#[derive(Clone)]
pub struct SqliteReplicaStore {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl SqliteReplicaStore {
    /// Create a new store over the given database
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    fn fetch(conn: &Connection, key: &RecordKey) -> Result<Option<SyncRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM sync_records
             WHERE tenant_id = ?1 AND entity_type = ?2 AND id = ?3"
        );
        let raw = conn
            .query_row(
                &sql,
                params![
                    key.tenant_id.as_str(),
                    key.entity_type.as_str(),
                    key.id.as_str()
                ],
                RawRecord::from_row,
            )
            .optional()?;
        raw.map(RawRecord::into_record).transpose()
    }

    fn query_records<P: rusqlite::Params>(
        conn: &Connection,
        sql: &str,
        params: P,
    ) -> Result<Vec<SyncRecord>> {
        let mut stmt = conn.prepare(sql)?;
        let raws = stmt
            .query_map(params, RawRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter().map(RawRecord::into_record).collect()
    }

    /// Apply one guarded write; `false` when the guard did not match
    fn apply_write(conn: &Connection, write: &ReplicaWrite) -> Result<bool> {
        let changed = match write {
            ReplicaWrite::Acknowledge {
                key,
                observed_version,
                remote_ref,
                remote_updated_at,
            } => conn.execute(
                "UPDATE sync_records
                 SET sync_state = 'synced', remote_ref = COALESCE(?5, remote_ref),
                     remote_updated_at = ?6, sync_error = NULL
                 WHERE tenant_id = ?1 AND entity_type = ?2 AND id = ?3 AND local_version = ?4",
                params![
                    key.tenant_id.as_str(),
                    key.entity_type.as_str(),
                    key.id.as_str(),
                    observed_version,
                    remote_ref.as_deref(),
                    remote_updated_at
                ],
            )?,
            ReplicaWrite::Reject {
                key,
                observed_version,
                reason,
            } => Self::set_state_with_reason(
                conn,
                key,
                *observed_version,
                SyncState::Failed,
                reason,
            )?,
            ReplicaWrite::Defer {
                key,
                observed_version,
                reason,
            } => Self::set_state_with_reason(
                conn,
                key,
                *observed_version,
                SyncState::Conflict,
                reason,
            )?,
            ReplicaWrite::KeepLocal {
                key,
                observed_version,
                remote_ref,
            } => conn.execute(
                "UPDATE sync_records
                 SET sync_state = 'pending', remote_ref = COALESCE(?5, remote_ref),
                     sync_error = NULL
                 WHERE tenant_id = ?1 AND entity_type = ?2 AND id = ?3 AND local_version = ?4",
                params![
                    key.tenant_id.as_str(),
                    key.entity_type.as_str(),
                    key.id.as_str(),
                    observed_version,
                    remote_ref.as_deref()
                ],
            )?,
            ReplicaWrite::AdoptRemote {
                key,
                expected_version: None,
                payload,
                remote_updated_at,
                remote_ref,
            } => conn.execute(
                "INSERT INTO sync_records
                    (tenant_id, entity_type, id, payload, local_version, sync_state,
                     local_updated_at, remote_updated_at, remote_ref)
                 VALUES (?1, ?2, ?3, ?4, 1, 'synced', ?5, ?5, ?6)
                 ON CONFLICT(tenant_id, entity_type, id) DO NOTHING",
                params![
                    key.tenant_id.as_str(),
                    key.entity_type.as_str(),
                    key.id.as_str(),
                    serde_json::to_string(payload)?,
                    remote_updated_at,
                    remote_ref.as_deref()
                ],
            )?,
            ReplicaWrite::AdoptRemote {
                key,
                expected_version: Some(expected),
                payload,
                remote_updated_at,
                remote_ref,
            } => conn.execute(
                "UPDATE sync_records
                 SET payload = ?5, local_version = local_version + 1, sync_state = 'synced',
                     local_updated_at = ?6, remote_updated_at = ?6,
                     remote_ref = COALESCE(?7, remote_ref), sync_error = NULL
                 WHERE tenant_id = ?1 AND entity_type = ?2 AND id = ?3 AND local_version = ?4",
                params![
                    key.tenant_id.as_str(),
                    key.entity_type.as_str(),
                    key.id.as_str(),
                    expected,
                    serde_json::to_string(payload)?,
                    remote_updated_at,
                    remote_ref.as_deref()
                ],
            )?,
        };

        Ok(changed > 0)
    }

    fn set_state_with_reason(
        conn: &Connection,
        key: &RecordKey,
        observed_version: i64,
        state: SyncState,
        reason: &str,
    ) -> Result<usize> {
        Ok(conn.execute(
            "UPDATE sync_records SET sync_state = ?5, sync_error = ?6
             WHERE tenant_id = ?1 AND entity_type = ?2 AND id = ?3 AND local_version = ?4",
            params![
                key.tenant_id.as_str(),
                key.entity_type.as_str(),
                key.id.as_str(),
                observed_version,
                state.as_str(),
                reason
            ],
        )?)
    }
}

impl ReplicaStore for SqliteReplicaStore {
    fn upsert(
        &self,
        tenant_id: &TenantId,
        id: &EntityId,
        payload: EntityPayload,
        expected_version: Option<i64>,
    ) -> Result<SyncRecord> {
        let key = RecordKey::new(tenant_id.clone(), payload.entity_type(), *id);
        let payload_json = serde_json::to_string(&payload)?;
        let now = self.clock.now_millis();

        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;

        let current: Option<i64> = tx
            .query_row(
                "SELECT local_version FROM sync_records
                 WHERE tenant_id = ?1 AND entity_type = ?2 AND id = ?3",
                params![
                    key.tenant_id.as_str(),
                    key.entity_type.as_str(),
                    key.id.as_str()
                ],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(expected) = expected_version {
            let actual = current.unwrap_or(0);
            if actual != expected {
                return Err(Error::VersionConflict {
                    record: key.to_string(),
                    expected,
                    actual,
                });
            }
        }

        if current.is_some() {
            tx.execute(
                "UPDATE sync_records
                 SET payload = ?4, local_version = local_version + 1, sync_state = 'pending',
                     local_updated_at = ?5, sync_error = NULL
                 WHERE tenant_id = ?1 AND entity_type = ?2 AND id = ?3",
                params![
                    key.tenant_id.as_str(),
                    key.entity_type.as_str(),
                    key.id.as_str(),
                    payload_json,
                    now
                ],
            )?;
        } else {
            tx.execute(
                "INSERT INTO sync_records
                    (tenant_id, entity_type, id, payload, local_version, sync_state, local_updated_at)
                 VALUES (?1, ?2, ?3, ?4, 1, 'pending', ?5)",
                params![
                    key.tenant_id.as_str(),
                    key.entity_type.as_str(),
                    key.id.as_str(),
                    payload_json,
                    now
                ],
            )?;
        }

        let record = Self::fetch(&tx, &key)?.ok_or_else(|| Error::NotFound(key.to_string()))?;
        tx.commit()?;

        tracing::debug!(
            record = %key,
            version = record.meta.local_version,
            "Queued local write for sync"
        );
        Ok(record)
    }

    fn get(&self, key: &RecordKey) -> Result<Option<SyncRecord>> {
        let conn = self.db.lock()?;
        Self::fetch(&conn, key)
    }

    fn list(&self, tenant_id: &TenantId, entity_type: EntityType) -> Result<Vec<SyncRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM sync_records
             WHERE tenant_id = ?1 AND entity_type = ?2
             ORDER BY local_updated_at DESC, id ASC"
        );
        let conn = self.db.lock()?;
        Self::query_records(
            &conn,
            &sql,
            params![tenant_id.as_str(), entity_type.as_str()],
        )
    }

    fn list_pending(
        &self,
        tenant_id: &TenantId,
        entity_type: Option<EntityType>,
    ) -> Result<Vec<SyncRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM sync_records
             WHERE tenant_id = ?1 AND sync_state = 'pending'
               AND (?2 IS NULL OR entity_type = ?2)
             ORDER BY local_updated_at ASC, id ASC"
        );
        let conn = self.db.lock()?;
        Self::query_records(
            &conn,
            &sql,
            params![tenant_id.as_str(), entity_type.map(EntityType::as_str)],
        )
    }

    fn pending_page(
        &self,
        tenant_id: &TenantId,
        entity_type: EntityType,
        limit: usize,
    ) -> Result<Vec<SyncRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM sync_records
             WHERE tenant_id = ?1 AND sync_state = 'pending' AND entity_type = ?2
             ORDER BY local_updated_at ASC, id ASC
             LIMIT ?3"
        );
        // SQLite treats a negative LIMIT as unbounded
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.db.lock()?;
        Self::query_records(
            &conn,
            &sql,
            params![tenant_id.as_str(), entity_type.as_str(), limit],
        )
    }

    fn list_by_state(&self, tenant_id: &TenantId, state: SyncState) -> Result<Vec<SyncRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM sync_records
             WHERE tenant_id = ?1 AND sync_state = ?2
             ORDER BY entity_type ASC, local_updated_at ASC"
        );
        let conn = self.db.lock()?;
        Self::query_records(&conn, &sql, params![tenant_id.as_str(), state.as_str()])
    }

    fn pending_counts(&self, tenant_id: &TenantId) -> Result<BTreeMap<EntityType, usize>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT entity_type, COUNT(*) FROM sync_records
             WHERE tenant_id = ?1 AND sync_state = 'pending'
             GROUP BY entity_type",
        )?;
        let rows = stmt
            .query_map(params![tenant_id.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(entity_type, count)| Ok((entity_type.parse()?, count)))
            .collect()
    }

    fn mark_state(
        &self,
        key: &RecordKey,
        new_state: SyncState,
        observed_version: i64,
    ) -> Result<bool> {
        let conn = self.db.lock()?;
        let changed = conn.execute(
            "UPDATE sync_records
             SET sync_state = ?4,
                 sync_error = CASE WHEN ?4 IN ('synced', 'pending') THEN NULL ELSE sync_error END
             WHERE tenant_id = ?1 AND entity_type = ?2 AND id = ?3 AND local_version = ?5",
            params![
                key.tenant_id.as_str(),
                key.entity_type.as_str(),
                key.id.as_str(),
                new_state.as_str(),
                observed_version
            ],
        )?;

        if changed == 0 {
            tracing::debug!(
                record = %key,
                observed_version,
                state = %new_state,
                "Skipped state change for stale version"
            );
        }
        Ok(changed > 0)
    }

    fn apply_batch(&self, writes: &[ReplicaWrite]) -> Result<BatchOutcome> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;

        let mut outcome = BatchOutcome::default();
        for write in writes {
            if Self::apply_write(&tx, write)? {
                outcome.applied += 1;
            } else {
                tracing::debug!(record = %write.key(), "Skipped sync write for stale version");
                outcome.stale.push(write.key().clone());
            }
        }

        tx.commit()?;
        Ok(outcome)
    }
}

/// Row as stored, before parsing into typed values
struct RawRecord {
    tenant_id: String,
    entity_type: String,
    id: String,
    payload: String,
    local_version: i64,
    sync_state: String,
    local_updated_at: i64,
    remote_updated_at: Option<i64>,
    remote_ref: Option<String>,
    sync_error: Option<String>,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            tenant_id: row.get(0)?,
            entity_type: row.get(1)?,
            id: row.get(2)?,
            payload: row.get(3)?,
            local_version: row.get(4)?,
            sync_state: row.get(5)?,
            local_updated_at: row.get(6)?,
            remote_updated_at: row.get(7)?,
            remote_ref: row.get(8)?,
            sync_error: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<SyncRecord> {
        let id: EntityId = self
            .id
            .parse()
            .map_err(|e| Error::Database(format!("invalid record id '{}': {e}", self.id)))?;
        let payload: EntityPayload = serde_json::from_str(&self.payload)?;
        let entity_type: EntityType = self.entity_type.parse()?;
        if payload.entity_type() != entity_type {
            return Err(Error::Database(format!(
                "record {id} stored as {entity_type} but holds a {} payload",
                payload.entity_type()
            )));
        }

        Ok(SyncRecord {
            id,
            tenant_id: TenantId::new(self.tenant_id)?,
            payload,
            meta: SyncMetadata {
                local_version: self.local_version,
                sync_state: self.sync_state.parse()?,
                local_updated_at: self.local_updated_at,
                remote_updated_at: self.remote_updated_at,
                remote_ref: self.remote_ref,
                sync_error: self.sync_error,
            },
        })
    }
}
