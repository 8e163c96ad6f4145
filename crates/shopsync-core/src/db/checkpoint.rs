//! Per-tenant sync checkpoint persistence

use std::sync::Arc;

use rusqlite::{params, OptionalExtension};

use super::Database;
use crate::clock::Clock;
use crate::error::Result;
use crate::models::TenantId;

/// Trait for checkpoint storage operations
pub trait CheckpointStore: Send + Sync {
    /// Load the tenant's `last_synced_at` watermark (Unix ms)
    fn load(&self, tenant_id: &TenantId) -> Result<Option<i64>>;

    /// Move the watermark forward to `last_synced_at`.
    ///
    /// Returns `false` without writing when that would not advance it.
    fn advance(&self, tenant_id: &TenantId, last_synced_at: i64) -> Result<bool>;
}

/// `SQLite` implementation of `CheckpointStore`
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl SqliteCheckpointStore {
    /// Create a new checkpoint store over the given database
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn load(&self, tenant_id: &TenantId) -> Result<Option<i64>> {
        let conn = self.db.lock()?;
        let value = conn
            .query_row(
                "SELECT last_synced_at FROM sync_checkpoints WHERE tenant_id = ?1",
                params![tenant_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn advance(&self, tenant_id: &TenantId, last_synced_at: i64) -> Result<bool> {
        let conn = self.db.lock()?;
        let changed = conn.execute(
            "INSERT INTO sync_checkpoints (tenant_id, last_synced_at, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(tenant_id) DO UPDATE
             SET last_synced_at = excluded.last_synced_at, updated_at = excluded.updated_at
             WHERE excluded.last_synced_at > sync_checkpoints.last_synced_at",
            params![tenant_id.as_str(), last_synced_at, self.clock.now_millis()],
        )?;
        Ok(changed > 0)
    }
}
