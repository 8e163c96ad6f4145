//! Database migrations

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|value| value != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);

    Ok(version)
}

/// Migration to version 1: replica records and per-tenant checkpoints
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", [])?;

    let statements = [
        // Schema version tracking
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Replica records: typed payload as JSON plus sync metadata
        "CREATE TABLE IF NOT EXISTS sync_records (
            tenant_id TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            id TEXT NOT NULL,
            payload TEXT NOT NULL,
            local_version INTEGER NOT NULL,
            sync_state TEXT NOT NULL,
            local_updated_at INTEGER NOT NULL,
            remote_updated_at INTEGER,
            remote_ref TEXT,
            sync_error TEXT,
            PRIMARY KEY (tenant_id, entity_type, id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_records_outbox
            ON sync_records(tenant_id, sync_state, entity_type, local_updated_at)",
        // local_version is append-only
        "CREATE TRIGGER IF NOT EXISTS sync_records_version_guard BEFORE UPDATE ON sync_records
         FOR EACH ROW
         WHEN NEW.local_version < OLD.local_version
         BEGIN
             SELECT RAISE(ABORT, 'local_version must not decrease');
         END",
        // High-water mark of observed remote changes
        "CREATE TABLE IF NOT EXISTS sync_checkpoints (
            tenant_id TEXT PRIMARY KEY,
            last_synced_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        // Record migration version
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, []) {
            conn.execute("ROLLBACK", []).ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", []) {
        conn.execute("ROLLBACK", []).ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_migrations() {
        let conn = setup();
        run(&conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = setup();
        run(&conn).unwrap();
        run(&conn).unwrap(); // Should not fail

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_version_guard_rejects_regression() {
        let conn = setup();
        run(&conn).unwrap();

        conn.execute(
            "INSERT INTO sync_records
                (tenant_id, entity_type, id, payload, local_version, sync_state, local_updated_at)
             VALUES ('t', 'product', 'p1', '{}', 3, 'pending', 1)",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "UPDATE sync_records SET local_version = 2 WHERE id = 'p1'",
            [],
        );
        assert!(result.is_err());

        let version: i64 = conn
            .query_row(
                "SELECT local_version FROM sync_records WHERE id = 'p1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, 3);
    }
}
