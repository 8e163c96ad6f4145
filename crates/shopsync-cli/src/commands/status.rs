use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use shopsync_core::db::{CheckpointStore, ReplicaStore};
use shopsync_core::SyncState;

use crate::commands::common::{format_checkpoint, open_replica, resolve_tenant};
use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusItem {
    tenant_id: String,
    last_synced_at: Option<i64>,
    pending: BTreeMap<&'static str, usize>,
    failed: usize,
    conflicts: usize,
}

pub fn run_status(tenant: Option<String>, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let tenant_id = resolve_tenant(tenant)?;
    let replica = open_replica(db_path)?;

    let item = StatusItem {
        tenant_id: tenant_id.to_string(),
        last_synced_at: replica.checkpoints.load(&tenant_id)?,
        pending: replica
            .store
            .pending_counts(&tenant_id)?
            .into_iter()
            .map(|(entity_type, count)| (entity_type.as_str(), count))
            .collect(),
        failed: replica
            .store
            .list_by_state(&tenant_id, SyncState::Failed)?
            .len(),
        conflicts: replica
            .store
            .list_by_state(&tenant_id, SyncState::Conflict)?
            .len(),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&item)?);
        return Ok(());
    }

    let now = replica.clock.now_millis();
    println!("Tenant:      {}", item.tenant_id);
    println!("Last synced: {}", format_checkpoint(item.last_synced_at, now));
    if item.pending.is_empty() {
        println!("Pending:     nothing to upload");
    } else {
        println!("Pending:");
        for (entity_type, count) in &item.pending {
            println!("  {entity_type:<16} {count}");
        }
    }
    if item.failed > 0 || item.conflicts > 0 {
        println!(
            "Issues:      {} failed, {} in conflict (see `shopsync issues`)",
            item.failed, item.conflicts
        );
    }
    Ok(())
}
