use std::path::Path;

use shopsync_core::db::ReplicaStore;
use shopsync_core::SyncState;

use crate::commands::common::{
    format_record_line, open_replica, record_to_item, resolve_tenant, RecordItem,
};
use crate::error::CliError;

pub fn run_issues(tenant: Option<String>, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let tenant_id = resolve_tenant(tenant)?;
    let replica = open_replica(db_path)?;

    let failed = replica.store.list_by_state(&tenant_id, SyncState::Failed)?;
    let conflicts = replica
        .store
        .list_by_state(&tenant_id, SyncState::Conflict)?;

    if as_json {
        let items = failed
            .iter()
            .chain(&conflicts)
            .map(record_to_item)
            .collect::<Vec<RecordItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if failed.is_empty() && conflicts.is_empty() {
        println!("No sync issues.");
        return Ok(());
    }

    let now = replica.clock.now_millis();
    if !failed.is_empty() {
        println!("Rejected by server ({}):", failed.len());
        for record in &failed {
            println!("  {}", format_record_line(record, now));
        }
    }
    if !conflicts.is_empty() {
        println!("Awaiting manual resolution ({}):", conflicts.len());
        for record in &conflicts {
            println!("  {}", format_record_line(record, now));
        }
    }
    Ok(())
}
