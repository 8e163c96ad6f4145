use std::path::Path;

use shopsync_core::db::ReplicaStore;
use shopsync_core::{EntityType, SyncState};

use crate::commands::common::{
    format_record_line, open_replica, parse_entity_type, record_to_item, resolve_tenant,
    RecordItem,
};
use crate::error::CliError;

pub fn run_pending(
    tenant: Option<String>,
    entity_type: Option<&str>,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let tenant_id = resolve_tenant(tenant)?;
    let filter: Option<EntityType> = entity_type.map(parse_entity_type).transpose()?;
    let replica = open_replica(db_path)?;

    let records: Vec<_> = replica
        .store
        .list_by_state(&tenant_id, SyncState::Pending)?
        .into_iter()
        .filter(|record| filter.is_none_or(|wanted| record.entity_type() == wanted))
        .collect();

    if as_json {
        let items = records.iter().map(record_to_item).collect::<Vec<RecordItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No pending changes.");
        return Ok(());
    }

    let now = replica.clock.now_millis();
    for record in &records {
        println!("{}", format_record_line(record, now));
    }
    Ok(())
}
