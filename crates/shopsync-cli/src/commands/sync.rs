use std::path::Path;

use crate::commands::common::{
    build_engine, format_report_lines, load_settings, open_replica, resolve_tenant,
};
use crate::error::CliError;

pub async fn run_sync(
    tenant: Option<String>,
    as_json: bool,
    db_path: &Path,
    config_path: &Path,
) -> Result<(), CliError> {
    let tenant_id = resolve_tenant(tenant)?;
    let settings = load_settings(config_path)?;
    let replica = open_replica(db_path)?;
    let engine = build_engine(&replica, &settings)?;
    tracing::debug!(db = %db_path.display(), tenant = %tenant_id, "Running one-shot sync");

    let report = engine.run_once(&tenant_id).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Sync completed");
    for line in format_report_lines(&report) {
        println!("  {line}");
    }
    Ok(())
}
