use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use shopsync_core::clock::{Clock, SystemClock};
use shopsync_core::config::SyncSettings;
use shopsync_core::db::{Database, SqliteCheckpointStore, SqliteReplicaStore};
use shopsync_core::sync::{SessionReport, SyncEngine, SyncStatus};
use shopsync_core::{EntityType, SyncRecord, TenantId};

use crate::error::CliError;

pub const DB_PATH_ENV: &str = "SHOPSYNC_DB_PATH";
pub const CONFIG_PATH_ENV: &str = "SHOPSYNC_CONFIG";
pub const TENANT_ENV: &str = "SHOPSYNC_TENANT";
pub const API_URL_ENV: &str = "SHOPSYNC_API_URL";
pub const AUTH_TOKEN_ENV: &str = "SHOPSYNC_AUTH_TOKEN";

/// Local replica handles opened from one database file
pub struct Replica {
    pub store: Arc<SqliteReplicaStore>,
    pub checkpoints: Arc<SqliteCheckpointStore>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordItem {
    pub id: String,
    pub entity_type: EntityType,
    pub state: String,
    pub local_version: i64,
    pub local_updated_at: i64,
    pub remote_updated_at: Option<i64>,
    pub remote_ref: Option<String>,
    pub sync_error: Option<String>,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os(DB_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shopsync")
        .join("shopsync.db")
}

pub fn resolve_config_path(cli_config: Option<PathBuf>) -> PathBuf {
    cli_config
        .or_else(|| env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shopsync")
        .join("config.json")
}

pub fn resolve_tenant(cli_tenant: Option<String>) -> Result<TenantId, CliError> {
    select_tenant(cli_tenant, env::var(TENANT_ENV).ok())
}

/// Prefer the flag over the environment; blank values count as unset
pub fn select_tenant(
    cli_tenant: Option<String>,
    env_tenant: Option<String>,
) -> Result<TenantId, CliError> {
    let value = [cli_tenant, env_tenant]
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .ok_or(CliError::MissingTenant)?;
    Ok(TenantId::new(value)?)
}

pub fn parse_entity_type(value: &str) -> Result<EntityType, CliError> {
    Ok(EntityType::from_str(value.trim())?)
}

pub fn open_replica(path: &Path) -> Result<Replica, CliError> {
    let db = Database::open(path)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    Ok(Replica {
        store: Arc::new(SqliteReplicaStore::new(db.clone(), Arc::clone(&clock))),
        checkpoints: Arc::new(SqliteCheckpointStore::new(db, Arc::clone(&clock))),
        clock,
    })
}

/// Settings file merged with `SHOPSYNC_API_URL` / `SHOPSYNC_AUTH_TOKEN`
pub fn load_settings(config_path: &Path) -> Result<SyncSettings, CliError> {
    let settings = SyncSettings::load_or_default(config_path)?
        .with_overrides(env::var(API_URL_ENV).ok(), env::var(AUTH_TOKEN_ENV).ok())?;
    Ok(settings)
}

pub fn build_engine(replica: &Replica, settings: &SyncSettings) -> Result<SyncEngine, CliError> {
    let transport = Arc::new(settings.transport()?);
    Ok(SyncEngine::new(
        replica.store.clone(),
        replica.checkpoints.clone(),
        transport,
        Arc::clone(&replica.clock),
    )
    .with_policies(settings.policy_table())
    .with_options(settings.session_options()))
}

pub fn record_to_item(record: &SyncRecord) -> RecordItem {
    RecordItem {
        id: record.id.to_string(),
        entity_type: record.entity_type(),
        state: record.state().to_string(),
        local_version: record.version(),
        local_updated_at: record.meta.local_updated_at,
        remote_updated_at: record.meta.remote_updated_at,
        remote_ref: record.meta.remote_ref.clone(),
        sync_error: record.meta.sync_error.clone(),
    }
}

pub fn format_record_line(record: &SyncRecord, now_ms: i64) -> String {
    let mut line = format!(
        "{}  {:<14}  v{:<3}  {}",
        record.id,
        record.entity_type(),
        record.version(),
        format_relative_time(record.meta.local_updated_at, now_ms)
    );
    if let Some(reason) = &record.meta.sync_error {
        line.push_str("  ");
        line.push_str(reason);
    }
    line
}

pub fn format_checkpoint(checkpoint: Option<i64>, now_ms: i64) -> String {
    checkpoint.map_or_else(
        || "never".to_string(),
        |at| format!("{} ({})", format_sync_timestamp(at), format_relative_time(at, now_ms)),
    )
}

pub fn format_status(status: SyncStatus) -> String {
    match status {
        SyncStatus::Idle => "idle".to_string(),
        SyncStatus::Running { attempt, .. } => format!("running (attempt {attempt})"),
        SyncStatus::Backoff {
            failures,
            next_retry_at: Some(at),
        } => format!(
            "backing off after {failures} failure(s), next retry at {}",
            format_sync_timestamp(at)
        ),
        SyncStatus::Backoff {
            failures,
            next_retry_at: None,
        } => format!("stopped after {failures} failure(s); run `shopsync sync` to retry"),
    }
}

pub fn format_report_lines(report: &SessionReport) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Uploaded {} record(s): {} acknowledged, {} rejected",
            report.uploaded, report.acknowledged, report.rejected
        ),
        format!(
            "Downloaded {} change(s): {} adopted, {} unchanged",
            report.downloaded, report.adopted, report.unchanged
        ),
    ];
    if report.conflicts > 0 {
        lines.push(format!(
            "Resolved {} conflict(s): {} kept local, {} took remote, {} awaiting review",
            report.conflicts, report.kept_local, report.took_remote, report.deferred
        ));
    }
    if report.stale_writes > 0 {
        lines.push(format!(
            "{} record(s) changed during sync and stay pending",
            report.stale_writes
        ));
    }
    if report.outbox_truncated {
        lines.push("More changes are waiting; run sync again".to_string());
    }
    lines.push(format!(
        "Checkpoint: {}",
        report
            .checkpoint
            .map_or_else(|| "never".to_string(), format_sync_timestamp)
    ));
    lines
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}
