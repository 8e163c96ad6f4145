use std::path::Path;
use std::time::Duration;

use shopsync_core::sync::{ConnectivityMonitor, SyncScheduler, SyncStatus};

use crate::commands::common::{
    build_engine, format_report_lines, format_status, load_settings, open_replica,
    resolve_tenant,
};
use crate::error::CliError;

pub async fn run_watch(
    tenant: Option<String>,
    interval_secs: Option<u64>,
    db_path: &Path,
    config_path: &Path,
) -> Result<(), CliError> {
    let tenant_id = resolve_tenant(tenant)?;
    let settings = load_settings(config_path)?;
    let interval = watch_interval(interval_secs, settings.periodic_interval())?;
    let replica = open_replica(db_path)?;
    let engine = build_engine(&replica, &settings)?;

    let connectivity = ConnectivityMonitor::default();
    let scheduler = SyncScheduler::spawn(
        engine,
        tenant_id.clone(),
        connectivity.subscribe(),
        settings.retry_policy(),
    );
    scheduler.schedule_periodic(interval)?;
    scheduler.trigger_now()?;
    tracing::info!(tenant = %tenant_id, interval_secs = interval.as_secs(), "Watching for changes");

    println!(
        "Watching {tenant_id} every {}s (Ctrl-C to stop)",
        interval.as_secs()
    );

    let mut status = scheduler.subscribe();
    let outcome = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => break signal.map_err(CliError::from),
            changed = status.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = *status.borrow_and_update();
                println!("{}", format_status(current));
                if current == SyncStatus::Idle {
                    if let Some(report) = scheduler.last_report() {
                        for line in format_report_lines(&report) {
                            println!("  {line}");
                        }
                    }
                }
            }
        }
    };

    scheduler.shutdown().await;
    tracing::info!(tenant = %tenant_id, "Watch stopped");
    println!("Stopped");
    outcome
}

pub fn watch_interval(
    interval_secs: Option<u64>,
    configured: Duration,
) -> Result<Duration, CliError> {
    match interval_secs {
        Some(0) => Err(CliError::InvalidInterval),
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Ok(configured),
    }
}
