//! Tenant-keyed front for per-tenant schedulers

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use super::connectivity::ConnectivityMonitor;
use super::retry::RetryPolicy;
use super::scheduler::{SchedulerError, SyncScheduler, SyncStatus};
use super::session::{SessionReport, SyncEngine};
use crate::models::TenantId;

/// Owns one scheduler per tenant, created on first use.
///
/// Tenants share the engine's stores and transport but never a session.
#[derive(Debug)]
pub struct SyncCoordinator {
    engine: SyncEngine,
    connectivity: ConnectivityMonitor,
    retry_policy: RetryPolicy,
    schedulers: Mutex<HashMap<TenantId, SyncScheduler>>,
}

impl SyncCoordinator {
    pub fn new(
        engine: SyncEngine,
        connectivity: ConnectivityMonitor,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            engine,
            connectivity,
            retry_policy,
            schedulers: Mutex::new(HashMap::new()),
        }
    }

    pub const fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn schedule_periodic(
        &self,
        tenant_id: &TenantId,
        interval: Duration,
    ) -> Result<(), SchedulerError> {
        self.with_scheduler(tenant_id, |scheduler| scheduler.schedule_periodic(interval))
    }

    pub fn trigger_now(&self, tenant_id: &TenantId) -> Result<(), SchedulerError> {
        self.with_scheduler(tenant_id, SyncScheduler::trigger_now)
    }

    /// Cancel the tenant's session; a tenant never scheduled is already idle
    pub fn cancel(&self, tenant_id: &TenantId) -> Result<(), SchedulerError> {
        self.schedulers()
            .get(tenant_id)
            .map_or(Ok(()), SyncScheduler::cancel)
    }

    pub fn status(&self, tenant_id: &TenantId) -> SyncStatus {
        self.schedulers()
            .get(tenant_id)
            .map_or(SyncStatus::Idle, SyncScheduler::status)
    }

    pub fn subscribe(&self, tenant_id: &TenantId) -> watch::Receiver<SyncStatus> {
        self.with_scheduler(tenant_id, SyncScheduler::subscribe)
    }

    pub fn last_report(&self, tenant_id: &TenantId) -> Option<SessionReport> {
        self.schedulers()
            .get(tenant_id)
            .and_then(SyncScheduler::last_report)
    }

    pub fn tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<_> = self.schedulers().keys().cloned().collect();
        tenants.sort();
        tenants
    }

    /// Stop every scheduler, cancelling in-flight sessions
    pub async fn shutdown(&self) {
        let schedulers: Vec<_> = self.schedulers().drain().map(|(_, s)| s).collect();
        for scheduler in schedulers {
            scheduler.shutdown().await;
        }
    }

    fn with_scheduler<T>(&self, tenant_id: &TenantId, f: impl FnOnce(&SyncScheduler) -> T) -> T {
        let mut schedulers = self.schedulers();
        let scheduler = schedulers.entry(tenant_id.clone()).or_insert_with(|| {
            SyncScheduler::spawn(
                self.engine.clone(),
                tenant_id.clone(),
                self.connectivity.subscribe(),
                self.retry_policy,
            )
        });
        f(scheduler)
    }

    fn schedulers(&self) -> MutexGuard<'_, HashMap<TenantId, SyncScheduler>> {
        self.schedulers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
