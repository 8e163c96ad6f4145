//! One reconciliation pass for a tenant.
//!
//! A session runs four phases: upload, download, resolve, checkpoint. The
//! network phases only stage guarded writes in memory; everything is committed
//! in one store transaction after the last network call returns. A transport
//! failure or cancellation therefore leaves every record in its pre-session
//! state and the checkpoint untouched.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::outbox::{OutboxItem, OutboxView};
use super::resolver::{resolve, Conflict, ConflictOrigin, PolicyTable, Resolution};
use super::transport::{RemoteTransport, TransportError, UploadRecord, UploadRequest};
use crate::clock::Clock;
use crate::db::{CheckpointStore, ReplicaStore, ReplicaWrite};
use crate::models::{EntityId, EntityType, RecordKey, SyncRecord, SyncState, TenantId};

/// Session-aborting failure
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Store(#[from] crate::Error),
    #[error("Sync session cancelled")]
    Cancelled,
}

/// Hook for conflicts left to manual adjudication
pub trait ConflictNotifier: Send + Sync {
    fn notify(&self, conflict: &Conflict);
}

/// Notifier that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl ConflictNotifier for LogNotifier {
    fn notify(&self, conflict: &Conflict) {
        warn!(
            record = %conflict.key(),
            local_updated_at = conflict.local_updated_at(),
            remote_updated_at = conflict.remote_updated_at(),
            "Conflict needs manual resolution"
        );
    }
}

/// Notifier forwarding conflicts to a channel consumer
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Conflict>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Conflict>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ConflictNotifier for ChannelNotifier {
    fn notify(&self, conflict: &Conflict) {
        if self.sender.send(conflict.clone()).is_err() {
            debug!(record = %conflict.key(), "Conflict receiver dropped");
        }
    }
}

/// Tunables for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Maximum records per upload request
    pub batch_size: usize,
    /// Subtracted from the session start when the server reports no watermark
    pub checkpoint_skew_ms: i64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            checkpoint_skew_ms: 5_000,
        }
    }
}

/// Counters describing what a session did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub attempt: u32,
    pub started_at: i64,
    pub finished_at: i64,
    pub uploaded: usize,
    pub acknowledged: usize,
    pub rejected: usize,
    pub downloaded: usize,
    pub adopted: usize,
    pub unchanged: usize,
    pub conflicts: usize,
    pub kept_local: usize,
    pub took_remote: usize,
    pub deferred: usize,
    /// Staged writes skipped because a local edit raced them
    pub stale_writes: usize,
    pub checkpoint: Option<i64>,
    pub checkpoint_advanced: bool,
    /// An upload batch was full, records are still pending and this session
    /// drained part of the outbox, so another pass can make progress
    pub outbox_truncated: bool,
}

impl SessionReport {
    /// Verdicts that took a record out of the outbox, net of stale writes
    pub const fn drained(&self) -> usize {
        (self.acknowledged + self.rejected + self.deferred + self.took_remote)
            .saturating_sub(self.stale_writes)
    }
}

/// Dependencies shared by every session of a device
#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<dyn ReplicaStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    transport: Arc<dyn RemoteTransport>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn ConflictNotifier>,
    policies: PolicyTable,
    options: SessionOptions,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("policies", &self.policies)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn ReplicaStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        transport: Arc<dyn RemoteTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            checkpoints,
            transport,
            clock,
            notifier: Arc::new(LogNotifier),
            policies: PolicyTable::default(),
            options: SessionOptions::default(),
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn ConflictNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn with_policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    #[must_use]
    pub const fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &Arc<dyn ReplicaStore> {
        &self.store
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Prepare a session for `tenant_id`, starting now
    pub fn session(&self, tenant_id: TenantId, attempt: u32) -> SyncSession {
        SyncSession {
            engine: self.clone(),
            started_at: self.clock.now_millis(),
            tenant_id,
            attempt,
        }
    }

    /// Run a single session outside of any scheduler
    pub async fn run_once(&self, tenant_id: &TenantId) -> Result<SessionReport, SessionError> {
        self.session(tenant_id.clone(), 1).run().await
    }
}

/// Writes and conflicts accumulated before commit
#[derive(Default)]
struct SessionPlan {
    /// At most one write per record; later phases supersede earlier ones
    writes: BTreeMap<RecordKey, ReplicaWrite>,
    /// Local records as they will look once the upload writes commit
    overlay: HashMap<RecordKey, SyncRecord>,
    conflicts: BTreeMap<RecordKey, Conflict>,
    deferred: Vec<Conflict>,
    report: SessionReport,
}

impl SessionPlan {
    fn stage(&mut self, write: ReplicaWrite) {
        self.writes.insert(write.key().clone(), write);
    }

    fn add_conflict(&mut self, conflict: Conflict) {
        let key = conflict.key();
        match self.conflicts.get(&key) {
            Some(existing) if existing.remote.updated_at > conflict.remote.updated_at => {}
            _ => {
                self.conflicts.insert(key, conflict);
            }
        }
    }
}

/// A single upload/download/resolve pass
pub struct SyncSession {
    engine: SyncEngine,
    tenant_id: TenantId,
    started_at: i64,
    attempt: u32,
}

impl SyncSession {
    pub const fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub const fn started_at(&self) -> i64 {
        self.started_at
    }

    pub async fn run(self) -> Result<SessionReport, SessionError> {
        info!(tenant = %self.tenant_id, attempt = self.attempt, "Sync session started");

        let result = self.run_phases().await;
        match &result {
            Ok(report) => info!(
                tenant = %self.tenant_id,
                acknowledged = report.acknowledged,
                rejected = report.rejected,
                adopted = report.adopted,
                conflicts = report.conflicts,
                checkpoint = ?report.checkpoint,
                "Sync session finished"
            ),
            Err(error) => warn!(
                tenant = %self.tenant_id,
                attempt = self.attempt,
                %error,
                "Sync session aborted"
            ),
        }
        result
    }

    async fn run_phases(&self) -> Result<SessionReport, SessionError> {
        let mut plan = SessionPlan {
            report: SessionReport {
                attempt: self.attempt,
                started_at: self.started_at,
                ..SessionReport::default()
            },
            ..SessionPlan::default()
        };

        let checkpoint = self.engine.checkpoints.load(&self.tenant_id)?;
        self.upload(checkpoint, &mut plan).await?;
        let watermark = self.download(checkpoint, &mut plan).await?;
        self.resolve_conflicts(&mut plan);
        self.commit(plan, watermark)
    }

    async fn upload(
        &self,
        checkpoint: Option<i64>,
        plan: &mut SessionPlan,
    ) -> Result<(), SessionError> {
        let batch_size = self.engine.options.batch_size;

        for entity_type in EntityType::ALL {
            let batch = OutboxView::new(self.engine.store.as_ref()).pending_batch(
                &self.tenant_id,
                entity_type,
                batch_size,
            )?;
            if batch.is_empty() {
                continue;
            }
            if batch.len() >= batch_size {
                plan.report.outbox_truncated = true;
            }

            let request = UploadRequest {
                tenant_id: self.tenant_id.clone(),
                last_synced_at: checkpoint,
                entity_type,
                records: batch.iter().map(upload_record).collect(),
            };
            debug!(
                tenant = %self.tenant_id,
                entity_type = %entity_type,
                count = request.records.len(),
                "Uploading pending batch"
            );

            let response = self.engine.transport.upload_changes(&request).await?;
            plan.report.uploaded += batch.len();

            let mut items: HashMap<EntityId, OutboxItem> = batch
                .into_iter()
                .map(|item| (item.record.id, item))
                .collect();

            for accepted in response.accepted {
                let Some(item) = items.remove(&accepted.id) else {
                    debug!(entity_id = %accepted.id, "Server accepted a record that was not sent");
                    continue;
                };
                let key = item.record.key();
                let mut record = item.record;
                record.meta.sync_state = SyncState::Synced;
                record.meta.remote_updated_at = Some(response.synced_at);
                if accepted.remote_ref.is_some() {
                    record.meta.remote_ref.clone_from(&accepted.remote_ref);
                }

                plan.stage(ReplicaWrite::Acknowledge {
                    key: key.clone(),
                    observed_version: item.observed_version,
                    remote_ref: accepted.remote_ref,
                    remote_updated_at: response.synced_at,
                });
                plan.overlay.insert(key, record);
                plan.report.acknowledged += 1;
            }

            for rejected in response.rejected {
                let Some(item) = items.remove(&rejected.entity_id) else {
                    continue;
                };
                warn!(
                    tenant = %self.tenant_id,
                    entity_type = %entity_type,
                    entity_id = %rejected.entity_id,
                    reason = %rejected.reason,
                    "Server rejected record"
                );
                let key = item.record.key();
                let mut record = item.record;
                record.meta.sync_state = SyncState::Failed;
                record.meta.sync_error = Some(rejected.reason.clone());

                plan.stage(ReplicaWrite::Reject {
                    key: key.clone(),
                    observed_version: item.observed_version,
                    reason: rejected.reason,
                });
                plan.overlay.insert(key, record);
                plan.report.rejected += 1;
            }

            for conflict in response.conflicts {
                let Some(item) = items.remove(&conflict.entity_id) else {
                    continue;
                };
                let server_value = conflict.server_value;
                if server_value.id != item.record.id
                    || server_value.payload.entity_type() != entity_type
                {
                    warn!(
                        entity_id = %conflict.entity_id,
                        "Ignoring conflict whose server value names another record"
                    );
                    continue;
                }
                plan.add_conflict(Conflict {
                    local: item.record,
                    remote: server_value,
                    origin: ConflictOrigin::Upload(conflict.conflict_type),
                });
            }

            if !items.is_empty() {
                debug!(
                    entity_type = %entity_type,
                    count = items.len(),
                    "Records without a server verdict stay pending"
                );
            }
        }

        Ok(())
    }

    async fn download(
        &self,
        checkpoint: Option<i64>,
        plan: &mut SessionPlan,
    ) -> Result<Option<i64>, SessionError> {
        let response = self
            .engine
            .transport
            .download_changes(&self.tenant_id, checkpoint)
            .await?;
        plan.report.downloaded = response.changes.len();
        debug!(
            tenant = %self.tenant_id,
            count = response.changes.len(),
            since = ?checkpoint,
            "Downloaded remote changes"
        );

        for remote in response.changes {
            let key = RecordKey::new(
                self.tenant_id.clone(),
                remote.payload.entity_type(),
                remote.id,
            );
            let local = match plan.overlay.get(&key) {
                Some(record) => Some(record.clone()),
                None => self.engine.store.get(&key)?,
            };

            match local {
                None => {
                    plan.stage(ReplicaWrite::AdoptRemote {
                        key,
                        expected_version: None,
                        payload: remote.payload,
                        remote_updated_at: remote.updated_at,
                        remote_ref: remote.remote_ref,
                    });
                    plan.report.adopted += 1;
                }
                Some(local) if local.state() == SyncState::Synced => {
                    if local
                        .meta
                        .remote_updated_at
                        .is_some_and(|seen| remote.updated_at <= seen)
                    {
                        plan.report.unchanged += 1;
                        continue;
                    }
                    plan.stage(ReplicaWrite::AdoptRemote {
                        key,
                        expected_version: Some(local.version()),
                        payload: remote.payload,
                        remote_updated_at: remote.updated_at,
                        remote_ref: remote.remote_ref,
                    });
                    plan.report.adopted += 1;
                }
                Some(local) => plan.add_conflict(Conflict {
                    local,
                    remote,
                    origin: ConflictOrigin::Download,
                }),
            }
        }

        Ok(response.synced_at)
    }

    fn resolve_conflicts(&self, plan: &mut SessionPlan) {
        let conflicts = std::mem::take(&mut plan.conflicts);
        plan.report.conflicts = conflicts.len();

        for conflict in conflicts.into_values() {
            let policy = self.engine.policies.policy_for(conflict.entity_type());
            let resolution = resolve(&conflict, policy);
            debug!(
                record = %conflict.key(),
                ?policy,
                ?resolution,
                "Resolved conflict"
            );

            match resolution {
                Resolution::KeepLocal => {
                    plan.report.kept_local += 1;
                    // A rejected value stays failed until the user corrects it
                    if conflict.local.state() == SyncState::Failed {
                        continue;
                    }
                }
                Resolution::TakeRemote => plan.report.took_remote += 1,
                Resolution::Deferred => plan.report.deferred += 1,
            }

            plan.stage(resolution.to_write(&conflict));
            if resolution == Resolution::Deferred {
                plan.deferred.push(conflict);
            }
        }
    }

    fn commit(
        &self,
        plan: SessionPlan,
        watermark: Option<i64>,
    ) -> Result<SessionReport, SessionError> {
        let SessionPlan {
            writes,
            deferred,
            mut report,
            ..
        } = plan;

        let writes: Vec<ReplicaWrite> = writes.into_values().collect();
        let outcome = self.engine.store.apply_batch(&writes)?;
        report.stale_writes = outcome.stale.len();
        if report.outbox_truncated {
            report.outbox_truncated = report.drained() > 0
                && OutboxView::new(self.engine.store.as_ref()).has_pending(&self.tenant_id)?;
        }

        let target = watermark.unwrap_or_else(|| {
            self.started_at
                .saturating_sub(self.engine.options.checkpoint_skew_ms)
        });
        report.checkpoint_advanced = self.engine.checkpoints.advance(&self.tenant_id, target)?;
        report.checkpoint = self.engine.checkpoints.load(&self.tenant_id)?;
        if report.checkpoint_advanced {
            info!(tenant = %self.tenant_id, checkpoint = target, "Checkpoint advanced");
        }
        report.finished_at = self.engine.clock.now_millis();

        for conflict in &deferred {
            if !outcome.stale.contains(&conflict.key()) {
                self.engine.notifier.notify(conflict);
            }
        }

        Ok(report)
    }
}

fn upload_record(item: &OutboxItem) -> UploadRecord {
    UploadRecord {
        id: item.record.id,
        local_version: item.observed_version,
        local_updated_at: item.record.meta.local_updated_at,
        remote_ref: item.record.meta.remote_ref.clone(),
        payload: item.record.payload.clone(),
    }
}
