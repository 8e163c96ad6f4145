//! In-process sync server for session and scheduler tests

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;

use super::transport::{
    AcceptedRecord, DownloadResponse, RejectedRecord, RemoteConflict, RemoteRecord,
    RemoteTransport, TransportError, UploadRequest, UploadResponse,
};
use super::SyncEngine;
use crate::clock::ManualClock;
use crate::db::{Database, SqliteCheckpointStore, SqliteReplicaStore};
use crate::models::{EntityId, EntityPayload, EntityType, TenantId};

type ServerKey = (String, EntityType, EntityId);

#[derive(Default)]
struct ServerState {
    now: i64,
    records: BTreeMap<ServerKey, RemoteRecord>,
    rejections: HashMap<EntityId, String>,
    /// Keyed by 1-based upload call number
    upload_failures: BTreeMap<usize, TransportError>,
    download_failures: VecDeque<TransportError>,
    unreachable: bool,
    replay_all: bool,
    silent: bool,
}

impl ServerState {
    fn tick(&mut self) -> i64 {
        self.now += 1;
        self.now
    }
}

/// Server with optimistic concurrency on `remoteRef`.
///
/// An upload conflicts when the server holds a different value than the one
/// the client last saw; identical re-uploads are accepted.
pub struct FakeTransport {
    state: Mutex<ServerState>,
    hold: watch::Sender<bool>,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
}

impl FakeTransport {
    pub fn new(server_now: i64) -> Arc<Self> {
        let (hold, _) = watch::channel(false);
        Arc::new(Self {
            state: Mutex::new(ServerState {
                now: server_now,
                ..ServerState::default()
            }),
            hold,
            uploads: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
        })
    }

    /// Write a value on the server side, as another device or the back office would
    pub fn put(&self, tenant: &TenantId, id: EntityId, payload: EntityPayload) -> RemoteRecord {
        let mut state = self.state.lock().unwrap();
        let updated_at = state.tick();
        let record = RemoteRecord {
            id,
            updated_at,
            remote_ref: Some(format!("srv-{updated_at}")),
            payload,
        };
        state.records.insert(
            (tenant.to_string(), record.payload.entity_type(), id),
            record.clone(),
        );
        record
    }

    pub fn get(&self, tenant: &TenantId, entity_type: EntityType, id: EntityId) -> Option<RemoteRecord> {
        let state = self.state.lock().unwrap();
        state
            .records
            .get(&(tenant.to_string(), entity_type, id))
            .cloned()
    }

    pub fn reject(&self, id: EntityId, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .rejections
            .insert(id, reason.to_string());
    }

    /// Fail the `call`-th upload request made to this server (1-based)
    pub fn fail_upload_call(&self, call: usize, error: TransportError) {
        self.state.lock().unwrap().upload_failures.insert(call, error);
    }

    pub fn fail_next_download(&self, error: TransportError) {
        self.state.lock().unwrap().download_failures.push_back(error);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    /// Answer uploads without accepting, rejecting or conflicting anything
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().unwrap().silent = silent;
    }

    /// Return every record on download regardless of the checkpoint
    pub fn set_replay_all(&self, replay_all: bool) {
        self.state.lock().unwrap().replay_all = replay_all;
    }

    /// Block network calls until released
    pub fn hold(&self, held: bool) {
        self.hold.send_replace(held);
    }

    pub fn upload_calls(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.upload_calls() + self.download_calls()
    }

    async fn wait_released(&self) {
        let mut rx = self.hold.subscribe();
        let _ = rx.wait_for(|held| !*held).await;
    }
}

#[async_trait]
impl RemoteTransport for FakeTransport {
    async fn upload_changes(
        &self,
        request: &UploadRequest,
    ) -> Result<UploadResponse, TransportError> {
        let call = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        self.wait_released().await;

        let mut state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(TransportError::Unreachable("connection refused".to_string()));
        }
        if let Some(error) = state.upload_failures.remove(&call) {
            return Err(error);
        }

        let synced_at = state.tick();
        let mut response = UploadResponse {
            synced_at,
            accepted: Vec::new(),
            conflicts: Vec::new(),
            rejected: Vec::new(),
        };
        if state.silent {
            return Ok(response);
        }

        for record in &request.records {
            if let Some(reason) = state.rejections.get(&record.id) {
                response.rejected.push(RejectedRecord {
                    entity_id: record.id,
                    reason: reason.clone(),
                });
                continue;
            }

            let key = (request.tenant_id.to_string(), request.entity_type, record.id);
            if let Some(server) = state.records.get(&key) {
                if server.remote_ref != record.remote_ref && server.payload != record.payload {
                    response.conflicts.push(RemoteConflict {
                        entity_type: request.entity_type,
                        entity_id: record.id,
                        conflict_type: "version".to_string(),
                        server_value: server.clone(),
                    });
                    continue;
                }
            }

            let remote_ref = format!("srv-{}-{synced_at}", record.id);
            state.records.insert(
                key,
                RemoteRecord {
                    id: record.id,
                    updated_at: synced_at,
                    remote_ref: Some(remote_ref.clone()),
                    payload: record.payload.clone(),
                },
            );
            response.accepted.push(AcceptedRecord {
                id: record.id,
                remote_ref: Some(remote_ref),
            });
        }

        Ok(response)
    }

    async fn download_changes(
        &self,
        tenant_id: &TenantId,
        last_synced_at: Option<i64>,
    ) -> Result<DownloadResponse, TransportError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.wait_released().await;

        let mut state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(TransportError::Unreachable("connection refused".to_string()));
        }
        if let Some(error) = state.download_failures.pop_front() {
            return Err(error);
        }

        let since = if state.replay_all {
            i64::MIN
        } else {
            last_synced_at.unwrap_or(i64::MIN)
        };
        let changes = state
            .records
            .iter()
            .filter(|((tenant, _, _), record)| {
                tenant == tenant_id.as_str() && record.updated_at > since
            })
            .map(|(_, record)| record.clone())
            .collect();

        Ok(DownloadResponse {
            synced_at: Some(state.now),
            changes,
        })
    }
}

/// Engine over an in-memory replica and the fake server
pub struct Harness {
    pub engine: SyncEngine,
    pub store: Arc<SqliteReplicaStore>,
    pub checkpoints: Arc<SqliteCheckpointStore>,
    pub transport: Arc<FakeTransport>,
    pub clock: Arc<ManualClock>,
    pub tenant: TenantId,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(1_000));
        let db = Database::open_in_memory().unwrap();
        let store = Arc::new(SqliteReplicaStore::new(db.clone(), clock.clone()));
        let checkpoints = Arc::new(SqliteCheckpointStore::new(db, clock.clone()));
        let transport = FakeTransport::new(10_000);
        let engine = SyncEngine::new(
            store.clone(),
            checkpoints.clone(),
            transport.clone(),
            clock.clone(),
        );

        Self {
            engine,
            store,
            checkpoints,
            transport,
            clock,
            tenant: TenantId::new("shop-1").unwrap(),
        }
    }
}
