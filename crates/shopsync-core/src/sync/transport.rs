//! Remote transport contract and wire DTOs.
//!
//! All DTOs are camelCase JSON and reject unknown fields so a server that
//! drifts from the contract fails loudly at the boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{EntityId, EntityPayload, EntityType, TenantId};

/// Session-level transport failure. Retried by the scheduler, never inside a
/// session phase.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Sync server unreachable: {0}")]
    Unreachable(String),
    #[error("Sync request timed out")]
    Timeout,
    #[error("Sync server returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Invalid sync response: {0}")]
    InvalidPayload(String),
}

/// Entity value as known by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RemoteRecord {
    pub id: EntityId,
    /// Server modification time (Unix ms)
    pub updated_at: i64,
    #[serde(default)]
    pub remote_ref: Option<String>,
    pub payload: EntityPayload,
}

/// One locally changed record in an upload batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UploadRecord {
    pub id: EntityId,
    pub local_version: i64,
    pub local_updated_at: i64,
    #[serde(default)]
    pub remote_ref: Option<String>,
    pub payload: EntityPayload,
}

/// Upload of one entity type's pending batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UploadRequest {
    pub tenant_id: TenantId,
    #[serde(default)]
    pub last_synced_at: Option<i64>,
    pub entity_type: EntityType,
    pub records: Vec<UploadRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AcceptedRecord {
    pub id: EntityId,
    #[serde(default)]
    pub remote_ref: Option<String>,
}

/// Upload rejected because the server holds a divergent value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RemoteConflict {
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub conflict_type: String,
    pub server_value: RemoteRecord,
}

/// Upload rejected by server-side validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RejectedRecord {
    pub entity_id: EntityId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UploadResponse {
    pub synced_at: i64,
    #[serde(default)]
    pub accepted: Vec<AcceptedRecord>,
    #[serde(default)]
    pub conflicts: Vec<RemoteConflict>,
    #[serde(default)]
    pub rejected: Vec<RejectedRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DownloadResponse {
    /// Server watermark for this download; used as the next checkpoint
    #[serde(default)]
    pub synced_at: Option<i64>,
    #[serde(default)]
    pub changes: Vec<RemoteRecord>,
}

/// Remote source of truth, scoped by tenant
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Send one entity type's pending batch
    async fn upload_changes(&self, request: &UploadRequest)
        -> Result<UploadResponse, TransportError>;

    /// Fetch all tenant records changed after `last_synced_at`
    async fn download_changes(
        &self,
        tenant_id: &TenantId,
        last_synced_at: Option<i64>,
    ) -> Result<DownloadResponse, TransportError>;
}
