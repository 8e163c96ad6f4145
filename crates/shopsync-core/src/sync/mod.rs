//! Synchronization between the local replica and the remote source of truth

mod connectivity;
mod coordinator;
mod http;
mod outbox;
mod resolver;
mod retry;
mod scheduler;
mod session;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use connectivity::ConnectivityMonitor;
pub use coordinator::SyncCoordinator;
pub use http::HttpTransport;
pub use outbox::{OutboxItem, OutboxView};
pub use resolver::{
    apply_manual_resolution, resolve, Conflict, ConflictOrigin, ConflictPolicy, ManualChoice,
    PolicyTable, Resolution, MANUAL_CONFLICT_REASON,
};
pub use retry::{RetryDecision, RetryPolicy, RetryState};
pub use scheduler::{SchedulerError, SyncScheduler, SyncStatus};
pub use session::{
    ChannelNotifier, ConflictNotifier, LogNotifier, SessionError, SessionOptions, SessionReport,
    SyncEngine, SyncSession,
};
pub use transport::{
    AcceptedRecord, DownloadResponse, RejectedRecord, RemoteConflict, RemoteRecord,
    RemoteTransport, TransportError, UploadRecord, UploadRequest, UploadResponse,
};
