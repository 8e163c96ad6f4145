//! shopsync-core - Core library for shopsync
//!
//! This crate contains the device-side replica store, the conflict resolver
//! and the sync session/scheduler that reconcile a shop's local data with the
//! remote source of truth.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod sync;

pub use error::{Error, Result};
pub use models::{EntityId, EntityPayload, EntityType, SyncRecord, SyncState, TenantId};
