//! Database layer for shopsync

mod checkpoint;
mod connection;
mod migrations;
mod replica;

pub use checkpoint::{CheckpointStore, SqliteCheckpointStore};
pub use connection::Database;
pub use replica::{BatchOutcome, ReplicaStore, ReplicaWrite, SqliteReplicaStore};
