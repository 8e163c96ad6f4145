//! Store and model errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a replica, checkpoint or model operation
#[derive(Error, Debug)]
pub enum Error {
    /// Stored data could not be interpreted, or the connection is unusable
    #[error("Database error: {0}")]
    Database(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record vanished inside a transaction that just wrote it
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Payload (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A local write named a version other than the stored one
    #[error("Version conflict on {record}: expected version {expected}, found {actual}")]
    VersionConflict {
        record: String,
        expected: i64,
        actual: i64,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}
