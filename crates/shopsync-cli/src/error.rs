use std::io;

use shopsync_core::config::ConfigError;
use shopsync_core::sync::{SchedulerError, SessionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] shopsync_core::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Sync failed: {0}")]
    Session(#[from] SessionError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No tenant selected. Pass --tenant or set SHOPSYNC_TENANT.")]
    MissingTenant,
    #[error("Interval must be greater than zero seconds")]
    InvalidInterval,
    #[error("Logging setup failed: {0}")]
    Logging(String),
}
