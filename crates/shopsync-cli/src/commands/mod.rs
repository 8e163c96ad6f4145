pub mod common;
pub mod config;
pub mod issues;
pub mod pending;
pub mod status;
pub mod sync;
pub mod watch;
