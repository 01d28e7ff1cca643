//! Error taxonomy for supervisor operations.
//!
//! Every variant here is non-fatal to the supervisor itself: errors are
//! isolated to the service they concern and surface as an `Error` status plus
//! a log line. Nothing is retried automatically; re-issuing `start` clears
//! the error state.

use std::path::PathBuf;

use thiserror::Error;

/// Failure modes of a single start request.
#[derive(Debug, Error)]
pub enum StartError {
    /// The service already has a live process; no second spawn happens.
    #[error("service is already running")]
    AlreadyRunning,
    /// The resolved artifact path does not exist; no process was created.
    #[error("artifact not found: {0}")]
    ArtifactNotFound(PathBuf),
    /// The OS rejected process creation.
    #[error("failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("unknown service id {0}")]
    UnknownService(usize),
}

/// Failure modes of a single stop request.
#[derive(Debug, Error)]
pub enum StopError {
    #[error("service is not running")]
    NotRunning,
    #[error("unknown service id {0}")]
    UnknownService(usize),
}

/// Failure modes of a start-all sequence run.
#[derive(Debug, Error)]
pub enum SequenceError {
    /// Only one sequence may be in flight at a time.
    #[error("a start-all sequence is already in flight")]
    Busy,
}
