//! Per-service runtime state and status derivation.
//!
//! One `ServiceState` exists per registered service for the supervisor's
//! whole lifetime; its handle, flags and log are reset and reused across
//! start/stop cycles. Status is always derived from the current fields, with
//! `error_detected` taking precedence over everything else.

use std::fmt;

use serde::Serialize;
use tokio::process::Child;

use crate::output::LogBuffer;

/// The derived lifecycle status of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Stopped,
    Starting,
    Running,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Status::Stopped => "stopped",
            Status::Starting => "starting",
            Status::Running => "running",
            Status::Error => "error",
        };
        f.pad(text)
    }
}

/// Mutable runtime state of a single service.
///
/// Written by action tasks, reader tasks and the monitor; always accessed
/// under the owning cell's state mutex.
#[derive(Debug)]
pub struct ServiceState {
    /// Artifact path used by the *next* start; editable at any time.
    pub artifact: String,
    /// The live child process, if any. At most one per service.
    pub child: Option<Child>,
    pub pid: Option<u32>,
    /// Exit code of the last run, if it produced one.
    pub exit_code: Option<i32>,
    /// True only while an operator stop is in flight; gates crash
    /// classification.
    pub manual_stop: bool,
    /// Sticky until the next start attempt resets it.
    pub error_detected: bool,
    /// Set once the monitor has observed the child alive.
    pub confirmed_running: bool,
    pub log: LogBuffer,
}

impl ServiceState {
    pub fn new(artifact: String, max_log_bytes: usize, trim_chunk_bytes: usize) -> Self {
        Self {
            artifact,
            child: None,
            pid: None,
            exit_code: None,
            manual_stop: false,
            error_detected: false,
            confirmed_running: false,
            log: LogBuffer::new(max_log_bytes, trim_chunk_bytes),
        }
    }

    /// Whether a live handle exists.
    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Derives the status with the fixed precedence: error, running,
    /// starting, stopped.
    pub fn status(&self) -> Status {
        if self.error_detected {
            Status::Error
        } else if self.child.is_some() && self.confirmed_running {
            Status::Running
        } else if self.child.is_some() {
            // Narrow window right after spawn, before the monitor has
            // confirmed the child alive.
            Status::Starting
        } else {
            Status::Stopped
        }
    }
}

/// A point-in-time view of one service, as consumed by presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSnapshot {
    pub id: usize,
    pub name: String,
    pub status: Status,
    pub pid: Option<u32>,
    /// Exit code of the last completed run, if it produced one.
    pub exit_code: Option<i32>,
    pub artifact: String,
}
