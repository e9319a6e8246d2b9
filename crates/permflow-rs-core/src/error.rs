//! Error types for the coordinator crate.

use permflow_rs_protocol::CycleId;
use thiserror::Error;

/// Errors returned by coordinator construction and cycle requests.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Two declared permissions share a name.
    #[error("duplicate permission: {0}")]
    DuplicatePermission(String),
    /// A declared permission has an empty name.
    #[error("permission names must not be empty")]
    EmptyPermissionName,
    /// Coordinator settings are unusable.
    #[error("invalid coordinator config: {0}")]
    InvalidConfig(String),
    /// A cycle is already running and re-entry is rejected.
    #[error("request cycle already in progress: {0}")]
    CycleInProgress(CycleId),
    /// Cycles run as tokio tasks and need a runtime.
    #[error("no tokio runtime available to run the request cycle")]
    NoRuntime,
}

/// Errors returned while awaiting a cycle's result.
#[derive(Debug, Error)]
pub enum CycleError {
    /// The cycle was aborted before publishing (e.g. replaced by a newer one).
    #[error("request cycle cancelled: {0}")]
    Cancelled(CycleId),
    /// The cycle task failed.
    #[error("request cycle failed: {0}")]
    Failed(String),
}
