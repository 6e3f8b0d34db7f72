/*!
 * Error Types
 * Centralized error handling with thiserror and serde support
 */

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{Handle, ResCode};

/// Unified tuning error taxonomy.
///
/// Validation variants surface to the client synchronously, pre-enqueue;
/// anything that goes wrong after a request was accepted by the dispatcher
/// collapses to `Internal` (logged, request dropped, daemon continues).
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum TuneError {
    #[error("invalid argument: {0}")]
    ArgInvalid(String),

    #[error("permission denied: {0}")]
    NotPermitted(String),

    #[error("unknown resource: {0:#x}")]
    ResourceUnknown(ResCode),

    #[error("no such handle: {0}")]
    NoSuchHandle(Handle),

    #[error("client rate limited")]
    Throttled,

    #[error("request queue full")]
    Overflow,

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("timed out: {0}")]
    TimedOut(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("I/O failure: {0}")]
    IoFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for TuneError {
    fn from(err: std::io::Error) -> Self {
        TuneError::IoFailed(err.to_string())
    }
}

impl From<String> for TuneError {
    fn from(msg: String) -> Self {
        TuneError::Internal(msg)
    }
}

/// Error code as it travels on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WireCode {
    InvalidArg,
    PermissionDenied,
    ResourceUnknown,
    RateLimited,
    QueueFull,
    Capacity,
    NoSuchHandle,
    InvalidDuration,
    Internal,
}

impl TuneError {
    /// Map the internal taxonomy onto the wire codes. Kinds without a wire
    /// counterpart (timeouts, conflicts, swallowed I/O) report `INTERNAL`.
    pub fn wire_code(&self) -> WireCode {
        match self {
            TuneError::ArgInvalid(_) => WireCode::InvalidArg,
            TuneError::NotPermitted(_) => WireCode::PermissionDenied,
            TuneError::ResourceUnknown(_) => WireCode::ResourceUnknown,
            TuneError::NoSuchHandle(_) => WireCode::NoSuchHandle,
            TuneError::Throttled => WireCode::RateLimited,
            TuneError::Overflow => WireCode::QueueFull,
            TuneError::CapacityExceeded(_) => WireCode::Capacity,
            TuneError::InvalidDuration(_) => WireCode::InvalidDuration,
            TuneError::TimedOut(_)
            | TuneError::Conflict(_)
            | TuneError::IoFailed(_)
            | TuneError::Internal(_) => WireCode::Internal,
        }
    }
}

/// Result type for daemon operations
pub type Result<T> = std::result::Result<T, TuneError>;
