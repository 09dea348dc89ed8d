//! Error taxonomy shared by every executor and actor.
//!
//! [`ErrorCode`] is the single canonical enum; the SCREAMING_SNAKE wire
//! string is derived from it, never stored alongside it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error codes carried on every non-ok [`StepResult`](crate::core::StepResult).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    #[default]
    None,
    // Validation (1xxx)
    InvalidInput,
    MissingRequiredField,
    InvalidFormat,
    // Execution (2xxx)
    ExecutionFailed,
    ResourceUnavailable,
    PermissionDenied,
    QuotaExceeded,
    // Network (3xxx)
    NetworkError,
    ConnectionTimeout,
    HttpError,
    // System (4xxx)
    InternalError,
    SystemOverload,
    // Cancellation (5xxx)
    CancelledByUser,
    CancelledByTimeout,
}

impl ErrorCode {
    /// Numeric code from the error taxonomy (1xxx validation through
    /// 5xxx cancellation).
    pub fn numeric(self) -> u32 {
        match self {
            ErrorCode::None => 0,
            ErrorCode::InvalidInput => 1001,
            ErrorCode::MissingRequiredField => 1002,
            ErrorCode::InvalidFormat => 1003,
            ErrorCode::ExecutionFailed => 2001,
            ErrorCode::ResourceUnavailable => 2002,
            ErrorCode::PermissionDenied => 2003,
            ErrorCode::QuotaExceeded => 2004,
            ErrorCode::NetworkError => 3001,
            ErrorCode::ConnectionTimeout => 3002,
            ErrorCode::HttpError => 3003,
            ErrorCode::InternalError => 4001,
            ErrorCode::SystemOverload => 4002,
            ErrorCode::CancelledByUser => 5001,
            ErrorCode::CancelledByTimeout => 5002,
        }
    }

    /// Wire representation (`ExecResult.error_code`).
    pub fn as_wire_str(self) -> &'static str {
        match self {
            ErrorCode::None => "NONE",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::MissingRequiredField => "MISSING_REQUIRED_FIELD",
            ErrorCode::InvalidFormat => "INVALID_FORMAT",
            ErrorCode::ExecutionFailed => "EXECUTION_FAILED",
            ErrorCode::ResourceUnavailable => "RESOURCE_UNAVAILABLE",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::ConnectionTimeout => "CONNECTION_TIMEOUT",
            ErrorCode::HttpError => "HTTP_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::SystemOverload => "SYSTEM_OVERLOAD",
            ErrorCode::CancelledByUser => "CANCELLED_BY_USER",
            ErrorCode::CancelledByTimeout => "CANCELLED_BY_TIMEOUT",
        }
    }

    /// All codes that can appear on a non-ok result.
    pub fn all() -> &'static [ErrorCode] {
        &[
            ErrorCode::None,
            ErrorCode::InvalidInput,
            ErrorCode::MissingRequiredField,
            ErrorCode::InvalidFormat,
            ErrorCode::ExecutionFailed,
            ErrorCode::ResourceUnavailable,
            ErrorCode::PermissionDenied,
            ErrorCode::QuotaExceeded,
            ErrorCode::NetworkError,
            ErrorCode::ConnectionTimeout,
            ErrorCode::HttpError,
            ErrorCode::InternalError,
            ErrorCode::SystemOverload,
            ErrorCode::CancelledByUser,
            ErrorCode::CancelledByTimeout,
        ]
    }
}

/// Internal worker errors. These never cross an actor boundary as a failure;
/// the boundary converts them into a valid `StepResult`.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Endpoint bind failed: {0}")]
    Bind(#[from] std::io::Error),
    #[error("Result failed contract validation: {0}")]
    InvalidResult(String),
}
