//! Error types for SMS Triage
//!
//! Expected conditions (missing record, malformed text, rejected origin) are
//! reported as outcomes by the engine. The variants here cover the
//! unexpected ones: persistence failures, protocol faults, bad arguments.

use thiserror::Error;

/// Result type alias for SMS Triage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for SMS Triage
#[derive(Debug, Error)]
pub enum Error {
    // ==========================================================================
    // Resource Not Found Errors
    // ==========================================================================
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    // ==========================================================================
    // Validation Errors
    // ==========================================================================
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid priority: {0}. Must be one of LOW, NORMAL, HIGH, URGENT")]
    InvalidPriority(String),

    // ==========================================================================
    // Storage Errors
    // ==========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // ==========================================================================
    // I/O Errors
    // ==========================================================================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ==========================================================================
    // Relay Errors
    // ==========================================================================
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    // ==========================================================================
    // Internal Errors
    // ==========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error type string (for JSON error output and logs)
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::RecordNotFound(_) => "NOT_FOUND",
            Self::InvalidArgument(_) | Self::InvalidPriority(_) => "INVALID_ARGUMENT",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Io(_) => "OS_ERROR",
            Self::Serialization(_) => "TYPE_ERROR",
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::ResourceBusy(_) => "RESOURCE_BUSY",
            Self::Internal(_) => "UNHANDLED_EXCEPTION",
        }
    }

    /// Returns whether the error is recoverable (can be retried)
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            // User-correctable input issues
            Self::RecordNotFound(_)
                | Self::InvalidArgument(_)
                | Self::InvalidPriority(_)
                // Transient / retryable infrastructure
                | Self::Connection(_)
                | Self::Timeout(_)
                | Self::ResourceBusy(_)
        )
    }
}
