//! Error types for PaperScout services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - Machine-readable error codes for client handling
//! - Transient/fatal classification driving retry policy

use crate::models::DiscoverySource;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Input errors (1xxx)
    InvalidInput,
    PaperNotFound,
    TaskNotFound,

    // Billing errors (2xxx)
    InsufficientCredits,

    // Source errors (3xxx)
    SourceRateLimited,
    SourceCircuitOpen,
    SourceTransportError,
    SourceProtocolError,

    // Timeouts (4xxx)
    Timeout,

    // Storage errors (5xxx)
    CacheFault,
    PersistenceFault,

    // Lifecycle (6xxx)
    Cancelled,

    // Internal errors (9xxx)
    ConfigurationError,
    SerializationError,
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Input (1xxx)
            ErrorCode::InvalidInput => 1001,
            ErrorCode::PaperNotFound => 1002,
            ErrorCode::TaskNotFound => 1003,

            // Billing (2xxx)
            ErrorCode::InsufficientCredits => 2001,

            // Sources (3xxx)
            ErrorCode::SourceRateLimited => 3001,
            ErrorCode::SourceCircuitOpen => 3002,
            ErrorCode::SourceTransportError => 3003,
            ErrorCode::SourceProtocolError => 3004,

            // Timeouts (4xxx)
            ErrorCode::Timeout => 4001,

            // Storage (5xxx)
            ErrorCode::CacheFault => 5001,
            ErrorCode::PersistenceFault => 5002,

            // Lifecycle (6xxx)
            ErrorCode::Cancelled => 6001,

            // Internal (9xxx)
            ErrorCode::ConfigurationError => 9001,
            ErrorCode::SerializationError => 9002,
            ErrorCode::InternalError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Input errors
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Paper not found: {id}")]
    PaperNotFound { id: String },

    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    // Billing errors
    #[error("Insufficient credits for operation '{operation}'")]
    InsufficientCredits { operation: String },

    // Source errors
    #[error("Rate limit wait timed out for source {source}")]
    SourceRateLimited { source: DiscoverySource },

    #[error("Circuit breaker open for source {source}")]
    SourceCircuitOpen { source: DiscoverySource },

    #[error("Transport error from source {source}: {message}")]
    SourceTransport {
        source: DiscoverySource,
        message: String,
    },

    #[error("Protocol error from source {source}: {message}")]
    SourceProtocol {
        source: DiscoverySource,
        message: String,
    },

    // Timeouts
    #[error("Timed out: {stage}")]
    Timeout { stage: String },

    // Storage errors
    #[error("Cache fault: {message}")]
    CacheFault { message: String },

    #[error("Persistence fault: {message}")]
    PersistenceFault { message: String },

    // Lifecycle
    #[error("Operation cancelled")]
    Cancelled,

    // Internal errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::InvalidInput { .. } => ErrorCode::InvalidInput,
            AppError::PaperNotFound { .. } => ErrorCode::PaperNotFound,
            AppError::TaskNotFound { .. } => ErrorCode::TaskNotFound,
            AppError::InsufficientCredits { .. } => ErrorCode::InsufficientCredits,
            AppError::SourceRateLimited { .. } => ErrorCode::SourceRateLimited,
            AppError::SourceCircuitOpen { .. } => ErrorCode::SourceCircuitOpen,
            AppError::SourceTransport { .. } => ErrorCode::SourceTransportError,
            AppError::SourceProtocol { .. } => ErrorCode::SourceProtocolError,
            AppError::Timeout { .. } => ErrorCode::Timeout,
            AppError::CacheFault { .. } => ErrorCode::CacheFault,
            AppError::PersistenceFault { .. } => ErrorCode::PersistenceFault,
            AppError::Cancelled => ErrorCode::Cancelled,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Whether this failure is worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::SourceRateLimited { .. }
                | AppError::SourceCircuitOpen { .. }
                | AppError::SourceTransport { .. }
                | AppError::CacheFault { .. }
        )
    }

    /// Whether this failure must terminate immediately without retry
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::InvalidInput { .. }
                | AppError::PaperNotFound { .. }
                | AppError::InsufficientCredits { .. }
        )
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Timeout {
                stage: "http-request".to_string(),
            }
        } else {
            AppError::Internal {
                message: err.to_string(),
            }
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::PersistenceFault {
            message: err.to_string(),
        }
    }
}

/// Compact error summary carried in API responses and task records
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorSummary {
    pub kind: ErrorCode,
    pub message: String,
}

impl ErrorSummary {
    pub fn of(err: &AppError) -> Self {
        Self {
            kind: err.code(),
            message: err.to_string(),
        }
    }
}
