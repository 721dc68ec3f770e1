//! Error types for the portfolio agent

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {

    // =============================
    // Turn Pipeline Errors
    // =============================

    #[error("Model API error: {0}")]
    ApiError(String),

    #[error("Model call timed out after {0} ms")]
    Timeout(u64),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Verification error: {0}")]
    VerificationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Daily budget exceeded: spent {spent:.4} of {cap:.4} USD")]
    BudgetExceeded { spent: f64, cap: f64 },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Wire-level error taxonomy reported to callers
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ApiError,
    TimeoutError,
    ToolError,
    VerificationError,
    ValidationError,
    BudgetExceeded,
    Unknown,
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::ApiError(_) | AgentError::HttpError(_) => ErrorKind::ApiError,
            AgentError::Timeout(_) => ErrorKind::TimeoutError,
            AgentError::ToolError(_) | AgentError::ToolNotFound(_) => ErrorKind::ToolError,
            AgentError::VerificationError(_) => ErrorKind::VerificationError,
            AgentError::ValidationError(_) | AgentError::SerializationError(_) => {
                ErrorKind::ValidationError
            }
            AgentError::BudgetExceeded { .. } => ErrorKind::BudgetExceeded,
            AgentError::StorageError(_) | AgentError::Unknown(_) | AgentError::IoError(_) => {
                ErrorKind::Unknown
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ApiError => "api_error",
            ErrorKind::TimeoutError => "timeout_error",
            ErrorKind::ToolError => "tool_error",
            ErrorKind::VerificationError => "verification_error",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::BudgetExceeded => "budget_exceeded",
            ErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}
