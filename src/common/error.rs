//! Common Error Types for the Withdrawal Orchestrator
//!
//! Provides the unified error taxonomy shared across all modules.
//! Categories map one-to-one onto API response statuses.

use thiserror::Error;

/// Root error type for the orchestrator
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Malformed input, rejected before any side effect
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown fund, position or withdrawal
    #[error("not found: {0}")]
    NotFound(String),

    /// An in-flight withdrawal already exists, or a duplicate key was hit
    #[error("conflict: {0}")]
    Conflict(String),

    /// Quote / route-build failure from the swap-routing service
    #[error("upstream error: {0}")]
    Upstream(String),

    /// On-chain rejection; carries diagnostic detail from simulation
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Storage errors
    #[error("storage error: {0}")]
    Storage(String),

    /// Internal errors
    #[error("internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create an upstream error
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    /// Create a ledger error
    pub fn ledger(msg: impl Into<String>) -> Self {
        Self::Ledger(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a retryable error
    ///
    /// Ledger errors are deliberately non-retryable: a financial transfer
    /// must not be retried blind without confirming prior non-execution.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Upstream(_)
                | OrchestratorError::Storage(_)
                | OrchestratorError::Io(_)
        )
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            OrchestratorError::Config(_) => "CONFIG_ERROR",
            OrchestratorError::Validation(_) => "VALIDATION_ERROR",
            OrchestratorError::NotFound(_) => "NOT_FOUND",
            OrchestratorError::Conflict(_) => "CONFLICT",
            OrchestratorError::Upstream(_) => "UPSTREAM_ERROR",
            OrchestratorError::Ledger(_) => "LEDGER_ERROR",
            OrchestratorError::Storage(_) => "STORAGE_ERROR",
            OrchestratorError::Internal(_) => "INTERNAL_ERROR",
            OrchestratorError::Io(_) => "IO_ERROR",
        }
    }

    /// HTTP status for API responses
    pub fn http_status(&self) -> u16 {
        match self {
            OrchestratorError::Validation(_) => 400,
            OrchestratorError::NotFound(_) => 404,
            OrchestratorError::Conflict(_) => 409,
            OrchestratorError::Upstream(_) => 502,
            _ => 500,
        }
    }
}

impl From<crate::storage::StorageError> for OrchestratorError {
    fn from(e: crate::storage::StorageError) -> Self {
        match e {
            crate::storage::StorageError::NotFound(m) => OrchestratorError::NotFound(m),
            crate::storage::StorageError::Duplicate(m) => OrchestratorError::Conflict(m),
            other => OrchestratorError::Storage(other.to_string()),
        }
    }
}

impl From<crate::ledger::LedgerError> for OrchestratorError {
    fn from(e: crate::ledger::LedgerError) -> Self {
        match e {
            crate::ledger::LedgerError::AccountNotFound(m) => OrchestratorError::NotFound(m),
            other => OrchestratorError::Ledger(other.to_string()),
        }
    }
}

/// Result type alias using OrchestratorError
pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = OrchestratorError::upstream("quote service unreachable");
        assert!(err.to_string().contains("quote service unreachable"));
        assert_eq!(err.error_code(), "UPSTREAM_ERROR");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(OrchestratorError::upstream("timeout").is_retryable());
        assert!(!OrchestratorError::ledger("custom program error: 0x1").is_retryable());
        assert!(!OrchestratorError::validation("invalid input").is_retryable());
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(OrchestratorError::validation("x").http_status(), 400);
        assert_eq!(OrchestratorError::not_found("x").http_status(), 404);
        assert_eq!(OrchestratorError::conflict("x").http_status(), 409);
        assert_eq!(OrchestratorError::upstream("x").http_status(), 502);
        assert_eq!(OrchestratorError::internal("x").http_status(), 500);
    }
}
