//! Error types for Strata operations

use crate::Permission;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Discriminator carried in `Response.error.kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnknownAction,
    PermissionDenied,
    InvalidParameters,
    RateLimited,
    CircuitOpen,
    Overloaded,
    CacheEntryTooLarge,
    ExecutionError,
    TimedOut,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownAction => "unknown_action",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::InvalidParameters => "invalid_parameters",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Overloaded => "overloaded",
            ErrorKind::CacheEntryTooLarge => "cache_entry_too_large",
            ErrorKind::ExecutionError => "execution_error",
            ErrorKind::TimedOut => "timed_out",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// Whether the caller may retry after the hinted delay.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::CircuitOpen | ErrorKind::Overloaded
        )
    }
}

/// Cache engine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache entry too large for key {key}: {size} bytes exceeds tier capacity {capacity}")]
    EntryTooLarge {
        key: String,
        size: usize,
        capacity: usize,
    },

    #[error("Compression failed for key {key}: {reason}")]
    Compression { key: String, reason: String },

    #[error("Preload failed for key {key}: {reason}")]
    PreloadFailed { key: String, reason: String },
}

/// Request dispatch outcomes other than success.
///
/// Every variant maps onto exactly one [`ErrorKind`]. `RateLimited`,
/// `CircuitOpen` and `Overloaded` carry a retry hint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Unknown action: {action}")]
    UnknownAction { action: String },

    #[error("Permission denied for {action}: requires {required:?}, caller has {actual:?}")]
    PermissionDenied {
        action: String,
        required: Permission,
        actual: Permission,
    },

    #[error("Invalid parameters for {action}: {reason}")]
    InvalidParameters { action: String, reason: String },

    #[error("Rate limited caller {caller_id}, retry after {retry_after_ms}ms")]
    RateLimited {
        caller_id: String,
        retry_after_ms: u64,
    },

    #[error("Circuit open for agent {agent_id}, retry after {retry_after_ms}ms")]
    CircuitOpen {
        agent_id: String,
        retry_after_ms: u64,
    },

    #[error("Overloaded: work queue at capacity {queue_capacity}, retry after {retry_after_ms}ms")]
    Overloaded {
        queue_capacity: usize,
        retry_after_ms: u64,
    },

    #[error("Execution of {action} failed: {message}")]
    Execution { action: String, message: String },

    #[error("Execution of {action} timed out after {timeout_ms}ms")]
    TimedOut { action: String, timeout_ms: u64 },

    #[error("Request for {action} was cancelled")]
    Cancelled { action: String },
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::UnknownAction { .. } => ErrorKind::UnknownAction,
            DispatchError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            DispatchError::InvalidParameters { .. } => ErrorKind::InvalidParameters,
            DispatchError::RateLimited { .. } => ErrorKind::RateLimited,
            DispatchError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            DispatchError::Overloaded { .. } => ErrorKind::Overloaded,
            DispatchError::Execution { .. } => ErrorKind::ExecutionError,
            DispatchError::TimedOut { .. } => ErrorKind::TimedOut,
            DispatchError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Retry hint for retryable rejections.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            DispatchError::RateLimited { retry_after_ms, .. }
            | DispatchError::CircuitOpen { retry_after_ms, .. }
            | DispatchError::Overloaded { retry_after_ms, .. } => {
                Some(Duration::from_millis(*retry_after_ms))
            }
            _ => None,
        }
    }

    /// Whether this outcome counts as a downstream failure for the circuit breaker.
    pub fn counts_against_breaker(&self) -> bool {
        matches!(
            self,
            DispatchError::Execution { .. } | DispatchError::TimedOut { .. }
        )
    }
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unexpected field: {field}")]
    UnexpectedField { field: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

impl ConfigError {
    /// Shorthand for the common `InvalidValue` case.
    pub fn invalid(field: &str, value: impl ToString, reason: &str) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Master error type for all Strata errors.
#[derive(Debug, Clone, Error)]
pub enum StrataError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Strata operations.
pub type StrataResult<T> = Result<T, StrataError>;

// =============================================================================
// TESTS
// =============================================================================
