//! Error types for the snoopd daemon
//!
//! Provides a unified error type and the domain-specific kinds it wraps.

use thiserror::Error;

/// Result type alias using [`SnoopdError`]
pub type Result<T> = std::result::Result<T, SnoopdError>;

/// Unified error type for snoopd operations
#[derive(Debug, Error)]
pub enum SnoopdError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(String),

    #[error("certificate issuance error: {0}")]
    CertIssue(String),

    #[error("proxy protocol error: {0}")]
    ProxyProtocol(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("interceptor load error: {0}")]
    InterceptorLoad(String),

    #[error("interceptor runtime error: {0}")]
    InterceptorRuntime(String),

    #[error("control protocol error: {0}")]
    ControlProtocol(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),
}

impl From<serde_json::Error> for SnoopdError {
    fn from(err: serde_json::Error) -> Self {
        SnoopdError::ControlProtocol(err.to_string())
    }
}

/// Distinct fatal-startup exit codes, one per failure kind (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupFailure {
    AlreadyRunning,
    CaUnwritable,
    PortBindFailed,
    StoreUnavailable,
    ConfigInvalid,
}

impl StartupFailure {
    pub fn exit_code(self) -> i32 {
        match self {
            StartupFailure::AlreadyRunning => 10,
            StartupFailure::CaUnwritable => 11,
            StartupFailure::PortBindFailed => 12,
            StartupFailure::StoreUnavailable => 13,
            StartupFailure::ConfigInvalid => 14,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SnoopdError::Store("row not found".to_string());
        assert!(err.to_string().contains("row not found"));
    }

    #[test]
    fn test_startup_failure_exit_codes_are_distinct() {
        let codes = [
            StartupFailure::AlreadyRunning,
            StartupFailure::CaUnwritable,
            StartupFailure::PortBindFailed,
            StartupFailure::StoreUnavailable,
            StartupFailure::ConfigInvalid,
        ]
        .map(StartupFailure::exit_code);
        let mut sorted = codes.to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
    }
}
