//! Error types for the engine.
//!
//! Raw scanner failures are classified at the edge (see `scanner`); every
//! variant maps onto a stable [`ErrorCode`] that drives both worker-pool
//! retry decisions and HTTP status mapping.

use std::time::Duration;

use thiserror::Error;

use scanorama_core::ErrorCode;
use scanorama_store::StoreError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("Host unreachable: {0}")]
    HostUnreachable(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Invalid target: {0}")]
    TargetInvalid(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Scanner failed (exit {code}): {stderr}")]
    ScannerFailed { code: i32, stderr: String },

    #[error("Scanner not found at path: {path}")]
    ScannerNotFound { path: String },

    #[error("Failed to parse scanner XML output: {0}")]
    XmlParse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Network too large: /{prefix} is wider than the /{min} ceiling")]
    NetworkTooLarge { prefix: u8, min: u8 },

    #[error("Invalid cron expression {expr:?}: {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("Worker pool queue is full")]
    QueueFull,

    #[error("Worker pool is shut down")]
    Shutdown,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::NetworkUnreachable(_) => ErrorCode::NetworkUnreachable,
            Self::HostUnreachable(_) => ErrorCode::HostUnreachable,
            Self::Permission(_) => ErrorCode::Permission,
            Self::TargetInvalid(_) => ErrorCode::TargetInvalid,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::ScannerFailed { .. } | Self::XmlParse(_) => ErrorCode::DiscoveryFailed,
            Self::ScannerNotFound { .. } => ErrorCode::InvalidConfig,
            Self::InvalidConfig(_) | Self::InvalidCron { .. } => ErrorCode::InvalidConfig,
            Self::NetworkTooLarge { .. } => ErrorCode::NetworkTooLarge,
            Self::QueueFull => ErrorCode::QueueFull,
            Self::Shutdown => ErrorCode::Shutdown,
            Self::Store(e) => e.code(),
            Self::Io(_) => ErrorCode::Internal,
        }
    }

    /// Shorthand used by the retry loops.
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_drives_retry() {
        assert!(EngineError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(EngineError::NetworkUnreachable("10.0.0.0/24".into()).is_retryable());
        assert!(EngineError::ScannerFailed { code: 1, stderr: "boom".into() }.is_retryable());

        assert!(!EngineError::Permission("raw sockets".into()).is_retryable());
        assert!(!EngineError::TargetInvalid("999.1.1.1".into()).is_retryable());
        assert!(!EngineError::Cancelled.is_retryable());
        assert!(!EngineError::NetworkTooLarge { prefix: 8, min: 16 }.is_retryable());
    }
}
