//! Error classification shared across Scanorama components.
//!
//! Every failure that crosses a component boundary carries an [`ErrorCode`].
//! The code is the single source of truth for two decisions made far from
//! where the error originated: whether the worker pool retries the job, and
//! which HTTP status the API returns.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error codes used by retry and HTTP-mapping logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Operation exceeded its deadline.
    Timeout,
    /// No route to the target network.
    NetworkUnreachable,
    /// Target not routable.
    HostUnreachable,
    /// The OS rejected a required capability (e.g. raw sockets).
    Permission,
    /// Malformed address or CIDR.
    TargetInvalid,
    /// Context cancelled before completion.
    Cancelled,
    /// Unclassified external-scanner failure.
    DiscoveryFailed,
    /// Configuration failed validation.
    InvalidConfig,
    /// Enumeration denied by the network-size ceiling.
    NetworkTooLarge,
    /// Missing or invalid API key.
    Unauthorized,
    /// Key recognized but not permitted.
    Forbidden,
    /// Entity missing.
    NotFound,
    /// Per-key quota exceeded.
    RateLimited,
    /// Worker pool queue at capacity.
    QueueFull,
    /// Worker pool is shutting down.
    Shutdown,
    /// Anything else.
    Internal,
}

impl ErrorCode {
    /// Whether the worker pool should retry an operation failing with this code.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::NetworkUnreachable
                | Self::HostUnreachable
                | Self::DiscoveryFailed
        )
    }

    /// The HTTP status the API layer maps this code to.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::TargetInvalid | Self::InvalidConfig | Self::NetworkTooLarge => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::RateLimited => 429,
            Self::Cancelled => 499,
            Self::QueueFull | Self::Shutdown => 503,
            Self::Timeout
            | Self::NetworkUnreachable
            | Self::HostUnreachable
            | Self::Permission
            | Self::DiscoveryFailed
            | Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::NetworkUnreachable => "network_unreachable",
            Self::HostUnreachable => "host_unreachable",
            Self::Permission => "permission",
            Self::TargetInvalid => "target_invalid",
            Self::Cancelled => "cancelled",
            Self::DiscoveryFailed => "discovery_failed",
            Self::InvalidConfig => "invalid_config",
            Self::NetworkTooLarge => "network_too_large",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::QueueFull => "queue_full",
            Self::Shutdown => "shutdown",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by scanorama-core itself (configuration and validation).
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Config(_) | Self::Validation { .. } => ErrorCode::InvalidConfig,
            Self::Serialization(_) => ErrorCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_codes() {
        assert!(ErrorCode::Timeout.is_retryable());
        assert!(ErrorCode::NetworkUnreachable.is_retryable());
        assert!(ErrorCode::HostUnreachable.is_retryable());
        assert!(ErrorCode::DiscoveryFailed.is_retryable());

        assert!(!ErrorCode::Permission.is_retryable());
        assert!(!ErrorCode::TargetInvalid.is_retryable());
        assert!(!ErrorCode::Cancelled.is_retryable());
        assert!(!ErrorCode::InvalidConfig.is_retryable());
    }

    #[test]
    fn http_mapping() {
        assert_eq!(ErrorCode::TargetInvalid.http_status(), 400);
        assert_eq!(ErrorCode::NetworkTooLarge.http_status(), 400);
        assert_eq!(ErrorCode::Unauthorized.http_status(), 401);
        assert_eq!(ErrorCode::Forbidden.http_status(), 403);
        assert_eq!(ErrorCode::NotFound.http_status(), 404);
        assert_eq!(ErrorCode::RateLimited.http_status(), 429);
        assert_eq!(ErrorCode::Cancelled.http_status(), 499);
        assert_eq!(ErrorCode::QueueFull.http_status(), 503);
        assert_eq!(ErrorCode::Timeout.http_status(), 500);
    }
}
