//! Cloud provider error types
//!
//! Every provider failure is classified here as either transient or
//! permanent, so the retry controller never repeats a call that cannot
//! succeed.

use std::time::Duration;
use thiserror::Error;

/// Whether a failed provider call may succeed if it is repeated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeouts, rate limiting, 5xx responses, busy resources
    Transient,
    /// Validation failures, missing resources, bad credentials
    Permanent,
}

/// Cloud provider errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CloudError {
    #[error("Rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Provider unavailable (HTTP {status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Resource locked: {0}")]
    Locked(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Resource already exists: {0}")]
    ResourceAlreadyExists(String),

    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl CloudError {
    /// Map an HTTP status code and message to a classified error
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 | 422 => CloudError::InvalidRequest(message),
            401 | 403 => CloudError::AuthenticationFailed(message),
            404 => CloudError::ResourceNotFound(message),
            408 => CloudError::Timeout(message),
            409 => CloudError::ResourceAlreadyExists(message),
            423 => CloudError::Locked(message),
            429 => CloudError::RateLimited {
                message,
                retry_after: None,
            },
            500..=599 => CloudError::Unavailable { status, message },
            _ => CloudError::ApiError { status, message },
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            CloudError::RateLimited { .. }
            | CloudError::Timeout(_)
            | CloudError::Unavailable { .. }
            | CloudError::Connection(_)
            | CloudError::Locked(_) => ErrorClass::Transient,
            CloudError::ApiError { status, .. } if *status >= 500 => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::ResourceNotFound(_))
    }

    /// Minimum wait the provider asked for before the next request
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CloudError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CloudError {
    fn from(err: serde_json::Error) -> Self {
        CloudError::InvalidResponse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(CloudError::from_status(429, "slow down").is_transient());
        assert!(CloudError::from_status(503, "maintenance").is_transient());
        assert!(CloudError::from_status(500, "oops").is_transient());
        assert!(CloudError::from_status(423, "locked").is_transient());
        assert!(CloudError::from_status(408, "timeout").is_transient());

        assert!(!CloudError::from_status(400, "bad").is_transient());
        assert!(!CloudError::from_status(401, "unauthorized").is_transient());
        assert!(!CloudError::from_status(403, "forbidden").is_transient());
        assert!(!CloudError::from_status(422, "invalid").is_transient());
        assert!(!CloudError::from_status(409, "uniqueness_error").is_transient());
    }

    #[test]
    fn test_not_found_is_permanent() {
        let err = CloudError::from_status(404, "server not found");
        assert!(err.is_not_found());
        assert_eq!(err.class(), ErrorClass::Permanent);
    }

    #[test]
    fn test_retry_after() {
        let err = CloudError::RateLimited {
            message: "limit".to_string(),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(CloudError::Timeout("t".to_string()).retry_after(), None);
    }

    #[test]
    fn test_unknown_status_falls_back_to_api_error() {
        let err = CloudError::from_status(418, "teapot");
        assert!(matches!(err, CloudError::ApiError { status: 418, .. }));
        assert!(!err.is_transient());
    }
}
