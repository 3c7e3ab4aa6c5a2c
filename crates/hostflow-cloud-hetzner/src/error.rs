//! Hetzner Cloud provider error types

use hostflow_cloud::CloudError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HetznerError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid server id: {0}")]
    InvalidServerId(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Action {id} ({command}) failed: {message}")]
    ActionFailed {
        id: u64,
        command: String,
        message: String,
    },

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HetznerError>;

impl From<HetznerError> for CloudError {
    fn from(err: HetznerError) -> Self {
        match err {
            HetznerError::MissingEnvVar(_) | HetznerError::InvalidConfig(_) => {
                CloudError::InvalidConfig(err.to_string())
            }
            HetznerError::InvalidServerId(id) => {
                CloudError::InvalidRequest(format!("invalid server id: {}", id))
            }
            HetznerError::Http(e) => {
                if e.is_timeout() {
                    CloudError::Timeout(e.to_string())
                } else if e.is_decode() {
                    CloudError::InvalidResponse(e.to_string())
                } else {
                    CloudError::Connection(e.to_string())
                }
            }
            HetznerError::Api {
                status,
                code,
                message,
                retry_after,
            } => classify_api_error(status, &code, message, retry_after),
            HetznerError::ActionFailed { .. } => CloudError::InvalidRequest(err.to_string()),
            HetznerError::JsonError(e) => CloudError::InvalidResponse(e.to_string()),
        }
    }
}

/// Classify an error response using its Hetzner error code first and the
/// HTTP status second
fn classify_api_error(
    status: u16,
    code: &str,
    message: String,
    retry_after: Option<Duration>,
) -> CloudError {
    let message = format!("{}: {}", code, message);
    match code {
        "rate_limit_exceeded" => CloudError::RateLimited {
            message,
            retry_after,
        },
        "locked" | "conflict" => CloudError::Locked(message),
        "uniqueness_error" => CloudError::ResourceAlreadyExists(message),
        "not_found" => CloudError::ResourceNotFound(message),
        "unauthorized" | "forbidden" | "token_readonly" => {
            CloudError::AuthenticationFailed(message)
        }
        "invalid_input" | "json_error" | "resource_limit_exceeded" | "resource_unavailable"
        | "placement_error" => CloudError::InvalidRequest(message),
        "server_error" | "unavailable" | "timeout" | "maintenance" => {
            CloudError::Unavailable { status, message }
        }
        _ => match CloudError::from_status(status, message) {
            CloudError::RateLimited { message, .. } => CloudError::RateLimited {
                message,
                retry_after,
            },
            other => other,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, code: &str) -> CloudError {
        HetznerError::Api {
            status,
            code: code.to_string(),
            message: "test".to_string(),
            retry_after: None,
        }
        .into()
    }

    #[test]
    fn test_codes_take_precedence_over_status() {
        // Hetzner reports "conflict" as 409, but it is safe to retry
        assert!(api(409, "conflict").is_transient());
        assert!(!api(409, "uniqueness_error").is_transient());
        assert!(api(423, "locked").is_transient());
        assert!(api(429, "rate_limit_exceeded").is_transient());
        assert!(!api(422, "resource_unavailable").is_transient());
    }

    #[test]
    fn test_unknown_code_uses_status() {
        assert!(api(502, "bad_gateway").is_transient());
        assert!(api(404, "something").is_not_found());
        assert!(!api(400, "something").is_transient());
    }

    #[test]
    fn test_retry_after_survives_conversion() {
        let err: CloudError = HetznerError::Api {
            status: 429,
            code: "rate_limit_exceeded".to_string(),
            message: "slow down".to_string(),
            retry_after: Some(Duration::from_secs(7)),
        }
        .into();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_invalid_server_id_is_permanent() {
        let err: CloudError = HetznerError::InvalidServerId("ext-1".to_string()).into();
        assert!(!err.is_transient());
    }
}
