//! Error types for the credential-injecting gateway

use hyper::StatusCode;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Secret is not a valid header value")]
    InvalidSecret,

    #[error("Upstream connect to {authority} failed: {source}")]
    Connect {
        authority: String,
        source: std::io::Error,
    },

    #[error("Upstream TLS failure: {0}")]
    Tls(String),

    #[error("Upstream protocol error: {0}")]
    Upstream(#[from] hyper::Error),

    #[error("Upstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error("Gateway task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Status returned to the caller when this error ends a request
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Connect { .. } | GatewayError::Tls(_) | GatewayError::Upstream(_) => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::MalformedRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::Connect {
                authority: "a:1".into(),
                source: std::io::ErrorKind::ConnectionRefused.into(),
            }
            .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(GatewayError::Tls("bad cert".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            GatewayError::Timeout(Duration::from_secs(1)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::Task("panicked".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
