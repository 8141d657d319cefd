use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad failure class of an adapter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterErrorKind {
    Network,
    Auth,
    RateLimited,
    BadRequest,
    Server,
    Parse,
    Cancelled,
}

impl AdapterErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Auth => "auth",
            Self::RateLimited => "rate_limited",
            Self::BadRequest => "bad_request",
            Self::Server => "server",
            Self::Parse => "parse",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AdapterErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error surfaced by a protocol adapter, either returned or carried in a stream event.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind} error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Network, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Parse, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::BadRequest, message)
    }

    pub fn cancelled() -> Self {
        Self::new(AdapterErrorKind::Cancelled, "request cancelled")
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => AdapterErrorKind::Auth,
            429 => AdapterErrorKind::RateLimited,
            408 => AdapterErrorKind::Network,
            400..=499 => AdapterErrorKind::BadRequest,
            _ => AdapterErrorKind::Server,
        };
        let message: String = body.chars().take(500).collect();
        Self {
            kind,
            status: Some(status),
            message: if message.is_empty() {
                format!("HTTP {status}")
            } else {
                message
            },
        }
    }

    /// Stable machine-readable code, e.g. `rate_limited` or `http_503`.
    pub fn code(&self) -> String {
        match (self.kind, self.status) {
            (AdapterErrorKind::Server, Some(status)) => format!("http_{status}"),
            (kind, _) => kind.as_str().to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            AdapterErrorKind::Network | AdapterErrorKind::RateLimited | AdapterErrorKind::Server
        )
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::from_status(status.as_u16(), &e.to_string()),
            None if e.is_decode() => Self::parse(e.to_string()),
            None if e.is_builder() => Self::bad_request(e.to_string()),
            None => Self::network(e.to_string()),
        }
    }
}

impl From<AdapterError> for quill_core::error::QuillError {
    fn from(e: AdapterError) -> Self {
        Self::Provider(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(AdapterError::from_status(401, "").kind, AdapterErrorKind::Auth);
        assert_eq!(AdapterError::from_status(429, "slow down").kind, AdapterErrorKind::RateLimited);
        assert_eq!(AdapterError::from_status(404, "").kind, AdapterErrorKind::BadRequest);
        assert_eq!(AdapterError::from_status(503, "").kind, AdapterErrorKind::Server);
    }

    #[test]
    fn test_codes_and_retryability() {
        let err = AdapterError::from_status(503, "overloaded");
        assert_eq!(err.code(), "http_503");
        assert!(err.is_retryable());

        let err = AdapterError::from_status(400, "bad");
        assert_eq!(err.code(), "bad_request");
        assert!(!err.is_retryable());

        assert_eq!(AdapterError::cancelled().code(), "cancelled");
        assert!(!AdapterError::cancelled().is_retryable());
        assert!(AdapterError::network("reset").is_retryable());
    }

    #[test]
    fn test_display_includes_status() {
        let err = AdapterError::from_status(500, "boom");
        assert_eq!(err.to_string(), "server error (500): boom");
        assert_eq!(AdapterError::parse("bad json").to_string(), "parse error: bad json");
    }
}
