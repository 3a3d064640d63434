//! Typed error hierarchy for btn-core
//!
//! Every error carries enough context to decide whether the operation can
//! be retried. None of these errors is fatal to the host process: callers
//! log them and carry on with the last known good state.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the BTN client core
#[derive(Debug, Error)]
pub enum BtnError {
    /// Transport-level errors (connection, timeout, DNS, TLS)
    #[error("BTN request failed: {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
        retryable: bool,
    },

    /// Cache file errors
    #[error("Rule cache error at {path:?}: {message}")]
    Storage {
        kind: StorageErrorKind,
        path: PathBuf,
        message: String,
    },

    /// BTN protocol errors (unexpected status, malformed documents)
    #[error("Unexpected BTN response: {message}")]
    Protocol {
        kind: ProtocolErrorKind,
        message: String,
    },

    /// Invalid configuration or input
    #[error("Invalid input for '{field}': {message}")]
    InvalidInput {
        field: &'static str,
        message: String,
    },

    /// A downloader driver failed
    #[error("Downloader '{name}' failed: {message}")]
    Downloader { name: String, message: String },

    /// The manager is shutting down
    #[error("BTN client is shutting down")]
    Shutdown,

    /// Internal error (bug)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// What went wrong talking to the BTN server
///
/// Timeouts, refused/reset connections and unreachable hosts are retried
/// by [`RetryPolicy`](crate::http::RetryPolicy); the rest fail fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    DnsResolution,
    ConnectionRefused,
    ConnectionReset,
    Timeout,
    Tls,
    Unreachable,
    TooManyRedirects,
    Other,
}

/// Rule cache I/O failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    NotFound,
    PermissionDenied,
    Io,
}

/// Why a BTN response or request body was unusable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// Invalid URL
    InvalidUrl,
    /// Server answered with an unexpected status
    UnexpectedStatus(u16),
    /// Response body could not be decoded
    InvalidResponse,
    /// Request body could not be encoded
    Encoding,
}

impl BtnError {
    /// Whether a retry might succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Network error; retryability follows from `kind`
    pub fn network(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(
            kind,
            NetworkErrorKind::Timeout
                | NetworkErrorKind::ConnectionRefused
                | NetworkErrorKind::ConnectionReset
                | NetworkErrorKind::Unreachable
        );
        Self::Network {
            kind,
            message: message.into(),
            retryable,
        }
    }

    pub fn storage(
        kind: StorageErrorKind,
        path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self::Storage {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn protocol(kind: ProtocolErrorKind, message: impl Into<String>) -> Self {
        Self::Protocol {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            message: message.into(),
        }
    }

    /// A downloader driver call failed
    pub fn downloader(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Downloader {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for BTN operations
pub type Result<T> = std::result::Result<T, BtnError>;

impl From<std::io::Error> for BtnError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let kind = match err.kind() {
            ErrorKind::NotFound => StorageErrorKind::NotFound,
            ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
            _ => StorageErrorKind::Io,
        };
        Self::Storage {
            kind,
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for BtnError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() || err.is_body() {
            return Self::protocol(ProtocolErrorKind::InvalidResponse, err.to_string());
        }
        if err.is_builder() {
            return Self::protocol(ProtocolErrorKind::InvalidUrl, err.to_string());
        }

        let kind = if err.is_timeout() {
            NetworkErrorKind::Timeout
        } else if err.is_connect() {
            NetworkErrorKind::ConnectionRefused
        } else if err.is_redirect() {
            NetworkErrorKind::TooManyRedirects
        } else if err.is_request() {
            NetworkErrorKind::ConnectionReset
        } else {
            NetworkErrorKind::Other
        };

        Self::network(kind, err.to_string())
    }
}

impl From<url::ParseError> for BtnError {
    fn from(err: url::ParseError) -> Self {
        Self::Protocol {
            kind: ProtocolErrorKind::InvalidUrl,
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BtnError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol {
            kind: ProtocolErrorKind::InvalidResponse,
            message: format!("JSON error: {}", err),
        }
    }
}
