use http::StatusCode;
use thiserror::Error;

use crate::envelope::ResponseCode;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Canonical error kinds every backend adapter normalizes into
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Blob not found: {key}")]
    NotFound { key: String },

    #[error("Access to storage was rejected: {reason}")]
    Forbidden { reason: String },

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Operation not supported by this provider: {operation}")]
    NotImplemented { operation: &'static str },

    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    /// Create a backend error from a plain message
    pub fn backend_msg<S: Into<String>>(message: S) -> Self {
        let message: String = message.into();
        Self::Backend {
            source: message.into(),
        }
    }

    pub fn not_found<S: Into<String>>(key: S) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn forbidden<S: Into<String>>(reason: S) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Map an HTTP status reported by a backend onto the canonical kinds.
    ///
    /// `None` is returned for 2xx statuses.
    pub fn from_status(status: u16, key: &str, detail: impl Into<String>) -> Option<Self> {
        match status {
            200..=299 => None,
            404 => Some(Self::not_found(key)),
            401 | 403 => Some(Self::forbidden(detail)),
            _ => Some(Self::backend_msg(format!("HTTP {}: {}", status, detail.into()))),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }

    /// Semantic response code reported in the envelope
    pub fn response_code(&self) -> ResponseCode {
        match self {
            Self::NotFound { .. } | Self::Invalid { .. } => ResponseCode::ClientError,
            Self::Forbidden { .. } => ResponseCode::Forbidden,
            _ => ResponseCode::ServerError,
        }
    }

    /// HTTP status the route layer should answer with
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Invalid { .. } => StatusCode::BAD_REQUEST,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Numeric status recorded in per-item batch failures
    pub fn status_u16(&self) -> u16 {
        self.status_code().as_u16()
    }
}
