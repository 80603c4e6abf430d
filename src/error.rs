//! Error types for debrid resolution and streaming

use thiserror::Error;

/// Result type alias for resolver operations
pub type Result<T> = std::result::Result<T, DebridError>;

/// Error types that can occur while resolving or streaming debrid content
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DebridError {
    #[error("Provider returned 4xx error: {status} at {endpoint}: {body}")]
    ClientError {
        status: u16,
        endpoint: String,
        body: String,
    },

    #[error("Provider returned 5xx error: {status} at {endpoint}: {body}")]
    ProviderError {
        status: u16,
        endpoint: String,
        body: String,
    },

    #[error("Provider returned unexpected status: {status} at {endpoint}: {body}")]
    UnknownError {
        status: u16,
        endpoint: String,
        body: String,
    },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid byte range: {0}")]
    InvalidRange(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Record store error: {0}")]
    StoreError(String),

    #[error("No cached files found for {0}")]
    NoCachedFiles(String),

    #[error("No live link available for {path}")]
    NoLiveLink { path: String },

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for DebridError {
    fn from(err: std::io::Error) -> Self {
        DebridError::StoreError(err.to_string())
    }
}

impl From<serde_json::Error> for DebridError {
    fn from(err: serde_json::Error) -> Self {
        DebridError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for DebridError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            DebridError::ParseError(format!("Failed to decode response: {}", err))
        } else {
            DebridError::NetworkError(err.to_string())
        }
    }
}

impl DebridError {
    /// Determine if this error should trigger a retry
    ///
    /// Upstream 5xx, unexpected statuses and bodies we could not decode are
    /// considered transient; all three are recorded as a provider error.
    /// 4xx responses and transport failures are recorded as-is and left to
    /// staleness-driven revalidation.
    pub fn should_retry(&self) -> bool {
        matches!(
            self,
            DebridError::ProviderError { .. }
                | DebridError::UnknownError { .. }
                | DebridError::ParseError(_)
        )
    }

    /// Errors that must propagate to the caller instead of being folded into
    /// a provider outcome
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DebridError::StoreError(_) | DebridError::ConfigError(_) | DebridError::InternalError(_)
        )
    }

    /// Upstream HTTP status attached to this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            DebridError::ClientError { status, .. }
            | DebridError::ProviderError { status, .. }
            | DebridError::UnknownError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the provider asked us to slow down
    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(429)
    }

    /// Create an error from an upstream HTTP status code
    ///
    /// 4xx becomes `ClientError`, 5xx becomes `ProviderError`, anything else
    /// becomes `UnknownError`.
    pub fn from_http_status(
        status: u16,
        endpoint: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let endpoint = endpoint.into();
        let body = body.into();
        if (400..500).contains(&status) {
            DebridError::ClientError {
                status,
                endpoint,
                body,
            }
        } else if (500..600).contains(&status) {
            DebridError::ProviderError {
                status,
                endpoint,
                body,
            }
        } else {
            DebridError::UnknownError {
                status,
                endpoint,
                body,
            }
        }
    }
}
