//! Error types for REST API operations

use kucoin_types::KucoinError;

/// Business code the exchange returns on success
pub const SUCCESS_CODE: &str = "200000";

/// Errors that can occur during REST API operations
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx status
    #[error("HTTP {status}: {message}")]
    Status {
        status: u16,
        /// Business code from the body, if it had one
        code: Option<String>,
        message: String,
    },

    /// Exchange returned a non-success business code
    #[error("API error {code}: {message}")]
    Api { code: String, message: String },

    /// Invalid API credentials
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Missing API credentials for private endpoint
    #[error("Authentication required for {0}")]
    AuthRequired(String),

    /// Failed to parse response
    #[error("Parse error: {0}")]
    Parse(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Invalid request parameters
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Environment variable not set
    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),
}

impl RestError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Too many requests, either by status or business code
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::Status { status, code, .. } => {
                *status == 429 || code.as_deref() == Some("429000")
            }
            Self::Api { code, .. } => code == "429000",
            _ => false,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout => true,
            Self::Status { status, .. } => *status >= 500 || self.is_rate_limited(),
            Self::Api { .. } => self.is_rate_limited(),
            _ => false,
        }
    }
}

impl From<RestError> for KucoinError {
    fn from(err: RestError) -> Self {
        match err {
            RestError::Api { code, message } => KucoinError::Api { code, message },
            RestError::Status {
                status,
                code,
                message,
            } => KucoinError::Api {
                code: code.unwrap_or_else(|| status.to_string()),
                message,
            },
            other => KucoinError::Api {
                code: "client".to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Result type for REST operations
pub type RestResult<T> = Result<T, RestError>;
