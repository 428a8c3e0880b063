//! Error types for the KuCoin client

use std::time::Duration;
use thiserror::Error;

/// Main error type for feed, connection and calibration operations
#[derive(Error, Debug, Clone)]
pub enum KucoinError {
    // === Connection Errors ===
    /// Failed to establish the websocket connection
    #[error("Failed to connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// Connection attempt timed out
    #[error("Connection timeout after {timeout:?} to {url}")]
    ConnectionTimeout { url: String, timeout: Duration },

    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Operation needs a live connection
    #[error("Not connected")]
    NotConnected,

    /// Bullet token request failed
    #[error("Token request failed: {0}")]
    TokenRequest(String),

    // === Protocol Errors ===
    /// Failed to parse JSON message
    #[error("Invalid JSON: {message}")]
    InvalidJson { message: String, raw: Option<String> },

    /// Unexpected message format
    #[error("Unexpected message format: {0}")]
    UnexpectedMessage(String),

    /// Server answered with `type: error`
    #[error("Server error {code}: {message}")]
    Server { code: String, message: String },

    // === Subscription Errors ===
    /// Symbol failed validation
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    // === Calibration Errors ===
    /// Snapshot request failed
    #[error("Snapshot for {symbol} failed: {reason}")]
    SnapshotFailed { symbol: String, reason: String },

    /// Snapshot request did not finish in time
    #[error("Snapshot for {symbol} timed out after {timeout:?}")]
    SnapshotTimeout { symbol: String, timeout: Duration },

    // === Precondition Errors ===
    /// Caller violated an API precondition (bad tunnel attach, ping interval...)
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Object was used after dispose
    #[error("Object has been disposed")]
    Disposed,

    // === API Errors ===
    /// REST call returned a failure
    #[error("API error {code}: {message}")]
    Api { code: String, message: String },

    // === Internal Errors ===
    /// Internal channel was closed unexpectedly
    #[error("Internal channel closed unexpectedly")]
    ChannelClosed,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl KucoinError {
    /// Returns true if this error is potentially recoverable via retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::ConnectionTimeout { .. }
                | Self::WebSocket(_)
                | Self::NotConnected
                | Self::TokenRequest(_)
                | Self::SnapshotFailed { .. }
                | Self::SnapshotTimeout { .. }
        )
    }

    /// Returns true if this error requires reconnection
    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self,
            Self::WebSocket(_) | Self::ConnectionFailed { .. } | Self::ChannelClosed
        )
    }

    /// Returns true for caller bugs that must not be retried
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition(_) | Self::Disposed)
    }

    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::Precondition(reason.into())
    }

    pub fn snapshot_failed(symbol: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::SnapshotFailed {
            symbol: symbol.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for client operations
pub type KucoinResult<T> = Result<T, KucoinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let err = KucoinError::SnapshotTimeout {
            symbol: "BTC-USDT".into(),
            timeout: Duration::from_secs(60),
        };
        assert!(err.is_retryable());

        assert!(!KucoinError::Disposed.is_retryable());
        assert!(!KucoinError::precondition("too many tunnels").is_retryable());
    }

    #[test]
    fn test_error_requires_reconnect() {
        assert!(KucoinError::WebSocket("connection reset".into()).requires_reconnect());
        assert!(!KucoinError::NotConnected.requires_reconnect());
    }

    #[test]
    fn test_precondition_classification() {
        assert!(KucoinError::Disposed.is_precondition());
        assert!(KucoinError::precondition("x").is_precondition());
        assert!(!KucoinError::ChannelClosed.is_precondition());
    }

    #[test]
    fn test_display() {
        let err = KucoinError::snapshot_failed("ETH-USDT", "HTTP 503");
        assert_eq!(err.to_string(), "Snapshot for ETH-USDT failed: HTTP 503");
    }
}
