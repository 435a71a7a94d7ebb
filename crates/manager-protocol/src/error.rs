//! Error types for the manager protocol client

use thiserror::Error;

/// Result type alias using ManagerError
pub type Result<T> = std::result::Result<T, ManagerError>;

/// Errors raised while talking to the switch manager interface
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Socket-level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation did not finish in time; the socket has been dropped
    #[error("Timed out waiting for {operation} after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The switch rejected our credentials
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The switch answered an action with `Response: Error`
    #[error("Action '{action}' failed: {message}")]
    ActionFailed { action: String, message: String },

    /// The connection closed while a response was outstanding
    #[error("Connection closed by switch")]
    ConnectionClosed,

    /// No authenticated session is open
    #[error("Not connected to manager interface")]
    NotConnected,

    /// The peer sent something that violates the framing
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl ManagerError {
    /// Authentication failures are fatal and must not be retried
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ManagerError::AuthenticationFailed(_))
    }

    pub(crate) fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }
}
