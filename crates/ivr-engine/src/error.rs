//! Error types for the flow engine

use thiserror::Error;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by flow storage and lookup
#[derive(Debug, Error)]
pub enum EngineError {
    /// No flow with the given ID
    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    /// Caller does not own the flow it tried to mutate
    #[error("Flow '{flow_id}' is owned by '{owner}', not '{requester}'")]
    Forbidden {
        flow_id: String,
        owner: String,
        requester: String,
    },

    /// A flow with this ID already exists
    #[error("Flow already exists: {0}")]
    DuplicateFlow(String),

    /// ID cannot be used as a file or context name
    #[error("Invalid flow ID '{0}': only ASCII letters, digits, '-' and '_' are allowed")]
    InvalidFlowId(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create a not-found error for a flow ID
    pub fn not_found(flow_id: impl Into<String>) -> Self {
        Self::FlowNotFound(flow_id.into())
    }
}
