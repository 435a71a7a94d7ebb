//! Error types for the publish service

use ivr_engine::{violation_messages, CompilationError, EngineError, PublishStage, ValidationError};
use manager_protocol::ManagerError;
use thiserror::Error;

use crate::deploy::DeployError;

/// Result type alias using ServiceError
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors returned by [`crate::FlowService`]
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Flow storage or lookup failed
    #[error(transparent)]
    Store(#[from] EngineError),

    /// The flow is not publishable; carries every violation
    #[error("Flow failed validation: {}", violation_messages(.0).join("; "))]
    Validation(Vec<ValidationError>),

    #[error("Compilation failed: {0}")]
    Compilation(#[from] CompilationError),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    /// Could not open or authenticate the manager session
    #[error("Switch connection failed: {0}")]
    Switch(#[from] ManagerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Pipeline stage this error belongs to
    pub fn stage(&self) -> PublishStage {
        match self {
            ServiceError::Store(EngineError::FlowNotFound(_) | EngineError::Forbidden { .. }) => {
                PublishStage::Lookup
            }
            ServiceError::Store(_) | ServiceError::Io(_) => PublishStage::Storage,
            ServiceError::Validation(_) => PublishStage::Validation,
            ServiceError::Compilation(_) => PublishStage::Compilation,
            ServiceError::Deploy(_) => PublishStage::Deploy,
            ServiceError::Switch(ManagerError::AuthenticationFailed(_)) => {
                PublishStage::Authentication
            }
            ServiceError::Switch(_) => PublishStage::Connection,
        }
    }

    /// Violations, if this is a validation failure
    pub fn violations(&self) -> Option<&[ValidationError]> {
        match self {
            ServiceError::Validation(v) => Some(v),
            _ => None,
        }
    }
}
