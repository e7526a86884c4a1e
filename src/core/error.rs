//! Error taxonomy for the pipeline engine

use crate::registry::ParamType;
use thiserror::Error;

/// Capability lookups that miss, plus registration mistakes caught at startup
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Execution path '{0}' is not of the form 'module:operation'")]
    MalformedPath(String),

    #[error("Module '{0}' not found")]
    ModuleNotFound(String),

    #[error("Operation '{operation}' not found in module '{module}'")]
    OperationNotFound { module: String, operation: String },

    #[error("Operation '{module}:{operation}' registered twice")]
    DuplicateOperation { module: String, operation: String },

    #[error("Operation '{module}:{operation}' declares more than one run identifier parameter")]
    MultipleRunIdentifiers { module: String, operation: String },
}

impl RegistryError {
    /// Whether this error is a lookup miss (as opposed to a registration error)
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RegistryError::MalformedPath(_)
                | RegistryError::ModuleNotFound(_)
                | RegistryError::OperationNotFound { .. }
        )
    }
}

/// Supplied parameters that do not fit the resolved operation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParameterShapeError {
    #[error("Unknown parameter '{parameter}' for '{execution_path}' (accepted: {})", accepted.join(", "))]
    UnknownParameter {
        execution_path: String,
        parameter: String,
        accepted: Vec<String>,
    },

    #[error("Parameter '{parameter}' for '{execution_path}' expects {expected}, got {found}")]
    TypeMismatch {
        execution_path: String,
        parameter: String,
        expected: ParamType,
        found: &'static str,
    },
}

/// Failure raised by a concrete operation, either at invocation or mid-stream
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("Missing parameter '{0}'")]
    MissingParameter(String),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("{0}")]
    Failed(String),
}

impl From<anyhow::Error> for OperationError {
    fn from(err: anyhow::Error) -> Self {
        OperationError::Persistence(format!("{:#}", err))
    }
}
