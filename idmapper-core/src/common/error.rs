use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Coarse classification of a failure, carried into run reports and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    UnknownOperation,
    ContextKey,
    Data,
    DataIntegrity,
    ExternalService,
    Cancelled,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::UnknownOperation => "unknown_operation",
            ErrorKind::ContextKey => "context_key",
            ErrorKind::Data => "data",
            ErrorKind::DataIntegrity => "data_integrity",
            ErrorKind::ExternalService => "external_service",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Io => "io",
        }
    }

    /// Pre-flight kinds abort a run before any step executes.
    pub fn is_preflight(&self) -> bool {
        matches!(self, ErrorKind::Configuration | ErrorKind::UnknownOperation)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum MapperError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Operation already registered: {0}")]
    DuplicateOperation(String),

    #[error("Dataset '{key}' not found in context (available: {available})")]
    ContextKey { key: String, available: String },

    #[error("Data error: {0}")]
    Data(String),

    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Run cancelled before step '{0}'")]
    Cancelled(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MapperError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MapperError::Configuration(_) | MapperError::DuplicateOperation(_) => ErrorKind::Configuration,
            MapperError::UnknownOperation(_) => ErrorKind::UnknownOperation,
            MapperError::ContextKey { .. } => ErrorKind::ContextKey,
            MapperError::Data(_) | MapperError::Json(_) => ErrorKind::Data,
            MapperError::DataIntegrity(_) => ErrorKind::DataIntegrity,
            MapperError::ExternalService(_) => ErrorKind::ExternalService,
            MapperError::Cancelled(_) => ErrorKind::Cancelled,
            MapperError::Io(_) => ErrorKind::Io,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        MapperError::Configuration(message.into())
    }

    pub fn data(message: impl Into<String>) -> Self {
        MapperError::Data(message.into())
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        MapperError::DataIntegrity(message.into())
    }
}

pub type Result<T> = std::result::Result<T, MapperError>;
