use super::types::TaskStage;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClosureError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Illegal state transition: requested {requested} but was {current}")]
    IllegalTransition {
        current: TaskStage,
        requested: TaskStage,
    },

    #[error(
        "Concurrency token mismatch: expected {}, got {}",
        expected.as_deref().unwrap_or("<none>"),
        actual.as_deref().unwrap_or("<none>")
    )]
    ConcurrencyViolation {
        expected: Option<String>,
        actual: Option<String>,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Closure '{0}' not found")]
    NotFound(String),

    #[error("Closure definition '{0}' not found")]
    DefinitionNotFound(String),

    #[error("No execution driver available for runtime '{0}'")]
    NoExecutionDriver(String),

    #[error("Version conflict for closure '{id}': expected version {expected}, actual {actual}")]
    VersionConflict { id: String, expected: u64, actual: u64 },

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ClosureError>;

/// Coarse classification of failures by who gets to see them.
///
/// Only `Validation` and `Conflict` are surfaced to the immediate caller. Infrastructure
/// failures end up as a FAILED instance and side-channel failures are only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Conflict,
    Infrastructure,
    SideChannel,
}

impl ClosureError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_)
            | Self::IllegalTransition { .. }
            | Self::ConcurrencyViolation { .. }
            | Self::DefinitionNotFound(_)
            | Self::NoExecutionDriver(_)
            | Self::NotFound(_) => ErrorClass::Validation,
            Self::Conflict(_) | Self::VersionConflict { .. } => ErrorClass::Conflict,
            Self::Driver(_) | Self::Internal(_) => ErrorClass::Infrastructure,
            Self::Notification(_) => ErrorClass::SideChannel,
        }
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

impl From<serde_json::Error> for ClosureError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization: {err}"))
    }
}
