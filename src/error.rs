use crate::types::ChecksheetKey;

/// Failure taxonomy shared by every workflow operation
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("not authorized: {0}")]
    Authorization(String),
    #[error("checksheet {0} does not exist")]
    NotFound(ChecksheetKey),
    #[error("conflict on {key}: {detail}")]
    Conflict { key: ChecksheetKey, detail: String },
    #[error("storage failure: {0}")]
    Persistence(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    NotFound,
    Conflict,
    Persistence,
}

impl WorkflowError {
    pub fn conflict(key: ChecksheetKey, detail: impl Into<String>) -> Self {
        WorkflowError::Conflict {
            key,
            detail: detail.into(),
        }
    }
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Validation(_) => ErrorKind::Validation,
            WorkflowError::Authorization(_) => ErrorKind::Authorization,
            WorkflowError::NotFound(_) => ErrorKind::NotFound,
            WorkflowError::Conflict { .. } => ErrorKind::Conflict,
            WorkflowError::Persistence(_) => ErrorKind::Persistence,
        }
    }
}

impl From<sled::Error> for WorkflowError {
    fn from(err: sled::Error) -> Self {
        WorkflowError::Persistence(err.to_string())
    }
}

impl From<minicbor::decode::Error> for WorkflowError {
    fn from(err: minicbor::decode::Error) -> Self {
        WorkflowError::Persistence(format!("corrupt record: {err}"))
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for WorkflowError {
    fn from(err: minicbor::encode::Error<E>) -> Self {
        WorkflowError::Persistence(format!("failed to encode record: {err}"))
    }
}
