use std::fmt::Display;

use thiserror::Error;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures a store operation can report to its caller.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No record matches the supplied identifier.
    #[error("student not found: {0}")]
    NotFound(String),

    /// Credentials did not match any record.
    #[error("invalid credentials")]
    Unauthorized,

    /// The backend could not be reached or answered with garbage.
    #[error("{backend} backend unavailable: {reason}")]
    Unavailable {
        backend: &'static str,
        reason: String,
    },

    /// A required field is missing or malformed.
    #[error("invalid input: {0}")]
    Validation(String),

    /// A record with the same normalized identifier already exists.
    #[error("student already exists: {0}")]
    Conflict(String),
}

impl StoreError {
    pub fn unavailable(backend: &'static str, reason: impl Display) -> Self {
        StoreError::Unavailable {
            backend,
            reason: reason.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        StoreError::Validation(message.into())
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }

    /// Stable wire code used in IPC error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not_found",
            StoreError::Unauthorized => "unauthorized",
            StoreError::Unavailable { .. } => "backend_unavailable",
            StoreError::Validation(_) => "bad_params",
            StoreError::Conflict(_) => "conflict",
        }
    }
}
