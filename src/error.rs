//! Error handling and custom error types
//!
//! Provides unified error handling across the service using thiserror, plus
//! the caller-facing [`GenerationError`] taxonomy returned by the orchestrator.

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Inference provider error: {0}")]
    AiProvider(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Insufficient credits for user {0}")]
    InsufficientCredit(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool or blocking-task failure around the database.
    #[error("Store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure returned to callers of `generate`.
///
/// Every variant carries a human-readable message; [`GenerationError::code`]
/// gives the stable machine code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    UnknownUser(String),

    #[error("{0}")]
    InsufficientCredit(String),

    #[error("{0}")]
    GenerationFailed(String),

    /// Store or other infrastructure unavailable. Not retried.
    #[error("{0}")]
    Internal(String),
}

impl GenerationError {
    pub fn code(&self) -> &'static str {
        match self {
            GenerationError::InvalidRequest(_) => "invalid_request",
            GenerationError::UnknownUser(_) => "unknown_user",
            GenerationError::InsufficientCredit(_) => "insufficient_credit",
            GenerationError::GenerationFailed(_) => "generation_failed",
            GenerationError::Internal(_) => "internal_error",
        }
    }
}

impl From<Error> for GenerationError {
    fn from(err: Error) -> Self {
        match err {
            Error::UserNotFound(_) => GenerationError::UnknownUser("User not found".to_string()),
            Error::InsufficientCredit(_) => {
                GenerationError::InsufficientCredit("Insufficient credits".to_string())
            }
            other => GenerationError::Internal(other.to_string()),
        }
    }
}
