// Error types for feedsync.
// Classifies remote, validation and session-readiness failures.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Caller-side input rejected before any remote call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Caption cannot be empty")]
    EmptyCaption,

    #[error("Caption is too long (max {max} characters)")]
    CaptionTooLong { max: usize },

    #[error("Comment cannot be empty")]
    EmptyComment,

    #[error("Comment is too long (max {max} characters)")]
    CommentTooLong { max: usize },

    #[error("Display name is required")]
    EmptyDisplayName,

    #[error("Display name is too long (max {max} characters)")]
    DisplayNameTooLong { max: usize },

    #[error("Bio is too long (max {max} characters)")]
    BioTooLong { max: usize },
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Backend session is not ready")]
    Unavailable,

    #[error("Remote call {op} failed: {message}")]
    Remote { op: &'static str, message: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Authentication failed: invalid or expired token")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Missing {0} environment variable")]
    MissingEnv(&'static str),

    #[error("{0}")]
    Other(String),
}

/// Coarse failure classes shared by reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Unavailable,
    RemoteFailure,
    ValidationFailure,
}

impl FeedError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FeedError::Unavailable => ErrorKind::Unavailable,
            FeedError::Validation(_) => ErrorKind::ValidationFailure,
            _ => ErrorKind::RemoteFailure,
        }
    }
}

impl ErrorKind {
    /// Only remote failures are worth another attempt.
    pub fn is_retryable(self) -> bool {
        self == ErrorKind::RemoteFailure
    }
}

/// Cloneable error snapshot retained in cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&FeedError> for ErrorInfo {
    fn from(err: &FeedError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<FeedError> for ErrorInfo {
    fn from(err: FeedError) -> Self {
        Self::from(&err)
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
