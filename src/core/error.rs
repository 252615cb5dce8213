use super::types::{CommitAction, EntityId};
use thiserror::Error;

/// Failure reported by a remote operation client.
///
/// Every variant is retryable under the default classifier; the strict
/// classifier treats `MalformedResponse` and 4xx `Rejected` as fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Backend reported error: {0}")]
    Backend(String),

    #[error("Signer error: {0}")]
    Signer(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Rejected {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None if err.is_decode() => Self::MalformedResponse(err.to_string()),
            None => Self::Transport(err.to_string()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Unbound placeholders: {}", .0.join(", "))]
    Unbound(Vec<String>),

    #[error("Invalid placeholder name '{0}'")]
    InvalidPlaceholder(String),
}

#[derive(Error, Debug)]
pub enum CommitError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// Terminal failure of one chain step. Effects of the steps before it stay committed.
    #[error("{step} step failed after {attempts} attempt(s): {reason}")]
    StepFailed {
        step: CommitAction,
        entity: Option<EntityId>,
        attempts: u32,
        reason: String,
    },

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl CommitError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Returns `true` when the error was raised before any remote call was made.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Template(_))
    }
}

impl From<std::io::Error> for CommitError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CommitError>;

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;
