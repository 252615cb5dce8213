use crate::core::CommitError;
use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug)]
pub enum WebError {
    /// Caller input that cannot be published. Answered with 400.
    BadRequest(String),
    /// Remote or chain failure. Answered with 500.
    Internal(String),
}

impl WebError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CommitError> for WebError {
    fn from(err: CommitError) -> Self {
        match err {
            CommitError::Validation(message) => Self::BadRequest(message),
            CommitError::Template(err) => Self::BadRequest(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<MultipartError> for WebError {
    fn from(err: MultipartError) -> Self {
        Self::BadRequest(err.body_text())
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::BadRequest(message) => ErrorResponse {
                error: message,
                details: None,
            },
            Self::Internal(details) => {
                error!(%details, "upload failed");
                ErrorResponse {
                    error: "Internal server error".to_string(),
                    details: Some(details),
                }
            }
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, WebError>;
