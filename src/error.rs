use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::media::MediaError;
use crate::store::StoreError;

/// Failures of the vote ledger. The HTTP status travels with the variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("This post has no poll")]
    PollNotConfigured,
    #[error("You have already voted on this poll")]
    DuplicateVote,
    #[error("Invalid poll option")]
    InvalidOption,
    #[error("Invalid poll: {0}")]
    InvalidPollEdit(String),
}

impl PollError {
    pub fn status(&self) -> StatusCode {
        match self {
            PollError::PollNotConfigured => StatusCode::NOT_FOUND,
            PollError::DuplicateVote => StatusCode::CONFLICT,
            PollError::InvalidOption | PollError::InvalidPollEdit(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            PollError::PollNotConfigured => "POLL_NOT_CONFIGURED",
            PollError::DuplicateVote => "DUPLICATE_VOTE",
            PollError::InvalidOption => "INVALID_OPTION",
            PollError::InvalidPollEdit(_) => "INVALID_POLL",
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotConfigured(String),
    #[error(transparent)]
    Poll(#[from] PollError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Media error: {0}")]
    Media(#[from] MediaError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Poll(e) => e.status(),
            AppError::Store(StoreError::RevisionMismatch(_)) => StatusCode::CONFLICT,
            AppError::Store(StoreError::ReadOnly) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Media(MediaError::InvalidKey(_) | MediaError::UnsupportedType(_)) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Store(_) | AppError::Database(_) | AppError::Media(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Conflict(_) => "CONFLICT",
            AppError::NotConfigured(_) => "NOT_CONFIGURED",
            AppError::Poll(e) => e.code(),
            AppError::Store(StoreError::RevisionMismatch(_)) => "REVISION_CONFLICT",
            AppError::Store(StoreError::PartiallyApplied { .. }) => "PARTIALLY_APPLIED",
            AppError::Store(StoreError::ReadOnly) => "NOT_CONFIGURED",
            AppError::Store(_) => "STORE_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Media(_) => "MEDIA_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let message = if status.is_server_error() {
            error!(error = %self, code, "request failed");
            match &self {
                // Operators need to know which post is out of step with the index.
                AppError::Store(StoreError::PartiallyApplied { .. })
                | AppError::Store(StoreError::ReadOnly)
                | AppError::NotConfigured(_) => self.to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            debug!(error = %self, code, "request rejected");
            self.to_string()
        };

        let body = Json(json!({
            "ok": false,
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(_: jsonwebtoken::errors::Error) -> Self {
        AppError::Unauthorized
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Internal(error.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
