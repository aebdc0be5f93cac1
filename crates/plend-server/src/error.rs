use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use plend_ledger::{ErrorKind, LedgerError};
use plend_service::ServiceError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("a caller is required to {0}")]
    Unauthenticated(&'static str),

    #[error("unknown or malformed credentials")]
    InvalidCredentials,

    #[error("caller may not {0}")]
    Forbidden(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<LedgerError> for ServerError {
    fn from(err: LedgerError) -> Self {
        Self::Service(err.into())
    }
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Service(err) => status_for(err.kind()),
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Io(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> String {
        match self {
            Self::Service(err) => err.kind().to_string(),
            Self::BadRequest(_) => "bad_request".into(),
            Self::Unauthenticated(_) | Self::InvalidCredentials => "unauthenticated".into(),
            Self::Forbidden(_) => ErrorKind::Authorization.to_string(),
            Self::Io(_) | Self::Internal(_) => "internal".into(),
        }
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Authorization => StatusCode::FORBIDDEN,
        ErrorKind::Proof => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::StateConflict | ErrorKind::Deadline => StatusCode::CONFLICT,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Transfer => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };
        let body = ErrorBody {
            error: self.code(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
