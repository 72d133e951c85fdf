use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use duet_types::api::StatusResponse;

/// Every failure a handler can answer with. All of them render as
/// `{success: false, message}`; only the status code differs.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid token
    #[error("Not authorized, login again")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// Soft failure: reported in the body with HTTP 200
    #[error("{0}")]
    Failed(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Log a storage/upload failure and turn it into a soft failure carrying its message.
    pub fn failed(err: impl std::fmt::Display) -> Self {
        error!("{}", err);
        Self::Failed(err.to_string())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Failed(_) => StatusCode::OK,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Ids come in as raw path segments so that a malformed one still gets the JSON envelope.
pub(crate) fn path_id(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::Failed(format!("Invalid id '{}'", raw)))
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(StatusResponse::failed(self.to_string()))).into_response()
    }
}
