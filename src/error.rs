use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::AuthError;
use crate::identity::GatewayError;
use crate::media::MediaError;
use crate::models::RecordIdError;
use crate::repo::RepoError;

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("authentication required")] Unauthenticated,
    #[error("forbidden")] Forbidden,
    #[error("not found")] NotFound,
    #[error("{0}")] InvalidInput(String),
    #[error("payload too large")] PayloadTooLarge,
    #[error("unsupported media type")] UnsupportedMedia(String),
    #[error("upstream failure")] Upstream(String),
}

impl ApiError {
    pub fn upstream(e: impl std::fmt::Display) -> Self {
        ApiError::Upstream(e.to_string())
    }

    fn details(&self) -> Option<String> {
        match self {
            ApiError::Upstream(detail) => Some(detail.clone()),
            ApiError::UnsupportedMedia(mime) => Some(mime.clone()),
            _ => None,
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            other => ApiError::upstream(other),
        }
    }
}

impl From<RecordIdError> for ApiError {
    fn from(e: RecordIdError) -> Self {
        ApiError::InvalidInput(e.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::NotConfigured => ApiError::upstream(e),
            AuthError::Jwt(_) => ApiError::Unauthenticated,
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::NotFound => ApiError::NotFound,
            other => ApiError::upstream(other),
        }
    }
}

impl From<MediaError> for ApiError {
    fn from(e: MediaError) -> Self {
        ApiError::upstream(e)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, details = ?self.details(), "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        HttpResponse::build(status).json(ApiErrorBody { error: self.to_string(), details: self.details() })
    }
}
