use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Simplified error structure for OpenAPI documentation
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Bad Request",
    "message": "Webhook payload carried no parseable cart",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Bad Request", "Internal Server Error")
    #[schema(example = "Bad Request")]
    pub error: String,
    /// Human-readable error description
    #[schema(example = "Webhook payload carried no parseable cart")]
    pub message: String,
    /// ISO 8601 timestamp when the error occurred
    #[schema(example = "2024-12-09T10:30:00.000Z")]
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    /// Webhook request arrived without a `Stripe-Signature` header.
    #[error("Missing webhook signature")]
    MissingSignature,

    /// Signature header present but the HMAC did not match the raw body,
    /// or the header/timestamp was malformed or stale.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// The event's cart metadata was absent or did not deserialize into
    /// the expected `{sku, quantity}[]` shape.
    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    /// The event carried no user id; a paid order cannot be attributed.
    #[error("Missing user id in webhook metadata")]
    MissingUser,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping:
    /// structural/auth failures are 4xx (the provider must not retry),
    /// persistence failures are 5xx (the provider should retry later).
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingSignature
            | Self::InvalidSignature
            | Self::MalformedPayload(_)
            | Self::MissingUser
            | Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InsufficientStock(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal and signature errors return generic messages so the
    /// response never leaks why verification or persistence failed.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            Self::InvalidSignature => "Invalid webhook signature".to_string(),
            Self::ExternalServiceError(_) => "Upstream service error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_failures_map_to_bad_request() {
        for err in [
            ServiceError::MissingSignature,
            ServiceError::InvalidSignature,
            ServiceError::MalformedPayload("cart".into()),
            ServiceError::MissingUser,
        ] {
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn persistence_failures_map_to_server_error() {
        let err = ServiceError::DatabaseError(sea_orm::DbErr::Custom("down".into()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.response_message(), "Internal server error");
    }

    #[test]
    fn signature_response_does_not_leak_detail() {
        let err = ServiceError::InvalidSignature;
        assert_eq!(err.response_message(), "Invalid webhook signature");
    }
}
