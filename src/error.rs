use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::gateways::GatewayError;
use crate::ports::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Payment gateway error: {0}")]
    ExternalGateway(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Conflict(_) => "conflict",
            AppError::ExternalGateway(_) => "external_gateway_error",
            AppError::NotFound(_) => "not_found",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::Database(_) | AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ExternalGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppError::NotFound("record not found".to_string()),
            StoreError::Conflict { current } => {
                AppError::Conflict(format!("transaction is already {current}"))
            }
            StoreError::Duplicate(what) => AppError::Conflict(format!("{what} already exists")),
            StoreError::Database(e) => AppError::Database(e),
            StoreError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Validation(msg) => AppError::Validation(msg),
            GatewayError::InvalidSignature => {
                AppError::Unauthorized("invalid callback signature".to_string())
            }
            GatewayError::Unsupported(method) => {
                AppError::NotFound(format!("{method} does not accept callbacks"))
            }
            other => AppError::ExternalGateway(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            // Storage details stay in the logs.
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                "internal error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                "internal error".to_string()
            }
            AppError::Validation(msg)
            | AppError::Conflict(msg)
            | AppError::ExternalGateway(msg)
            | AppError::NotFound(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg) => msg.clone(),
        };

        let body = Json(json!({
            "error": self.kind(),
            "message": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionStatus;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Validation("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(AppError::Conflict("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::ExternalGateway("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(AppError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_store_conflict_becomes_conflict() {
        let err: AppError = StoreError::Conflict {
            current: TransactionStatus::Completed,
        }
        .into();
        assert!(matches!(err, AppError::Conflict(ref m) if m.contains("completed")));
    }

    #[test]
    fn test_gateway_error_mapping() {
        let err: AppError = GatewayError::Validation("missing reference".into()).into();
        assert!(matches!(err, AppError::Validation(_)));

        let err: AppError = GatewayError::InvalidSignature.into();
        assert!(matches!(err, AppError::Unauthorized(_)));

        let err: AppError = GatewayError::CircuitBreakerOpen.into();
        assert!(matches!(err, AppError::ExternalGateway(_)));
    }

    #[tokio::test]
    async fn test_response_body_shape() {
        let response = AppError::Conflict("transaction is already completed".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "conflict");
        assert_eq!(body["message"], "transaction is already completed");
    }
}
