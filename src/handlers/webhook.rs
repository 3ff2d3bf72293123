use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use super::payments::parse_method;
use crate::error::AppError;
use crate::services::CallbackResult;
use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct CallbackResponse {
    pub status: CallbackResult,
}

/// Gateway callback
///
/// The body is read raw so the adapter can verify its signature. Duplicate
/// deliveries answer 200 so the provider stops retrying.
#[utoipa::path(
    post,
    path = "/payments/webhooks/{gateway}",
    params(("gateway" = String, Path, description = "gateway_a or gateway_b")),
    responses(
        (status = 200, description = "Callback accepted", body = CallbackResponse),
        (status = 401, description = "Invalid signature"),
        (status = 404, description = "Unknown gateway or reference")
    ),
    tag = "Webhooks"
)]
pub async fn gateway_callback(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CallbackResponse>, AppError> {
    let method = parse_method(&gateway)?;
    let status = state
        .reconciliation
        .apply_callback(method, &headers, &body)
        .await?;
    Ok(Json(CallbackResponse { status }))
}
