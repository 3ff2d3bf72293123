pub mod admin;
pub mod payments;
pub mod webhook;

use crate::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use utoipa::OpenApi;

/// OpenAPI schema for the payment intake API
#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        payments::checkout,
        payments::status,
        payments::bank_accounts,
        payments::plans,
        payments::history,
        payments::account,
        payments::cancel,
        payments::events,
        webhook::gateway_callback,
        admin::list_transactions,
        admin::approve,
        admin::reject,
        admin::analytics,
        admin::create_plan,
        admin::update_plan,
        admin::deactivate_plan,
        admin::grant_credits,
    ),
    components(
        schemas(
            crate::health::HealthResponse,
            crate::health::DependencyStatus,
            crate::domain::Transaction,
            crate::domain::TransactionStatus,
            crate::domain::PaymentMethod,
            crate::domain::Currency,
            crate::domain::PlanType,
            crate::domain::PricingPlan,
            crate::domain::CreditAccount,
            crate::domain::BankAccount,
            crate::ports::LedgerAnalytics,
            crate::services::checkout::CheckoutRequest,
            crate::services::checkout::CheckoutResponse,
            crate::services::checkout::BankAccountsResponse,
            crate::services::reconciliation::PaymentStatus,
            crate::services::reconciliation::CallbackResult,
            crate::services::admin::RejectRequest,
            crate::services::admin::NewPlan,
            crate::services::admin::PlanUpdate,
            crate::services::admin::CreditOverride,
            payments::PlansResponse,
            payments::TransactionsResponse,
            payments::CancelResponse,
            webhook::CallbackResponse,
            admin::AdminTransactionsResponse,
            admin::ReviewResponse,
        )
    ),
    info(
        title = "Payment Intake API",
        description = "Checkout, reconciliation and credit ledger for analysis credits",
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Payments", description = "Checkout and status endpoints"),
        (name = "Webhooks", description = "Gateway callbacks"),
        (name = "Admin", description = "Manual transfer review, analytics, plan catalog and credit overrides"),
    )
)]
pub struct ApiDoc;

/// Health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy or degraded", body = crate::health::HealthResponse),
        (status = 503, description = "Ledger unreachable")
    ),
    tag = "Health"
)]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let health_response = state.health.check_all().await;

    let status_code = match health_response.status.as_str() {
        "healthy" | "degraded" => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health_response))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn openapi() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
