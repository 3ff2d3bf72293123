use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::domain::{CreditAccount, Currency, PaymentMethod, PricingPlan, Transaction};
use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::services::checkout::{BankAccountsResponse, CheckoutRequest, CheckoutResponse};
use crate::services::reconciliation::PaymentStatus;
use crate::services::TransitionSource;
use crate::AppState;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StatusQuery {
    /// Run the bounded polling policy instead of a single check.
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BankAccountsQuery {
    pub currency: Option<Currency>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PlansResponse {
    pub plans: Vec<PricingPlan>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TransactionsResponse {
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CancelResponse {
    pub success: bool,
    pub transaction: Transaction,
}

pub(crate) fn parse_method(raw: &str) -> Result<PaymentMethod, AppError> {
    raw.parse::<PaymentMethod>()
        .map_err(|_| AppError::NotFound(format!("unknown payment method: {raw}")))
}

/// Start a checkout
///
/// Gateway methods answer with a `checkout_url`; bank transfers answer with the
/// destination accounts and instructions.
#[utoipa::path(
    post,
    path = "/payments/checkout/{method}",
    params(("method" = String, Path, description = "gateway_a, gateway_b or bank_transfer")),
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Checkout started", body = CheckoutResponse),
        (status = 422, description = "Invalid plan, currency or missing bank reference"),
        (status = 502, description = "Gateway unavailable")
    ),
    tag = "Payments"
)]
pub async fn checkout(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(method): Path<String>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, AppError> {
    let method = parse_method(&method)?;
    let response = state.checkout.checkout(user_id, method, request).await?;
    Ok(Json(response))
}

/// Transaction status
///
/// Performs one resolve attempt, or bounded polling with `?wait=true`. A
/// transaction that is still pending after polling is reported as `pending`.
#[utoipa::path(
    get,
    path = "/payments/status/{id}",
    params(("id" = Uuid, Path, description = "Transaction id"), StatusQuery),
    responses(
        (status = 200, description = "Current status", body = PaymentStatus),
        (status = 404, description = "Transaction not found")
    ),
    tag = "Payments"
)]
pub async fn status(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<PaymentStatus>, AppError> {
    state.checkout.owned_transaction(user_id, id).await?;

    let reconciled = if query.wait {
        state
            .reconciliation
            .poll_status(id, &state.config.status_poll)
            .await?
    } else {
        state
            .reconciliation
            .resolve(id, TransitionSource::Poll)
            .await?
    };

    let view = state
        .reconciliation
        .status_view(reconciled.transaction())
        .await?;
    Ok(Json(view))
}

#[utoipa::path(
    get,
    path = "/payments/bank-accounts",
    params(BankAccountsQuery),
    responses(
        (status = 200, description = "Bank transfer destinations", body = BankAccountsResponse),
        (status = 404, description = "Bank transfers disabled")
    ),
    tag = "Payments"
)]
pub async fn bank_accounts(
    State(state): State<AppState>,
    Query(query): Query<BankAccountsQuery>,
) -> Result<Json<BankAccountsResponse>, AppError> {
    Ok(Json(state.checkout.bank_accounts(query.currency)?))
}

#[utoipa::path(
    get,
    path = "/payments/plans",
    responses((status = 200, description = "Active plans", body = PlansResponse)),
    tag = "Payments"
)]
pub async fn plans(State(state): State<AppState>) -> Result<Json<PlansResponse>, AppError> {
    let plans = state.checkout.active_plans().await?;
    Ok(Json(PlansResponse { plans }))
}

#[utoipa::path(
    get,
    path = "/payments/transactions",
    responses(
        (status = 200, description = "Caller's transactions, newest first", body = TransactionsResponse),
        (status = 401, description = "No authenticated user")
    ),
    tag = "Payments"
)]
pub async fn history(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<TransactionsResponse>, AppError> {
    let transactions = state.checkout.history(user_id).await?;
    Ok(Json(TransactionsResponse { transactions }))
}

#[utoipa::path(
    get,
    path = "/payments/account",
    responses(
        (status = 200, description = "Caller's credit balance", body = CreditAccount),
        (status = 401, description = "No authenticated user")
    ),
    tag = "Payments"
)]
pub async fn account(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<CreditAccount>, AppError> {
    Ok(Json(state.checkout.account(user_id).await?))
}

/// Cancel a pending transaction
///
/// Gateway methods close the hosted session first. When the gateway refuses,
/// the transaction stays pending.
#[utoipa::path(
    post,
    path = "/payments/transactions/{id}/cancel",
    params(("id" = Uuid, Path, description = "Transaction id")),
    responses(
        (status = 200, description = "Cancelled", body = CancelResponse),
        (status = 404, description = "Transaction not found"),
        (status = 409, description = "Transaction already resolved"),
        (status = 502, description = "Gateway refused the cancellation")
    ),
    tag = "Payments"
)]
pub async fn cancel(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelResponse>, AppError> {
    let transaction = state.checkout.cancel_by_owner(user_id, id).await?;
    Ok(Json(CancelResponse {
        success: true,
        transaction,
    }))
}

/// Server-sent events for the caller's transactions and balance.
#[utoipa::path(
    get,
    path = "/payments/events",
    responses(
        (status = 200, description = "`payment` events as JSON, one per status or balance change", body = String, content_type = "text/event-stream"),
        (status = 401, description = "No authenticated user")
    ),
    tag = "Payments"
)]
pub async fn events(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.ledger.notifier().subscribe()).filter_map(
        move |message| match message {
            Ok(event) if event.user_id == user_id => Event::default()
                .event("payment")
                .json_data(&event)
                .ok()
                .map(Ok),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Event stream lagged");
                None
            }
        },
    );

    Sse::new(stream).keep_alive(KeepAlive::default())
}
