//! Administrator routes. Every handler takes `AdminUser`.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::domain::{CreditAccount, PaymentMethod, PricingPlan, Transaction, TransactionStatus};
use crate::error::AppError;
use crate::middleware::AdminUser;
use crate::ports::{Finalized, LedgerAnalytics, TransactionFilter};
use crate::services::admin::{CreditOverride, NewPlan, PlanUpdate, RejectRequest};
use crate::AppState;

const DEFAULT_LIST_LIMIT: i64 = 200;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TransactionQuery {
    pub status: Option<TransactionStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub user_id: Option<Uuid>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminTransactionsResponse {
    pub transactions: Vec<Transaction>,
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReviewResponse {
    pub success: bool,
    pub transaction: Transaction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<CreditAccount>,
}

impl From<Finalized> for ReviewResponse {
    fn from(finalized: Finalized) -> Self {
        Self {
            success: true,
            transaction: finalized.transaction,
            account: finalized.account,
        }
    }
}

#[utoipa::path(
    get,
    path = "/payments/admin/transactions",
    params(TransactionQuery),
    responses(
        (status = 200, description = "Transactions, newest first", body = AdminTransactionsResponse),
        (status = 401, description = "Missing or invalid admin token")
    ),
    tag = "Admin"
)]
pub async fn list_transactions(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<AdminTransactionsResponse>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 1000);
    let transactions = state
        .admin
        .list_transactions(TransactionFilter {
            user_id: query.user_id,
            status: query.status,
            payment_method: query.payment_method,
            limit: Some(limit),
        })
        .await?;

    Ok(Json(AdminTransactionsResponse {
        total: transactions.len(),
        transactions,
    }))
}

#[utoipa::path(
    patch,
    path = "/payments/admin/transactions/{id}/approve",
    params(("id" = Uuid, Path, description = "Transaction id")),
    responses(
        (status = 200, description = "Approved and credited", body = ReviewResponse),
        (status = 409, description = "Not a pending bank transfer")
    ),
    tag = "Admin"
)]
pub async fn approve(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ReviewResponse>, AppError> {
    let finalized = state.admin.approve(id).await?;
    Ok(Json(finalized.into()))
}

#[utoipa::path(
    patch,
    path = "/payments/admin/transactions/{id}/reject",
    params(("id" = Uuid, Path, description = "Transaction id")),
    request_body = RejectRequest,
    responses(
        (status = 200, description = "Rejected", body = ReviewResponse),
        (status = 409, description = "Not a pending bank transfer"),
        (status = 422, description = "Missing reason")
    ),
    tag = "Admin"
)]
pub async fn reject(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<RejectRequest>,
) -> Result<Json<ReviewResponse>, AppError> {
    let finalized = state.admin.reject(id, &request.reason).await?;
    Ok(Json(finalized.into()))
}

#[utoipa::path(
    get,
    path = "/payments/admin/analytics",
    responses((status = 200, description = "Ledger aggregates", body = LedgerAnalytics)),
    tag = "Admin"
)]
pub async fn analytics(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<LedgerAnalytics>, AppError> {
    Ok(Json(state.admin.analytics().await?))
}

#[utoipa::path(
    post,
    path = "/payments/admin/plans",
    request_body = NewPlan,
    responses(
        (status = 200, description = "Plan created", body = PricingPlan),
        (status = 409, description = "Plan id already exists"),
        (status = 422, description = "Invalid plan")
    ),
    tag = "Admin"
)]
pub async fn create_plan(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(plan): Json<NewPlan>,
) -> Result<Json<PricingPlan>, AppError> {
    Ok(Json(state.admin.create_plan(plan).await?))
}

#[utoipa::path(
    put,
    path = "/payments/admin/plans/{id}",
    params(("id" = String, Path, description = "Plan id")),
    request_body = PlanUpdate,
    responses(
        (status = 200, description = "Plan updated", body = PricingPlan),
        (status = 404, description = "Plan not found"),
        (status = 409, description = "Credits, type or prices of a sold plan"),
        (status = 422, description = "Invalid plan")
    ),
    tag = "Admin"
)]
pub async fn update_plan(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
    Json(update): Json<PlanUpdate>,
) -> Result<Json<PricingPlan>, AppError> {
    Ok(Json(state.admin.update_plan(&id, update).await?))
}

#[utoipa::path(
    patch,
    path = "/payments/admin/plans/{id}/deactivate",
    params(("id" = String, Path, description = "Plan id")),
    responses(
        (status = 200, description = "Plan deactivated", body = PricingPlan),
        (status = 404, description = "Plan not found")
    ),
    tag = "Admin"
)]
pub async fn deactivate_plan(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<Json<PricingPlan>, AppError> {
    Ok(Json(state.admin.deactivate_plan(&id).await?))
}

/// Credit override
///
/// Adds credits or sets the unlimited flag outside any transaction.
#[utoipa::path(
    patch,
    path = "/payments/admin/accounts/{user_id}/credits",
    params(("user_id" = Uuid, Path, description = "Account owner")),
    request_body = CreditOverride,
    responses(
        (status = 200, description = "Updated balance", body = CreditAccount),
        (status = 422, description = "Neither a positive amount nor unlimited")
    ),
    tag = "Admin"
)]
pub async fn grant_credits(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(user_id): Path<Uuid>,
    Json(request): Json<CreditOverride>,
) -> Result<Json<CreditAccount>, AppError> {
    Ok(Json(state.admin.grant_credits(user_id, request).await?))
}
