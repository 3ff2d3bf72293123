//! Storage port for the ledger.
//!
//! Services talk to `LedgerStore` only; `db::PgLedger` and `db::InMemoryLedger`
//! are the two adapters.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::{
    CreditAccount, CreditGrant, Currency, PaymentMethod, PricingPlan, Transaction,
    TransactionStatus,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("transaction is already {current}")]
    Conflict { current: TransactionStatus },
    #[error("duplicate record: {0}")]
    Duplicate(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("internal store error: {0}")]
    Internal(String),
}

/// How a pending transaction leaves `pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Completed { external_reference: Option<String> },
    Failed { note: Option<String> },
    Cancelled { note: Option<String> },
}

impl Resolution {
    pub fn status(&self) -> TransactionStatus {
        match self {
            Self::Completed { .. } => TransactionStatus::Completed,
            Self::Failed { .. } => TransactionStatus::Failed,
            Self::Cancelled { .. } => TransactionStatus::Cancelled,
        }
    }

    pub fn note(&self) -> Option<&str> {
        match self {
            Self::Completed { .. } => None,
            Self::Failed { note } | Self::Cancelled { note } => note.as_deref(),
        }
    }
}

/// Result of a successful compare-and-set out of `pending`.
/// `account` is present only when the transition was to `completed`.
#[derive(Debug, Clone)]
pub struct Finalized {
    pub transaction: Transaction,
    pub account: Option<CreditAccount>,
    pub application: Option<CreditApplication>,
}

/// Durable record that the Crediting Operation ran for a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CreditApplication {
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub credits_added: i64,
    pub unlimited: bool,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub user_id: Option<Uuid>,
    pub status: Option<TransactionStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub limit: Option<i64>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &Transaction) -> bool {
        self.user_id.map_or(true, |u| tx.user_id == u)
            && self.status.map_or(true, |s| tx.status == s)
            && self.payment_method.map_or(true, |m| tx.payment_method == m)
    }
}

/// Aggregates computed from the ledger on every call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct LedgerAnalytics {
    pub total_transactions: i64,
    #[schema(value_type = Object)]
    pub by_status: BTreeMap<TransactionStatus, i64>,
    #[schema(value_type = Object)]
    pub by_method: BTreeMap<PaymentMethod, i64>,
    #[schema(value_type = Object)]
    pub revenue_by_currency: BTreeMap<Currency, BigDecimal>,
}

impl LedgerAnalytics {
    /// Every status and method present with a zero count.
    pub fn zeroed() -> Self {
        Self {
            total_transactions: 0,
            by_status: TransactionStatus::ALL.into_iter().map(|s| (s, 0)).collect(),
            by_method: PaymentMethod::ALL.into_iter().map(|m| (m, 0)).collect(),
            revenue_by_currency: BTreeMap::new(),
        }
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), StoreError>;

    async fn get_transaction(&self, id: Uuid) -> Result<Transaction, StoreError>;

    async fn find_by_external_reference(
        &self,
        method: PaymentMethod,
        external_reference: &str,
    ) -> Result<Transaction, StoreError>;

    /// Newest first.
    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Pending gateway transactions created before `older_than`, oldest first.
    async fn pending_gateway_transactions(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Atomically moves a transaction out of `pending`.
    ///
    /// For `Resolution::Completed` the credit grant and the credit application record
    /// are written in the same atomic unit. A transaction that is no longer pending
    /// yields `StoreError::Conflict` and nothing is written.
    async fn finalize(&self, id: Uuid, resolution: Resolution) -> Result<Finalized, StoreError>;

    async fn credit_application(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<CreditApplication>, StoreError>;

    /// Zero balance when the user has no account row yet.
    async fn get_account(&self, user_id: Uuid) -> Result<CreditAccount, StoreError>;

    /// Administrator override. Not tied to any transaction.
    async fn grant_credits(
        &self,
        user_id: Uuid,
        grant: CreditGrant,
        reason: Option<&str>,
    ) -> Result<CreditAccount, StoreError>;

    async fn get_plan(&self, id: &str) -> Result<PricingPlan, StoreError>;

    async fn list_plans(&self, active_only: bool) -> Result<Vec<PricingPlan>, StoreError>;

    async fn insert_plan(&self, plan: &PricingPlan) -> Result<(), StoreError>;

    async fn update_plan(&self, plan: &PricingPlan) -> Result<(), StoreError>;

    async fn plan_has_completed_sales(&self, plan_id: &str) -> Result<bool, StoreError>;

    async fn analytics(&self) -> Result<LedgerAnalytics, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Orders plans for display: sort order, then lowest listed price.
pub fn sort_plans(plans: &mut [PricingPlan]) {
    plans.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| min_price(a).cmp(&min_price(b)))
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn min_price(plan: &PricingPlan) -> Option<&BigDecimal> {
    plan.prices.values().min()
}
