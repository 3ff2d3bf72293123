//! Administrator operations: manual transfer review, analytics, the plan
//! catalog and credit overrides.

use bigdecimal::{BigDecimal, Zero};
use serde::Deserialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

use super::ledger::{LedgerService, TransitionSource};
use crate::domain::{
    CreditAccount, CreditGrant, Currency, PaymentMethod, PlanType, PricingPlan, Transaction,
};
use crate::error::AppError;
use crate::ports::{Finalized, LedgerAnalytics, StoreError, TransactionFilter};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RejectRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewPlan {
    pub id: String,
    pub name: String,
    pub name_en: Option<String>,
    pub description: Option<String>,
    pub plan_type: PlanType,
    pub credits: i64,
    #[schema(value_type = Object)]
    pub prices: BTreeMap<Currency, BigDecimal>,
    #[serde(default)]
    pub is_popular: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub sort_order: i32,
}

fn default_true() -> bool {
    true
}

/// Partial plan edit. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct PlanUpdate {
    pub name: Option<String>,
    pub name_en: Option<String>,
    pub description: Option<String>,
    pub plan_type: Option<PlanType>,
    pub credits: Option<i64>,
    #[schema(value_type = Object)]
    pub prices: Option<BTreeMap<Currency, BigDecimal>>,
    pub is_popular: Option<bool>,
    pub is_active: Option<bool>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreditOverride {
    pub amount: Option<i64>,
    #[serde(default)]
    pub unlimited: bool,
    pub reason: Option<String>,
}

#[derive(Clone)]
pub struct AdminService {
    ledger: LedgerService,
}

impl AdminService {
    pub fn new(ledger: LedgerService) -> Self {
        Self { ledger }
    }

    pub async fn list_transactions(
        &self,
        filter: TransactionFilter,
    ) -> Result<Vec<Transaction>, AppError> {
        Ok(self.ledger.store().list_transactions(&filter).await?)
    }

    /// Confirms a manual transfer and credits the payer.
    pub async fn approve(&self, id: Uuid) -> Result<Finalized, AppError> {
        self.reviewable(id).await?;
        Ok(self
            .ledger
            .apply_credit(id, None, TransitionSource::Admin)
            .await?)
    }

    pub async fn reject(&self, id: Uuid, reason: &str) -> Result<Finalized, AppError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::Validation("a rejection reason is required".to_string()));
        }
        self.reviewable(id).await?;
        Ok(self
            .ledger
            .fail(id, Some(reason.to_string()), TransitionSource::Admin)
            .await?)
    }

    pub async fn analytics(&self) -> Result<LedgerAnalytics, AppError> {
        Ok(self.ledger.store().analytics().await?)
    }

    pub async fn create_plan(&self, new: NewPlan) -> Result<PricingPlan, AppError> {
        let plan = PricingPlan {
            id: new.id.trim().to_string(),
            name: new.name.trim().to_string(),
            name_en: new.name_en,
            description: new.description,
            plan_type: new.plan_type,
            credits: new.credits,
            prices: new.prices,
            is_popular: new.is_popular,
            is_active: new.is_active,
            sort_order: new.sort_order,
        };
        validate_plan(&plan)?;

        self.ledger.store().insert_plan(&plan).await?;
        tracing::info!(plan_id = %plan.id, credits = plan.credits, "Plan created");
        Ok(plan)
    }

    /// Display fields are always editable. Credits, type and prices are frozen
    /// once any completed purchase references the plan.
    pub async fn update_plan(&self, id: &str, update: PlanUpdate) -> Result<PricingPlan, AppError> {
        let current = self.plan(id).await?;

        let mut plan = current.clone();
        if let Some(name) = update.name {
            plan.name = name.trim().to_string();
        }
        if update.name_en.is_some() {
            plan.name_en = update.name_en;
        }
        if update.description.is_some() {
            plan.description = update.description;
        }
        if let Some(plan_type) = update.plan_type {
            plan.plan_type = plan_type;
        }
        if let Some(credits) = update.credits {
            plan.credits = credits;
        }
        if let Some(prices) = update.prices {
            plan.prices = prices;
        }
        if let Some(is_popular) = update.is_popular {
            plan.is_popular = is_popular;
        }
        if let Some(is_active) = update.is_active {
            plan.is_active = is_active;
        }
        if let Some(sort_order) = update.sort_order {
            plan.sort_order = sort_order;
        }
        validate_plan(&plan)?;

        if current.differs_structurally(&plan)
            && self.ledger.store().plan_has_completed_sales(&plan.id).await?
        {
            return Err(AppError::Conflict(format!(
                "plan {} has completed purchases; credits, type and prices cannot change",
                plan.id
            )));
        }

        self.ledger.store().update_plan(&plan).await?;
        tracing::info!(plan_id = %plan.id, "Plan updated");
        Ok(plan)
    }

    pub async fn deactivate_plan(&self, id: &str) -> Result<PricingPlan, AppError> {
        let mut plan = self.plan(id).await?;
        plan.is_active = false;
        self.ledger.store().update_plan(&plan).await?;
        tracing::info!(plan_id = %plan.id, "Plan deactivated");
        Ok(plan)
    }

    /// Credit override outside any transaction.
    pub async fn grant_credits(
        &self,
        user_id: Uuid,
        request: CreditOverride,
    ) -> Result<CreditAccount, AppError> {
        let grant = match (request.unlimited, request.amount) {
            (true, _) => CreditGrant::Unlimited,
            (false, Some(amount)) if amount > 0 => CreditGrant::Credits(amount),
            (false, _) => {
                return Err(AppError::Validation(
                    "amount must be a positive number of credits".to_string(),
                ))
            }
        };

        let reason = request
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());
        Ok(self.ledger.grant_override(user_id, grant, reason).await?)
    }

    async fn plan(&self, id: &str) -> Result<PricingPlan, AppError> {
        self.ledger.store().get_plan(id).await.map_err(|e| match e {
            StoreError::NotFound => AppError::NotFound(format!("plan {id} not found")),
            other => other.into(),
        })
    }

    /// Approve and reject apply to pending manual transfers only.
    async fn reviewable(&self, id: Uuid) -> Result<Transaction, AppError> {
        let tx = self
            .ledger
            .store()
            .get_transaction(id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => AppError::NotFound(format!("transaction {id} not found")),
                other => other.into(),
            })?;

        if tx.payment_method != PaymentMethod::BankTransfer {
            return Err(AppError::Conflict(format!(
                "only bank transfers can be reviewed, this is a {} transaction",
                tx.payment_method
            )));
        }
        if tx.is_terminal() {
            return Err(AppError::Conflict(format!("transaction is already {}", tx.status)));
        }
        Ok(tx)
    }
}

// Prices are stored as NUMERIC(12, 2).
const PRICE_SCALE: i64 = 2;
const MAX_PRICE: i64 = 10_000_000_000;

fn validate_plan(plan: &PricingPlan) -> Result<(), AppError> {
    if plan.id.is_empty() || !plan.id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(AppError::Validation(
            "plan id must be non-empty and use letters, digits, '_' or '-'".to_string(),
        ));
    }
    if plan.name.is_empty() {
        return Err(AppError::Validation("plan name is required".to_string()));
    }
    if plan.credits <= 0 {
        return Err(AppError::Validation("credits must be positive".to_string()));
    }
    if plan.prices.is_empty() {
        return Err(AppError::Validation("at least one price is required".to_string()));
    }
    let max_price = BigDecimal::from(MAX_PRICE);
    for (currency, price) in &plan.prices {
        if *price <= BigDecimal::zero() {
            return Err(AppError::Validation(format!("price in {currency} must be positive")));
        }
        let (_, scale) = price.normalized().as_bigint_and_exponent();
        if scale > PRICE_SCALE {
            return Err(AppError::Validation(format!(
                "price in {currency} has more than {PRICE_SCALE} decimal places"
            )));
        }
        if *price >= max_price {
            return Err(AppError::Validation(format!(
                "price in {currency} must be below {MAX_PRICE}"
            )));
        }
    }
    Ok(())
}
