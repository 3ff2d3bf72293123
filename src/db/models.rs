//! Row types for the Postgres ledger. Enum columns are TEXT and parsed on the way out.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::{CreditAccount, Currency, PricingPlan, Transaction};
use crate::ports::{CreditApplication, StoreError};

#[derive(Debug, Clone, FromRow)]
pub struct TransactionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: String,
    pub package_type: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method: String,
    pub external_reference: Option<String>,
    pub bank_reference: Option<String>,
    pub credits_to_add: i64,
    pub status: String,
    pub resolution_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

fn parse<T: std::str::FromStr<Err = crate::domain::ParseEnumError>>(
    value: &str,
) -> Result<T, StoreError> {
    value
        .parse()
        .map_err(|e: crate::domain::ParseEnumError| StoreError::Internal(e.to_string()))
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Transaction {
            id: row.id,
            user_id: row.user_id,
            plan_id: row.plan_id,
            package_type: parse(&row.package_type)?,
            amount: row.amount,
            currency: parse(&row.currency)?,
            payment_method: parse(&row.payment_method)?,
            external_reference: row.external_reference,
            bank_reference: row.bank_reference,
            credits_to_add: row.credits_to_add,
            status: parse(&row.status)?,
            resolution_note: row.resolution_note,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PlanRow {
    pub id: String,
    pub name: String,
    pub name_en: Option<String>,
    pub description: Option<String>,
    pub plan_type: String,
    pub credits: i64,
    pub is_popular: bool,
    pub is_active: bool,
    pub sort_order: i32,
}

#[derive(Debug, Clone, FromRow)]
pub struct PlanPriceRow {
    pub plan_id: String,
    pub currency: String,
    pub amount: BigDecimal,
}

impl PlanRow {
    /// Joins a plan row with its price rows. Prices for other plans are ignored.
    pub fn into_plan(self, prices: &[PlanPriceRow]) -> Result<PricingPlan, StoreError> {
        let mut by_currency = BTreeMap::new();
        for price in prices.iter().filter(|p| p.plan_id == self.id) {
            let currency: Currency = parse(&price.currency)?;
            by_currency.insert(currency, price.amount.clone());
        }

        Ok(PricingPlan {
            plan_type: parse(&self.plan_type)?,
            id: self.id,
            name: self.name,
            name_en: self.name_en,
            description: self.description,
            credits: self.credits,
            prices: by_currency,
            is_popular: self.is_popular,
            is_active: self.is_active,
            sort_order: self.sort_order,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AccountRow {
    pub user_id: Uuid,
    pub remaining_credits: i64,
    pub has_unlimited_credits: bool,
}

impl From<AccountRow> for CreditAccount {
    fn from(row: AccountRow) -> Self {
        CreditAccount {
            user_id: row.user_id,
            remaining_credits: row.remaining_credits,
            has_unlimited_credits: row.has_unlimited_credits,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CreditApplicationRow {
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub credits_added: i64,
    pub unlimited: bool,
    pub applied_at: DateTime<Utc>,
}

impl From<CreditApplicationRow> for CreditApplication {
    fn from(row: CreditApplicationRow) -> Self {
        CreditApplication {
            transaction_id: row.transaction_id,
            user_id: row.user_id,
            credits_added: row.credits_added,
            unlimited: row.unlimited,
            applied_at: row.applied_at,
        }
    }
}
