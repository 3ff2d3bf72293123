//! Checkout initiation and the owner-facing reads around it.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::ledger::{LedgerService, TransitionSource};
use crate::config::BankTransferConfig;
use crate::domain::{
    BankAccount, CreditAccount, Currency, PaymentMethod, PricingPlan, Transaction,
    TransactionStatus,
};
use crate::error::AppError;
use crate::gateways::{CheckoutContext, GatewayRegistry, Initiation};
use crate::ports::{StoreError, TransactionFilter};

const HISTORY_LIMIT: i64 = 100;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub plan_id: String,
    pub currency: Currency,
    /// Required for bank transfers, ignored otherwise.
    pub bank_reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub success: bool,
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub payment_method: PaymentMethod,
    #[schema(value_type = String)]
    pub amount: BigDecimal,
    pub currency: Currency,
    pub credits: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_accounts: Option<Vec<BankAccount>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BankAccountsResponse {
    pub accounts: Vec<BankAccount>,
    pub instructions: String,
}

#[derive(Clone)]
pub struct CheckoutService {
    ledger: LedgerService,
    registry: GatewayRegistry,
    bank_transfer: Option<BankTransferConfig>,
    public_base_url: String,
}

impl CheckoutService {
    pub fn new(
        ledger: LedgerService,
        registry: GatewayRegistry,
        bank_transfer: Option<BankTransferConfig>,
        public_base_url: String,
    ) -> Self {
        Self {
            ledger,
            registry,
            bank_transfer,
            public_base_url,
        }
    }

    /// Validates the request, asks the gateway to start the payment and only then
    /// records the pending transaction. Any failure leaves no row behind.
    pub async fn checkout(
        &self,
        user_id: Uuid,
        method: PaymentMethod,
        request: CheckoutRequest,
    ) -> Result<CheckoutResponse, AppError> {
        let gateway = self.registry.get(method).ok_or_else(|| {
            AppError::Validation(format!("payment method {method} is not available"))
        })?;

        let plan = match self.ledger.store().get_plan(request.plan_id.trim()).await {
            Ok(plan) => plan,
            Err(StoreError::NotFound) => {
                return Err(AppError::Validation(format!(
                    "unknown plan: {}",
                    request.plan_id
                )))
            }
            Err(e) => return Err(e.into()),
        };
        if !plan.is_active {
            return Err(AppError::Validation(format!(
                "plan {} is not available for purchase",
                plan.id
            )));
        }

        let quote = plan.quote(request.currency).ok_or_else(|| {
            AppError::Validation(format!(
                "plan {} has no price in {}",
                plan.id, request.currency
            ))
        })?;
        if !gateway.supports_currency(request.currency) {
            return Err(AppError::Validation(format!(
                "{method} does not accept {}",
                request.currency
            )));
        }

        let bank_reference = match method {
            PaymentMethod::BankTransfer => {
                let reference = request
                    .bank_reference
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .ok_or_else(|| {
                        AppError::Validation(
                            "bank_reference is required for bank transfers".to_string(),
                        )
                    })?;
                Some(reference.to_string())
            }
            _ => None,
        };

        let mut tx = Transaction::pending(user_id, quote, method, bank_reference);
        let ctx = CheckoutContext::for_transaction(&self.public_base_url, &tx);

        let initiation = gateway.initiate(&tx, &ctx).await.map_err(|e| {
            self.ledger
                .metrics()
                .gateway_errors
                .with_label_values(&[method.as_str(), "initiate"])
                .inc();
            tracing::warn!(
                transaction_id = %tx.id,
                payment_method = %method,
                error = %e,
                "Checkout initiation failed"
            );
            AppError::from(e)
        })?;

        let (checkout_url, bank_accounts, instructions) = match initiation {
            Initiation::Redirect {
                checkout_url,
                external_reference,
            } => {
                tx.external_reference = Some(external_reference);
                (Some(checkout_url), None, None)
            }
            Initiation::Manual {
                accounts,
                instructions,
            } => (None, Some(accounts), Some(instructions)),
        };

        self.ledger.open(&tx).await?;

        Ok(CheckoutResponse {
            success: true,
            transaction_id: tx.id,
            status: tx.status,
            payment_method: tx.payment_method,
            amount: tx.amount,
            currency: tx.currency,
            credits: tx.credits_to_add,
            checkout_url,
            bank_accounts,
            instructions,
        })
    }

    /// Owner cancellation. Gateway methods abandon the hosted session first; if the
    /// gateway refuses, the transaction stays pending.
    pub async fn cancel_by_owner(&self, user_id: Uuid, id: Uuid) -> Result<Transaction, AppError> {
        let tx = self.owned_transaction(user_id, id).await?;
        if tx.is_terminal() {
            return Err(AppError::Conflict(format!("transaction is already {}", tx.status)));
        }

        if let Some(gateway) = self.registry.get(tx.payment_method) {
            gateway.cancel(&tx).await.map_err(|e| {
                self.ledger
                    .metrics()
                    .gateway_errors
                    .with_label_values(&[tx.payment_method.as_str(), "cancel"])
                    .inc();
                tracing::warn!(transaction_id = %tx.id, error = %e, "Gateway refused cancellation");
                AppError::from(e)
            })?;
        }

        let finalized = self
            .ledger
            .cancel(
                tx.id,
                Some("cancelled by user".to_string()),
                TransitionSource::Owner,
            )
            .await?;
        Ok(finalized.transaction)
    }

    /// A transaction visible to `user_id`. Other users' transactions read as missing.
    pub async fn owned_transaction(&self, user_id: Uuid, id: Uuid) -> Result<Transaction, AppError> {
        match self.ledger.store().get_transaction(id).await {
            Ok(tx) if tx.user_id == user_id => Ok(tx),
            Ok(_) | Err(StoreError::NotFound) => {
                Err(AppError::NotFound(format!("transaction {id} not found")))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn history(&self, user_id: Uuid) -> Result<Vec<Transaction>, AppError> {
        let filter = TransactionFilter {
            user_id: Some(user_id),
            limit: Some(HISTORY_LIMIT),
            ..Default::default()
        };
        Ok(self.ledger.store().list_transactions(&filter).await?)
    }

    pub async fn account(&self, user_id: Uuid) -> Result<CreditAccount, AppError> {
        Ok(self.ledger.store().get_account(user_id).await?)
    }

    pub async fn active_plans(&self) -> Result<Vec<PricingPlan>, AppError> {
        Ok(self.ledger.store().list_plans(true).await?)
    }

    pub fn bank_accounts(&self, currency: Option<Currency>) -> Result<BankAccountsResponse, AppError> {
        let bank = self
            .bank_transfer
            .as_ref()
            .ok_or_else(|| AppError::NotFound("bank transfers are disabled".to_string()))?;

        Ok(BankAccountsResponse {
            accounts: bank
                .accounts
                .iter()
                .filter(|a| currency.map_or(true, |c| a.currency == c))
                .cloned()
                .collect(),
            instructions: bank.instructions.clone(),
        })
    }
}
