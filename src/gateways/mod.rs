//! Payment gateway adapters.
//!
//! Every payment method sits behind `PaymentGateway`, and services pick an adapter
//! from the `GatewayRegistry` by `PaymentMethod`. Adding a method means adding an
//! adapter and registering it; the ledger and crediting code do not change.

pub mod bank_transfer;
pub mod gateway_a;
pub mod gateway_b;
pub mod http;
pub mod signature;

pub use bank_transfer::BankTransferGateway;
pub use gateway_a::GatewayAClient;
pub use gateway_b::GatewayBClient;

use async_trait::async_trait;
use axum::http::HeaderMap;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;
use crate::domain::{BankAccount, Currency, PaymentMethod, Transaction, TransactionStatus};

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected payload from gateway: {0}")]
    UnexpectedPayload(String),
    #[error("gateway rejected the request: {0}")]
    Rejected(String),
    #[error("Circuit breaker open - gateway unavailable")]
    CircuitBreakerOpen,
    #[error("invalid callback signature")]
    InvalidSignature,
    #[error("operation not supported by {0}")]
    Unsupported(&'static str),
    #[error("{0}")]
    Validation(String),
}

/// URLs the hosted checkout sends the payer back to, and where callbacks go.
#[derive(Debug, Clone)]
pub struct CheckoutContext {
    pub success_url: String,
    pub cancel_url: String,
    pub callback_url: String,
}

impl CheckoutContext {
    pub fn for_transaction(public_base_url: &str, tx: &Transaction) -> Self {
        let base = public_base_url.trim_end_matches('/');
        Self {
            success_url: format!("{base}/payment/success?transaction_id={}", tx.id),
            cancel_url: format!("{base}/payment/cancel?transaction_id={}", tx.id),
            callback_url: format!("{base}/payments/webhooks/{}", tx.payment_method),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Initiation {
    /// Hosted checkout: send the payer to `checkout_url`.
    Redirect {
        checkout_url: String,
        external_reference: String,
    },
    /// Manual transfer: the payer wires money to one of `accounts`.
    Manual {
        accounts: Vec<BankAccount>,
        instructions: String,
    },
}

/// What the external side says about a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    Completed,
    Failed(String),
    Cancelled(String),
    Pending,
}

impl GatewayOutcome {
    /// The stored outcome of an already terminal transaction.
    pub fn from_terminal(tx: &Transaction) -> Option<Self> {
        let note = || tx.resolution_note.clone().unwrap_or_default();
        match tx.status {
            TransactionStatus::Pending => None,
            TransactionStatus::Completed => Some(Self::Completed),
            TransactionStatus::Failed => Some(Self::Failed(note())),
            TransactionStatus::Cancelled => Some(Self::Cancelled(note())),
        }
    }
}

/// A verified callback, already mapped to an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackEvent {
    pub external_reference: String,
    pub outcome: GatewayOutcome,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn method(&self) -> PaymentMethod;

    fn supports_currency(&self, _currency: Currency) -> bool {
        true
    }

    /// Starts a payment for a freshly built pending transaction.
    async fn initiate(
        &self,
        tx: &Transaction,
        ctx: &CheckoutContext,
    ) -> Result<Initiation, GatewayError>;

    /// Asks the external system about a pending transaction.
    async fn query_status(&self, tx: &Transaction) -> Result<GatewayOutcome, GatewayError>;

    /// Idempotent resolve: a terminal transaction returns its stored state without
    /// any external call.
    async fn resolve(&self, tx: &Transaction) -> Result<GatewayOutcome, GatewayError> {
        if let Some(outcome) = GatewayOutcome::from_terminal(tx) {
            return Ok(outcome);
        }
        self.query_status(tx).await
    }

    /// Abandons the external session, if the method has one.
    async fn cancel(&self, tx: &Transaction) -> Result<(), GatewayError>;

    /// Verifies and decodes a callback. `Ok(None)` means the event is not relevant.
    fn parse_callback(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Option<CallbackEvent>, GatewayError>;
}

#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.method(), gateway);
        self
    }

    pub fn get(&self, method: PaymentMethod) -> Option<Arc<dyn PaymentGateway>> {
        self.gateways.get(&method).cloned()
    }

    pub fn methods(&self) -> Vec<PaymentMethod> {
        let mut methods: Vec<_> = self.gateways.keys().copied().collect();
        methods.sort();
        methods
    }

    /// Registers every adapter that is configured.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();

        if let Some(a) = &config.gateway_a {
            registry = registry.register(Arc::new(GatewayAClient::new(a.clone())));
        }
        if let Some(b) = &config.gateway_b {
            registry = registry.register(Arc::new(GatewayBClient::new(b.clone())));
        }
        if let Some(bank) = &config.bank_transfer {
            registry = registry.register(Arc::new(BankTransferGateway::new(
                bank.accounts.clone(),
                bank.instructions.clone(),
            )));
        }

        tracing::info!(methods = ?registry.methods(), "Payment methods enabled");
        registry
    }
}

/// Minor units (cents/kuruş) for a decimal amount.
pub(crate) fn minor_units(amount: &bigdecimal::BigDecimal) -> Result<i64, GatewayError> {
    use bigdecimal::ToPrimitive;

    (amount.clone() * bigdecimal::BigDecimal::from(100))
        .round(0)
        .to_i64()
        .ok_or_else(|| GatewayError::Validation(format!("amount {amount} is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PlanQuote, PlanType};
    use bigdecimal::BigDecimal;
    use std::str::FromStr;
    use uuid::Uuid;

    fn tx() -> Transaction {
        Transaction::pending(
            Uuid::new_v4(),
            PlanQuote {
                plan_id: "pro".to_string(),
                plan_type: PlanType::Package,
                amount: BigDecimal::from(400),
                currency: Currency::Try,
                credits: 50,
            },
            PaymentMethod::BankTransfer,
            Some("EFT-9931".to_string()),
        )
    }

    #[tokio::test]
    async fn test_resolve_terminal_returns_stored_state() {
        let gateway = BankTransferGateway::new(BankAccount::defaults(), "x".to_string());
        let mut tx = tx();
        tx.status = TransactionStatus::Failed;
        tx.resolution_note = Some("reference not found".to_string());

        let outcome = gateway.resolve(&tx).await.unwrap();
        assert_eq!(
            outcome,
            GatewayOutcome::Failed("reference not found".to_string())
        );
    }

    #[test]
    fn test_registry_lookup() {
        let registry = GatewayRegistry::new().register(Arc::new(BankTransferGateway::new(
            BankAccount::defaults(),
            "x".to_string(),
        )));
        assert!(registry.get(PaymentMethod::BankTransfer).is_some());
        assert!(registry.get(PaymentMethod::GatewayA).is_none());
        assert_eq!(registry.methods(), vec![PaymentMethod::BankTransfer]);
    }

    #[test]
    fn test_checkout_context_urls() {
        let tx = tx();
        let ctx = CheckoutContext::for_transaction("https://app.test/", &tx);
        assert_eq!(
            ctx.success_url,
            format!("https://app.test/payment/success?transaction_id={}", tx.id)
        );
        assert_eq!(
            ctx.callback_url,
            "https://app.test/payments/webhooks/bank_transfer"
        );
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(minor_units(&BigDecimal::from(400)).unwrap(), 40_000);
        assert_eq!(
            minor_units(&BigDecimal::from_str("19.99").unwrap()).unwrap(),
            1999
        );
    }
}
