use async_trait::async_trait;
use axum::http::HeaderMap;

use super::{CallbackEvent, CheckoutContext, GatewayError, GatewayOutcome, Initiation, PaymentGateway};
use crate::domain::{BankAccount, Currency, PaymentMethod, Transaction};

/// Manual method. Nothing external confirms these; an administrator does.
pub struct BankTransferGateway {
    accounts: Vec<BankAccount>,
    instructions: String,
}

impl BankTransferGateway {
    pub fn new(accounts: Vec<BankAccount>, instructions: String) -> Self {
        Self {
            accounts,
            instructions,
        }
    }

    pub fn accounts_for(&self, currency: Currency) -> Vec<BankAccount> {
        self.accounts
            .iter()
            .filter(|a| a.currency == currency)
            .cloned()
            .collect()
    }

    pub fn accounts(&self) -> &[BankAccount] {
        &self.accounts
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }
}

#[async_trait]
impl PaymentGateway for BankTransferGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::BankTransfer
    }

    fn supports_currency(&self, currency: Currency) -> bool {
        self.accounts.iter().any(|a| a.currency == currency)
    }

    async fn initiate(
        &self,
        tx: &Transaction,
        _ctx: &CheckoutContext,
    ) -> Result<Initiation, GatewayError> {
        let has_reference = tx
            .bank_reference
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty());
        if !has_reference {
            return Err(GatewayError::Validation(
                "bank_reference is required for bank transfers".to_string(),
            ));
        }

        let accounts = self.accounts_for(tx.currency);
        if accounts.is_empty() {
            return Err(GatewayError::Validation(format!(
                "no bank account accepts {}",
                tx.currency
            )));
        }

        Ok(Initiation::Manual {
            accounts,
            instructions: self.instructions.clone(),
        })
    }

    async fn query_status(&self, _tx: &Transaction) -> Result<GatewayOutcome, GatewayError> {
        Ok(GatewayOutcome::Pending)
    }

    async fn cancel(&self, _tx: &Transaction) -> Result<(), GatewayError> {
        Ok(())
    }

    fn parse_callback(
        &self,
        _headers: &HeaderMap,
        _body: &[u8],
    ) -> Result<Option<CallbackEvent>, GatewayError> {
        Err(GatewayError::Unsupported("bank_transfer"))
    }
}
