//! Transaction domain entity.
//! Framework-agnostic representation of one purchase attempt and its lifecycle.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use super::plan::{PlanQuote, PlanType};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Settlement currency. Amounts are always interpreted in the currency stored on the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Try,
    Usd,
    Eur,
}

impl Currency {
    pub const ALL: [Currency; 3] = [Currency::Try, Currency::Usd, Currency::Eur];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Try => "TRY",
            Self::Usd => "USD",
            Self::Eur => "EUR",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TRY" => Ok(Self::Try),
            "USD" => Ok(Self::Usd),
            "EUR" => Ok(Self::Eur),
            _ => Err(ParseEnumError::new("currency", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    GatewayA,
    GatewayB,
    BankTransfer,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 3] = [
        PaymentMethod::GatewayA,
        PaymentMethod::GatewayB,
        PaymentMethod::BankTransfer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GatewayA => "gateway_a",
            Self::GatewayB => "gateway_b",
            Self::BankTransfer => "bank_transfer",
        }
    }

    /// Automatic methods are confirmed by an external provider; the manual one by an administrator.
    pub fn is_gateway(&self) -> bool {
        !matches!(self, Self::BankTransfer)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = ParseEnumError;

    /// Accepts both the wire form (`bank_transfer`) and the URL form (`bank-transfer`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "gateway_a" => Ok(Self::GatewayA),
            "gateway_b" => Ok(Self::GatewayB),
            "bank_transfer" => Ok(Self::BankTransfer),
            _ => Err(ParseEnumError::new("payment method", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("transaction cannot move from {from} to {to}")]
pub struct TransitionError {
    pub from: TransactionStatus,
    pub to: TransactionStatus,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 4] = [
        TransactionStatus::Pending,
        TransactionStatus::Completed,
        TransactionStatus::Failed,
        TransactionStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// The only legal edges are `pending -> {completed, failed, cancelled}`.
    /// Terminal states are absorbing, and re-entering `pending` is never allowed.
    pub fn transition(self, to: TransactionStatus) -> Result<TransactionStatus, TransitionError> {
        match (self, to) {
            (Self::Pending, next) if next.is_terminal() => Ok(next),
            (from, to) => Err(TransitionError { from, to }),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(ParseEnumError::new("transaction status", s)),
        }
    }
}

/// Domain entity representing a purchase attempt.
///
/// `amount`, `currency` and `credits_to_add` are a snapshot of the plan taken at creation
/// time. Nothing after construction writes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: String,
    pub package_type: PlanType,
    #[schema(value_type = String)]
    pub amount: BigDecimal,
    pub currency: Currency,
    pub payment_method: PaymentMethod,
    pub external_reference: Option<String>,
    pub bank_reference: Option<String>,
    pub credits_to_add: i64,
    pub status: TransactionStatus,
    pub resolution_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Builds a new `pending` transaction from a priced plan quote.
    pub fn pending(
        user_id: Uuid,
        quote: PlanQuote,
        payment_method: PaymentMethod,
        bank_reference: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            plan_id: quote.plan_id,
            package_type: quote.plan_type,
            amount: quote.amount,
            currency: quote.currency,
            payment_method,
            external_reference: None,
            bank_reference,
            credits_to_add: quote.credits,
            status: TransactionStatus::Pending,
            resolution_note: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn quote() -> PlanQuote {
        PlanQuote {
            plan_id: "pro".to_string(),
            plan_type: PlanType::Package,
            amount: BigDecimal::from(400),
            currency: Currency::Try,
            credits: 50,
        }
    }

    #[test]
    fn test_pending_snapshot() {
        let user_id = Uuid::new_v4();
        let tx = Transaction::pending(user_id, quote(), PaymentMethod::GatewayA, None);

        assert_eq!(tx.user_id, user_id);
        assert_eq!(tx.plan_id, "pro");
        assert_eq!(tx.amount, BigDecimal::from(400));
        assert_eq!(tx.currency, Currency::Try);
        assert_eq!(tx.credits_to_add, 50);
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(tx.external_reference.is_none());
        assert!(tx.completed_at.is_none());
        assert!(!tx.is_terminal());
    }

    #[test]
    fn test_pending_ids_are_unique() {
        let a = Transaction::pending(Uuid::new_v4(), quote(), PaymentMethod::GatewayA, None);
        let b = Transaction::pending(Uuid::new_v4(), quote(), PaymentMethod::GatewayA, None);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_pending_to_terminal_is_allowed() {
        for to in [
            TransactionStatus::Completed,
            TransactionStatus::Failed,
            TransactionStatus::Cancelled,
        ] {
            assert_eq!(TransactionStatus::Pending.transition(to), Ok(to));
        }
    }

    #[test]
    fn test_pending_to_pending_is_rejected() {
        assert!(TransactionStatus::Pending
            .transition(TransactionStatus::Pending)
            .is_err());
    }

    #[test]
    fn test_payment_method_parsing() {
        assert_eq!("bank-transfer".parse(), Ok(PaymentMethod::BankTransfer));
        assert_eq!("bank_transfer".parse(), Ok(PaymentMethod::BankTransfer));
        assert_eq!("Gateway_A".parse(), Ok(PaymentMethod::GatewayA));
        assert!("stripe".parse::<PaymentMethod>().is_err());
    }

    #[test]
    fn test_currency_serde_uses_iso_codes() {
        assert_eq!(serde_json::to_string(&Currency::Try).unwrap(), "\"TRY\"");
        let parsed: Currency = serde_json::from_str("\"EUR\"").unwrap();
        assert_eq!(parsed, Currency::Eur);
        assert_eq!("usd".parse(), Ok(Currency::Usd));
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in TransactionStatus::ALL {
            assert_eq!(status.as_str().parse(), Ok(status));
        }
    }

    fn any_status() -> impl Strategy<Value = TransactionStatus> {
        prop_oneof![
            Just(TransactionStatus::Pending),
            Just(TransactionStatus::Completed),
            Just(TransactionStatus::Failed),
            Just(TransactionStatus::Cancelled),
        ]
    }

    proptest! {
        #[test]
        fn terminal_states_never_regress(path in proptest::collection::vec(any_status(), 1..12)) {
            let mut current = TransactionStatus::Pending;
            let mut reached_terminal: Option<TransactionStatus> = None;

            for next in path {
                match current.transition(next) {
                    Ok(new_status) => {
                        prop_assert!(reached_terminal.is_none());
                        current = new_status;
                        reached_terminal = Some(new_status);
                    }
                    Err(err) => {
                        prop_assert_eq!(err.from, current);
                    }
                }
            }

            if let Some(terminal) = reached_terminal {
                prop_assert_eq!(current, terminal);
            }
        }
    }
}
