pub mod account;
pub mod bank;
pub mod plan;
pub mod transaction;

pub use account::{CreditAccount, CreditGrant, UNLIMITED_CREDITS_THRESHOLD};
pub use bank::BankAccount;
pub use plan::{PlanQuote, PlanType, PricingPlan};
pub use transaction::{
    Currency, ParseEnumError, PaymentMethod, Transaction, TransactionStatus, TransitionError,
};
