use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::transaction::Currency;

pub const DEFAULT_ACCOUNT_HOLDER: &str = "IZE Case Resolver Ltd. Şti.";

pub const DEFAULT_INSTRUCTIONS: &str = "Transfer the exact amount to the account matching your currency \
and write your transfer reference in the description. After making the payment, please upload the receipt.";

/// A destination account for manual transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BankAccount {
    pub id: String,
    pub currency: Currency,
    pub iban: String,
    pub bank_name: String,
    pub account_holder: String,
}

impl BankAccount {
    pub fn defaults() -> Vec<BankAccount> {
        vec![
            BankAccount {
                id: "bank_try".to_string(),
                currency: Currency::Try,
                iban: "TR00 0000 0000 0000 0000 0000 01".to_string(),
                bank_name: "Ziraat Bankası".to_string(),
                account_holder: DEFAULT_ACCOUNT_HOLDER.to_string(),
            },
            BankAccount {
                id: "bank_usd".to_string(),
                currency: Currency::Usd,
                iban: "TR00 0000 0000 0000 0000 0000 02".to_string(),
                bank_name: "Garanti BBVA".to_string(),
                account_holder: DEFAULT_ACCOUNT_HOLDER.to_string(),
            },
            BankAccount {
                id: "bank_eur".to_string(),
                currency: Currency::Eur,
                iban: "TR00 0000 0000 0000 0000 0000 03".to_string(),
                bank_name: "İş Bankası".to_string(),
                account_holder: DEFAULT_ACCOUNT_HOLDER.to_string(),
            },
        ]
    }
}
