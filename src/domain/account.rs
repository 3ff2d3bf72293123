use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::plan::PlanType;
use super::transaction::Transaction;

/// Credit yields at or above this value mean "unlimited".
pub const UNLIMITED_CREDITS_THRESHOLD: i64 = 9999;

/// Per-user balance. Never decremented here; consumption happens elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CreditAccount {
    pub user_id: Uuid,
    pub remaining_credits: i64,
    pub has_unlimited_credits: bool,
}

impl CreditAccount {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            remaining_credits: 0,
            has_unlimited_credits: false,
        }
    }

    pub fn apply(&mut self, grant: CreditGrant) {
        match grant {
            CreditGrant::Unlimited => self.has_unlimited_credits = true,
            CreditGrant::Credits(n) => {
                self.remaining_credits = self.remaining_credits.saturating_add(n)
            }
        }
    }
}

/// The effect a completed purchase (or an administrator override) has on an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "credits", rename_all = "snake_case")]
pub enum CreditGrant {
    Credits(i64),
    Unlimited,
}

impl CreditGrant {
    pub fn for_transaction(tx: &Transaction) -> Self {
        if tx.package_type == PlanType::Subscription
            || tx.credits_to_add >= UNLIMITED_CREDITS_THRESHOLD
        {
            Self::Unlimited
        } else {
            Self::Credits(tx.credits_to_add)
        }
    }

    /// Credits added to `remaining_credits`; zero for an unlimited grant.
    pub fn credits(&self) -> i64 {
        match self {
            Self::Credits(n) => *n,
            Self::Unlimited => 0,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited)
    }
}
