use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use super::transaction::{Currency, ParseEnumError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Package,
    Subscription,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::Subscription => "subscription",
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "package" => Ok(Self::Package),
            "subscription" => Ok(Self::Subscription),
            _ => Err(ParseEnumError {
                kind: "plan type",
                value: s.to_string(),
            }),
        }
    }
}

/// A purchasable offering. A plan may be priced in only some currencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PricingPlan {
    pub id: String,
    pub name: String,
    pub name_en: Option<String>,
    pub description: Option<String>,
    pub plan_type: PlanType,
    pub credits: i64,
    #[schema(value_type = Object)]
    pub prices: BTreeMap<Currency, BigDecimal>,
    pub is_popular: bool,
    pub is_active: bool,
    pub sort_order: i32,
}

/// Point-in-time price and yield for one currency of a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanQuote {
    pub plan_id: String,
    pub plan_type: PlanType,
    pub amount: BigDecimal,
    pub currency: Currency,
    pub credits: i64,
}

impl PricingPlan {
    pub fn price(&self, currency: Currency) -> Option<&BigDecimal> {
        self.prices.get(&currency)
    }

    /// Returns `None` when the plan carries no price for `currency`.
    pub fn quote(&self, currency: Currency) -> Option<PlanQuote> {
        self.price(currency).map(|amount| PlanQuote {
            plan_id: self.id.clone(),
            plan_type: self.plan_type,
            amount: amount.clone(),
            currency,
            credits: self.credits,
        })
    }

    /// True when the two plans differ in anything a past purchase depends on.
    pub fn differs_structurally(&self, other: &PricingPlan) -> bool {
        self.plan_type != other.plan_type
            || self.credits != other.credits
            || self.prices != other.prices
    }

    /// Catalog shipped with a fresh install.
    pub fn defaults() -> Vec<PricingPlan> {
        fn prices(entries: [(Currency, i64); 3]) -> BTreeMap<Currency, BigDecimal> {
            entries
                .into_iter()
                .map(|(currency, amount)| (currency, BigDecimal::from(amount)))
                .collect()
        }

        vec![
            PricingPlan {
                id: "starter".to_string(),
                name: "Başlangıç Paketi".to_string(),
                name_en: Some("Starter Package".to_string()),
                description: Some("10 analysis credits".to_string()),
                plan_type: PlanType::Package,
                credits: 10,
                prices: prices([(Currency::Try, 100), (Currency::Usd, 5), (Currency::Eur, 5)]),
                is_popular: false,
                is_active: true,
                sort_order: 1,
            },
            PricingPlan {
                id: "pro".to_string(),
                name: "Profesyonel Paket".to_string(),
                name_en: Some("Professional Package".to_string()),
                description: Some("50 analysis credits".to_string()),
                plan_type: PlanType::Package,
                credits: 50,
                prices: prices([(Currency::Try, 400), (Currency::Usd, 20), (Currency::Eur, 18)]),
                is_popular: true,
                is_active: true,
                sort_order: 2,
            },
            PricingPlan {
                id: "enterprise".to_string(),
                name: "Kurumsal Paket".to_string(),
                name_en: Some("Enterprise Package".to_string()),
                description: Some("200 analysis credits".to_string()),
                plan_type: PlanType::Package,
                credits: 200,
                prices: prices([(Currency::Try, 1400), (Currency::Usd, 70), (Currency::Eur, 65)]),
                is_popular: false,
                is_active: true,
                sort_order: 3,
            },
            PricingPlan {
                id: "unlimited_monthly".to_string(),
                name: "Sınırsız Abonelik".to_string(),
                name_en: Some("Unlimited Subscription".to_string()),
                description: Some("Unlimited analyses".to_string()),
                plan_type: PlanType::Subscription,
                credits: super::account::UNLIMITED_CREDITS_THRESHOLD,
                prices: prices([(Currency::Try, 2500), (Currency::Usd, 125), (Currency::Eur, 115)]),
                is_popular: false,
                is_active: true,
                sort_order: 4,
            },
        ]
    }
}
