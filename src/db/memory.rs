//! Process-local ledger used in development and tests.
//!
//! A single mutex guards every map, so the compare-and-set in `finalize` and the
//! credit application happen under one critical section.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::domain::{
    CreditAccount, CreditGrant, PaymentMethod, PricingPlan, Transaction, TransactionStatus,
};
use crate::ports::{
    sort_plans, CreditApplication, Finalized, LedgerAnalytics, LedgerStore, Resolution,
    StoreError, TransactionFilter,
};

#[derive(Default)]
struct State {
    transactions: HashMap<Uuid, Transaction>,
    accounts: HashMap<Uuid, CreditAccount>,
    applications: HashMap<Uuid, CreditApplication>,
    plans: HashMap<String, PricingPlan>,
    overrides: Vec<(Uuid, CreditGrant, Option<String>)>,
}

#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<State>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger pre-loaded with the default plan catalog.
    pub fn with_default_plans() -> Self {
        let ledger = Self::new();
        if let Ok(mut state) = ledger.state.lock() {
            for plan in PricingPlan::defaults() {
                state.plans.insert(plan.id.clone(), plan);
            }
        }
        ledger
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Internal("ledger mutex poisoned".to_string()))
    }

    /// Number of credit applications recorded so far.
    pub fn credit_application_count(&self) -> usize {
        self.state().map(|s| s.applications.len()).unwrap_or(0)
    }

    /// Number of administrator overrides recorded so far.
    pub fn override_count(&self) -> usize {
        self.state().map(|s| s.overrides.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        let mut state = self.state()?;

        if state.transactions.contains_key(&tx.id) {
            return Err(StoreError::Duplicate("transaction".to_string()));
        }
        if let Some(reference) = &tx.external_reference {
            let taken = state.transactions.values().any(|t| {
                t.payment_method == tx.payment_method
                    && t.external_reference.as_deref() == Some(reference.as_str())
            });
            if taken {
                return Err(StoreError::Duplicate("transaction".to_string()));
            }
        }

        state.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Transaction, StoreError> {
        self.state()?
            .transactions
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn find_by_external_reference(
        &self,
        method: PaymentMethod,
        external_reference: &str,
    ) -> Result<Transaction, StoreError> {
        self.state()?
            .transactions
            .values()
            .find(|t| {
                t.payment_method == method
                    && t.external_reference.as_deref() == Some(external_reference)
            })
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state()?;
        let mut items: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            items.truncate(limit.max(0) as usize);
        }
        Ok(items)
    }

    async fn pending_gateway_transactions(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state()?;
        let mut items: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|t| {
                t.status == TransactionStatus::Pending
                    && t.payment_method.is_gateway()
                    && t.created_at < older_than
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }

    async fn finalize(&self, id: Uuid, resolution: Resolution) -> Result<Finalized, StoreError> {
        let mut state = self.state()?;
        let state = &mut *state;

        let tx = state.transactions.get_mut(&id).ok_or(StoreError::NotFound)?;
        let next = tx
            .status
            .transition(resolution.status())
            .map_err(|e| StoreError::Conflict { current: e.from })?;
        if next == TransactionStatus::Completed && state.applications.contains_key(&id) {
            return Err(StoreError::Duplicate("credit application".to_string()));
        }

        let now = Utc::now();
        tx.status = next;
        tx.updated_at = now;
        match &resolution {
            Resolution::Completed { external_reference } => {
                if external_reference.is_some() {
                    tx.external_reference = external_reference.clone();
                }
                tx.completed_at = Some(now);
            }
            Resolution::Failed { note } | Resolution::Cancelled { note } => {
                if note.is_some() {
                    tx.resolution_note = note.clone();
                }
            }
        }
        let transaction = tx.clone();

        if next != TransactionStatus::Completed {
            return Ok(Finalized {
                transaction,
                account: None,
                application: None,
            });
        }

        let grant = CreditGrant::for_transaction(&transaction);
        let application = CreditApplication {
            transaction_id: id,
            user_id: transaction.user_id,
            credits_added: grant.credits(),
            unlimited: grant.is_unlimited(),
            applied_at: now,
        };
        state.applications.insert(id, application.clone());

        let account = state
            .accounts
            .entry(transaction.user_id)
            .or_insert_with(|| CreditAccount::empty(transaction.user_id));
        account.apply(grant);
        let account = account.clone();

        Ok(Finalized {
            transaction,
            account: Some(account),
            application: Some(application),
        })
    }

    async fn credit_application(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<CreditApplication>, StoreError> {
        Ok(self.state()?.applications.get(&transaction_id).cloned())
    }

    async fn get_account(&self, user_id: Uuid) -> Result<CreditAccount, StoreError> {
        Ok(self
            .state()?
            .accounts
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| CreditAccount::empty(user_id)))
    }

    async fn grant_credits(
        &self,
        user_id: Uuid,
        grant: CreditGrant,
        reason: Option<&str>,
    ) -> Result<CreditAccount, StoreError> {
        let mut state = self.state()?;
        state
            .overrides
            .push((user_id, grant, reason.map(str::to_string)));

        let account = state
            .accounts
            .entry(user_id)
            .or_insert_with(|| CreditAccount::empty(user_id));
        account.apply(grant);
        Ok(account.clone())
    }

    async fn get_plan(&self, id: &str) -> Result<PricingPlan, StoreError> {
        self.state()?
            .plans
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_plans(&self, active_only: bool) -> Result<Vec<PricingPlan>, StoreError> {
        let mut plans: Vec<PricingPlan> = self
            .state()?
            .plans
            .values()
            .filter(|p| !active_only || p.is_active)
            .cloned()
            .collect();
        sort_plans(&mut plans);
        Ok(plans)
    }

    async fn insert_plan(&self, plan: &PricingPlan) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.plans.contains_key(&plan.id) {
            return Err(StoreError::Duplicate("plan".to_string()));
        }
        state.plans.insert(plan.id.clone(), plan.clone());
        Ok(())
    }

    async fn update_plan(&self, plan: &PricingPlan) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let existing = state.plans.get_mut(&plan.id).ok_or(StoreError::NotFound)?;
        *existing = plan.clone();
        Ok(())
    }

    async fn plan_has_completed_sales(&self, plan_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .state()?
            .transactions
            .values()
            .any(|t| t.plan_id == plan_id && t.status == TransactionStatus::Completed))
    }

    async fn analytics(&self) -> Result<LedgerAnalytics, StoreError> {
        let state = self.state()?;
        let mut stats = LedgerAnalytics::zeroed();

        for tx in state.transactions.values() {
            *stats.by_status.entry(tx.status).or_insert(0) += 1;
            *stats.by_method.entry(tx.payment_method).or_insert(0) += 1;
            if tx.status == TransactionStatus::Completed {
                *stats.revenue_by_currency.entry(tx.currency).or_default() += &tx.amount;
            }
        }
        stats.total_transactions = state.transactions.len() as i64;

        Ok(stats)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.state().map(|_| ())
    }
}
