//! Transaction ledger service.
//!
//! Every transition out of `pending` goes through `LedgerService`, and
//! `apply_credit` is the one operation that increases a credit balance for a
//! purchase. The store performs the compare-and-set and the credit in a single
//! atomic unit; this layer adds logging, metrics and notifications.

use std::sync::Arc;
use uuid::Uuid;

use super::notifier::{Notifier, PaymentEvent};
use crate::domain::{CreditAccount, CreditGrant, Transaction};
use crate::metrics::PaymentMetrics;
use crate::ports::{Finalized, LedgerStore, Resolution, StoreError};

/// Who drove a transition. Used for logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionSource {
    Callback,
    Poll,
    Sweep,
    Admin,
    Owner,
}

impl TransitionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Callback => "callback",
            Self::Poll => "poll",
            Self::Sweep => "sweep",
            Self::Admin => "admin",
            Self::Owner => "owner",
        }
    }
}

#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    notifier: Notifier,
    metrics: PaymentMetrics,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Notifier, metrics: PaymentMetrics) -> Self {
        Self {
            store,
            notifier,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn metrics(&self) -> &PaymentMetrics {
        &self.metrics
    }

    /// Records a new pending transaction.
    pub async fn open(&self, tx: &Transaction) -> Result<(), StoreError> {
        self.store.insert_transaction(tx).await?;

        self.metrics
            .transactions_created
            .with_label_values(&[tx.payment_method.as_str()])
            .inc();
        tracing::info!(
            transaction_id = %tx.id,
            user_id = %tx.user_id,
            payment_method = %tx.payment_method,
            plan_id = %tx.plan_id,
            amount = %tx.amount,
            currency = %tx.currency,
            status = %tx.status,
            "Transaction created"
        );
        self.notifier.publish(PaymentEvent::transaction(tx, None));
        Ok(())
    }

    /// The Crediting Operation: `pending -> completed` plus the credit, once.
    pub async fn apply_credit(
        &self,
        id: Uuid,
        external_reference: Option<String>,
        source: TransitionSource,
    ) -> Result<Finalized, StoreError> {
        self.finish(id, Resolution::Completed { external_reference }, source)
            .await
    }

    pub async fn fail(
        &self,
        id: Uuid,
        note: Option<String>,
        source: TransitionSource,
    ) -> Result<Finalized, StoreError> {
        self.finish(id, Resolution::Failed { note }, source).await
    }

    pub async fn cancel(
        &self,
        id: Uuid,
        note: Option<String>,
        source: TransitionSource,
    ) -> Result<Finalized, StoreError> {
        self.finish(id, Resolution::Cancelled { note }, source).await
    }

    /// Administrator override outside any transaction.
    pub async fn grant_override(
        &self,
        user_id: Uuid,
        grant: CreditGrant,
        reason: Option<&str>,
    ) -> Result<CreditAccount, StoreError> {
        let account = self.store.grant_credits(user_id, grant, reason).await?;
        tracing::info!(
            user_id = %user_id,
            credits = grant.credits(),
            unlimited = grant.is_unlimited(),
            reason = reason.unwrap_or(""),
            "Credit override applied"
        );
        self.notifier.publish(PaymentEvent::balance(&account));
        Ok(account)
    }

    async fn finish(
        &self,
        id: Uuid,
        resolution: Resolution,
        source: TransitionSource,
    ) -> Result<Finalized, StoreError> {
        let target = resolution.status();

        match self.store.finalize(id, resolution).await {
            Ok(finalized) => {
                let tx = &finalized.transaction;
                self.metrics
                    .transitions
                    .with_label_values(&[tx.status.as_str(), tx.payment_method.as_str()])
                    .inc();
                tracing::info!(
                    transaction_id = %tx.id,
                    status = %tx.status,
                    payment_method = %tx.payment_method,
                    source = source.as_str(),
                    "Transaction finalized"
                );

                if let Some(application) = &finalized.application {
                    self.metrics.credits_applied.inc();
                    tracing::info!(
                        transaction_id = %tx.id,
                        user_id = %application.user_id,
                        credits = application.credits_added,
                        unlimited = application.unlimited,
                        "Credits applied"
                    );
                }

                self.notifier.publish(PaymentEvent::transaction(
                    tx,
                    finalized.account.as_ref(),
                ));
                Ok(finalized)
            }
            Err(StoreError::Conflict { current }) => {
                self.metrics
                    .conflicts
                    .with_label_values(&[source.as_str()])
                    .inc();
                tracing::warn!(
                    transaction_id = %id,
                    current = %current,
                    attempted = %target,
                    source = source.as_str(),
                    "Rejected transition of a terminal transaction"
                );
                Err(StoreError::Conflict { current })
            }
            Err(e) => {
                tracing::error!(transaction_id = %id, error = %e, "Failed to finalize transaction");
                Err(e)
            }
        }
    }
}
