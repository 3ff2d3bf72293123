//! Drives pending gateway transactions to a terminal state.
//!
//! Three inputs reach the same code path: gateway callbacks, client status
//! polling and the background sweep. All of them end in `LedgerService`, so a
//! late or duplicate signal is rejected by the ledger's compare-and-set rather
//! than overwriting what is already recorded.

use axum::http::HeaderMap;
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::ledger::{LedgerService, TransitionSource};
use crate::config::{PollPolicy, ReconcileSettings};
use crate::domain::{PaymentMethod, Transaction, TransactionStatus};
use crate::error::AppError;
use crate::gateways::{GatewayOutcome, GatewayRegistry};
use crate::ports::{Finalized, StoreError};

/// Result of one reconciliation attempt.
#[derive(Debug, Clone)]
pub enum Reconciled {
    /// This attempt moved the transaction out of `pending`.
    Transitioned(Transaction),
    /// Someone else already resolved it; the stored state is returned.
    AlreadyTerminal(Transaction),
    /// The gateway reports a successful payment for a transaction that is
    /// already failed or cancelled. Needs manual review.
    PaidAfterTerminal(Transaction),
    StillPending(Transaction),
}

impl Reconciled {
    pub fn transaction(&self) -> &Transaction {
        match self {
            Self::Transitioned(tx)
            | Self::AlreadyTerminal(tx)
            | Self::PaidAfterTerminal(tx)
            | Self::StillPending(tx) => tx,
        }
    }

    pub fn into_transaction(self) -> Transaction {
        match self {
            Self::Transitioned(tx)
            | Self::AlreadyTerminal(tx)
            | Self::PaidAfterTerminal(tx)
            | Self::StillPending(tx) => tx,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CallbackResult {
    Applied,
    Duplicate,
    /// Payment succeeded after the transaction was failed or cancelled.
    PaidAfterTerminal,
    Ignored,
}

/// What the client sees when it asks about a transaction.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentStatus {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub payment_method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits_added: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlimited: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub transitioned: usize,
    pub already_terminal: usize,
    pub paid_after_terminal: usize,
    pub still_pending: usize,
    pub errors: usize,
}

#[derive(Clone)]
pub struct ReconciliationService {
    ledger: LedgerService,
    registry: GatewayRegistry,
}

impl ReconciliationService {
    pub fn new(ledger: LedgerService, registry: GatewayRegistry) -> Self {
        Self { ledger, registry }
    }

    /// One resolve attempt. Gateway errors are logged and reported as still pending.
    pub async fn resolve(&self, id: Uuid, source: TransitionSource) -> Result<Reconciled, AppError> {
        let tx = self.ledger.store().get_transaction(id).await.map_err(|e| match e {
            StoreError::NotFound => AppError::NotFound(format!("transaction {id} not found")),
            other => other.into(),
        })?;

        match self.check(tx.clone(), source).await {
            Err(AppError::ExternalGateway(_)) => Ok(Reconciled::StillPending(tx)),
            other => other,
        }
    }

    /// Bounded polling: at most `policy.max_attempts` resolve attempts with a
    /// doubling backoff between them. Exhaustion returns the pending transaction.
    pub async fn poll_status(&self, id: Uuid, policy: &PollPolicy) -> Result<Reconciled, AppError> {
        let attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let result = self.resolve(id, TransitionSource::Poll).await?;
            attempt += 1;

            let keep_polling = matches!(&result, Reconciled::StillPending(tx) if tx.payment_method.is_gateway());
            if !keep_polling || attempt >= attempts {
                if keep_polling {
                    debug!(transaction_id = %id, attempts = attempt, "Status polling exhausted, still pending");
                }
                return Ok(result);
            }

            sleep(policy.backoff_for(attempt - 1)).await;
        }
    }

    /// Verifies a gateway callback and applies its outcome.
    ///
    /// An unknown external reference is a `NotFound` so the provider retries
    /// delivery; a callback for an already resolved transaction is a duplicate.
    pub async fn apply_callback(
        &self,
        method: PaymentMethod,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<CallbackResult, AppError> {
        let gateway = self
            .registry
            .get(method)
            .ok_or_else(|| AppError::NotFound(format!("payment method {method} is not enabled")))?;

        let event = match gateway.parse_callback(headers, body) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!(payment_method = %method, "Ignoring irrelevant callback event");
                return Ok(CallbackResult::Ignored);
            }
            Err(e) => {
                warn!(payment_method = %method, error = %e, "Rejected gateway callback");
                return Err(e.into());
            }
        };

        let tx = self
            .ledger
            .store()
            .find_by_external_reference(method, &event.external_reference)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => AppError::NotFound(format!(
                    "no transaction for reference {}",
                    event.external_reference
                )),
                other => other.into(),
            })?;

        let result = match self
            .apply_outcome(tx, event.outcome, TransitionSource::Callback)
            .await?
        {
            Reconciled::Transitioned(_) => CallbackResult::Applied,
            Reconciled::AlreadyTerminal(_) => CallbackResult::Duplicate,
            Reconciled::PaidAfterTerminal(_) => CallbackResult::PaidAfterTerminal,
            Reconciled::StillPending(_) => CallbackResult::Ignored,
        };
        info!(
            payment_method = %method,
            external_reference = %event.external_reference,
            result = ?result,
            "Gateway callback processed"
        );
        Ok(result)
    }

    /// Resolves one batch of pending gateway transactions older than `min_age`.
    pub async fn sweep(&self, settings: &ReconcileSettings) -> Result<SweepReport, AppError> {
        let min_age = chrono::Duration::from_std(settings.min_age)
            .map_err(|e| AppError::Internal(format!("invalid reconcile min age: {e}")))?;
        let pending = self
            .ledger
            .store()
            .pending_gateway_transactions(Utc::now() - min_age, settings.batch_size)
            .await?;

        let mut report = SweepReport {
            examined: pending.len(),
            ..Default::default()
        };

        for tx in pending {
            let id = tx.id;
            match self.check(tx, TransitionSource::Sweep).await {
                Ok(Reconciled::Transitioned(_)) => report.transitioned += 1,
                Ok(Reconciled::AlreadyTerminal(_)) => report.already_terminal += 1,
                Ok(Reconciled::PaidAfterTerminal(_)) => report.paid_after_terminal += 1,
                Ok(Reconciled::StillPending(_)) => report.still_pending += 1,
                Err(e) => {
                    report.errors += 1;
                    warn!(transaction_id = %id, error = %e, "Sweep could not resolve transaction");
                }
            }
        }

        Ok(report)
    }

    /// Runs the sweep forever. Failures are retried on the next tick.
    pub async fn run_worker(self, settings: ReconcileSettings) {
        info!(
            interval_secs = settings.interval.as_secs(),
            batch_size = settings.batch_size,
            "Reconciliation worker started"
        );
        let interval = settings.interval.max(Duration::from_secs(1));

        loop {
            match self.sweep(&settings).await {
                Ok(report) if report.examined > 0 => info!(
                    examined = report.examined,
                    transitioned = report.transitioned,
                    still_pending = report.still_pending,
                    errors = report.errors,
                    "Reconciliation sweep finished"
                ),
                Ok(_) => {}
                Err(e) => error!("Reconciliation sweep error: {}", e),
            }

            sleep(interval).await;
        }
    }

    /// Status view including the durable credit record, if any.
    pub async fn status_view(&self, tx: &Transaction) -> Result<PaymentStatus, AppError> {
        let application = if tx.status == TransactionStatus::Completed {
            self.ledger.store().credit_application(tx.id).await?
        } else {
            None
        };

        Ok(PaymentStatus {
            transaction_id: tx.id,
            status: tx.status,
            payment_method: tx.payment_method,
            credits_added: application.as_ref().map(|a| a.credits_added),
            unlimited: application.as_ref().map(|a| a.unlimited),
            resolution_note: tx.resolution_note.clone(),
        })
    }

    /// Asks the gateway about `tx` and applies the answer. Gateway errors propagate.
    async fn check(&self, tx: Transaction, source: TransitionSource) -> Result<Reconciled, AppError> {
        if tx.is_terminal() {
            return Ok(Reconciled::AlreadyTerminal(tx));
        }
        // Manual transfers wait for an administrator.
        if !tx.payment_method.is_gateway() {
            return Ok(Reconciled::StillPending(tx));
        }
        let Some(gateway) = self.registry.get(tx.payment_method) else {
            warn!(
                transaction_id = %tx.id,
                payment_method = %tx.payment_method,
                "No gateway registered for pending transaction"
            );
            return Ok(Reconciled::StillPending(tx));
        };

        let outcome = match gateway.resolve(&tx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.ledger
                    .metrics()
                    .gateway_errors
                    .with_label_values(&[tx.payment_method.as_str(), "resolve"])
                    .inc();
                warn!(
                    transaction_id = %tx.id,
                    payment_method = %tx.payment_method,
                    error = %e,
                    "Gateway status query failed, transaction stays pending"
                );
                return Err(AppError::ExternalGateway(e.to_string()));
            }
        };

        self.apply_outcome(tx, outcome, source).await
    }

    async fn apply_outcome(
        &self,
        tx: Transaction,
        outcome: GatewayOutcome,
        source: TransitionSource,
    ) -> Result<Reconciled, AppError> {
        let id = tx.id;
        let paid = outcome == GatewayOutcome::Completed;
        let result: Result<Finalized, StoreError> = match outcome {
            GatewayOutcome::Pending => return Ok(Reconciled::StillPending(tx)),
            GatewayOutcome::Completed => {
                self.ledger
                    .apply_credit(id, tx.external_reference.clone(), source)
                    .await
            }
            GatewayOutcome::Failed(note) => self.ledger.fail(id, non_empty(note), source).await,
            GatewayOutcome::Cancelled(note) => {
                self.ledger.cancel(id, non_empty(note), source).await
            }
        };

        match result {
            Ok(finalized) => Ok(Reconciled::Transitioned(finalized.transaction)),
            Err(StoreError::Conflict { .. }) => {
                let current = self.ledger.store().get_transaction(id).await?;
                if paid && current.status != TransactionStatus::Completed {
                    self.ledger
                        .metrics()
                        .paid_after_terminal
                        .with_label_values(&[current.payment_method.as_str(), current.status.as_str()])
                        .inc();
                    error!(
                        transaction_id = %id,
                        user_id = %current.user_id,
                        payment_method = %current.payment_method,
                        status = %current.status,
                        external_reference = current.external_reference.as_deref().unwrap_or(""),
                        source = source.as_str(),
                        "Gateway reports payment for a transaction that is already {}, needs review",
                        current.status
                    );
                    return Ok(Reconciled::PaidAfterTerminal(current));
                }
                Ok(Reconciled::AlreadyTerminal(current))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn non_empty(note: String) -> Option<String> {
    let note = note.trim();
    (!note.is_empty()).then(|| note.to_string())
}
