use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::{CreditAccount, PaymentMethod, Transaction, TransactionStatus};

const CHANNEL_CAPACITY: usize = 256;

/// Pushed to subscribers whenever a transaction changes state or a balance moves.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentEvent {
    pub user_id: Uuid,
    pub transaction_id: Option<Uuid>,
    pub status: Option<TransactionStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub remaining_credits: Option<i64>,
    pub has_unlimited_credits: Option<bool>,
    pub at: DateTime<Utc>,
}

impl PaymentEvent {
    pub fn transaction(tx: &Transaction, account: Option<&CreditAccount>) -> Self {
        Self {
            user_id: tx.user_id,
            transaction_id: Some(tx.id),
            status: Some(tx.status),
            payment_method: Some(tx.payment_method),
            remaining_credits: account.map(|a| a.remaining_credits),
            has_unlimited_credits: account.map(|a| a.has_unlimited_credits),
            at: Utc::now(),
        }
    }

    pub fn balance(account: &CreditAccount) -> Self {
        Self {
            user_id: account.user_id,
            transaction_id: None,
            status: None,
            payment_method: None,
            remaining_credits: Some(account.remaining_credits),
            has_unlimited_credits: Some(account.has_unlimited_credits),
            at: Utc::now(),
        }
    }
}

/// Fan-out of `PaymentEvent`s. Sending never blocks and never fails the caller.
#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<PaymentEvent>,
}

impl Notifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: PaymentEvent) {
        // No receivers is fine.
        let delivered = self.sender.send(event).unwrap_or(0);
        tracing::debug!(receivers = delivered, "Published payment event");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PaymentEvent> {
        self.sender.subscribe()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
