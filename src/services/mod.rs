pub mod admin;
pub mod checkout;
pub mod ledger;
pub mod notifier;
pub mod reconciliation;

pub use admin::AdminService;
pub use checkout::CheckoutService;
pub use ledger::{LedgerService, TransitionSource};
pub use notifier::{Notifier, PaymentEvent};
pub use reconciliation::{CallbackResult, Reconciled, ReconciliationService, SweepReport};
