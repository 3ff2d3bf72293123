use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Prometheus counters for the payment pipeline, on a private registry.
#[derive(Clone)]
pub struct PaymentMetrics {
    registry: Registry,
    pub transactions_created: IntCounterVec,
    pub transitions: IntCounterVec,
    pub credits_applied: IntCounter,
    pub conflicts: IntCounterVec,
    pub gateway_errors: IntCounterVec,
    pub paid_after_terminal: IntCounterVec,
}

pub fn init_metrics() -> Result<PaymentMetrics, prometheus::Error> {
    let registry = Registry::new();

    let transactions_created = IntCounterVec::new(
        Opts::new(
            "payment_transactions_created_total",
            "Pending transactions created, by payment method",
        ),
        &["payment_method"],
    )?;
    let transitions = IntCounterVec::new(
        Opts::new(
            "payment_transitions_total",
            "Transactions moved out of pending, by terminal status and payment method",
        ),
        &["status", "payment_method"],
    )?;
    let credits_applied = IntCounter::new(
        "payment_credit_applications_total",
        "Crediting operations applied",
    )?;
    let conflicts = IntCounterVec::new(
        Opts::new(
            "payment_transition_conflicts_total",
            "Transition attempts rejected because the transaction was already terminal",
        ),
        &["source"],
    )?;
    let gateway_errors = IntCounterVec::new(
        Opts::new(
            "payment_gateway_errors_total",
            "Errors returned by payment gateways",
        ),
        &["payment_method", "operation"],
    )?;

    let paid_after_terminal = IntCounterVec::new(
        Opts::new(
            "payment_paid_after_terminal_total",
            "Successful gateway payments reported for failed or cancelled transactions",
        ),
        &["payment_method", "status"],
    )?;

    registry.register(Box::new(transactions_created.clone()))?;
    registry.register(Box::new(transitions.clone()))?;
    registry.register(Box::new(credits_applied.clone()))?;
    registry.register(Box::new(conflicts.clone()))?;
    registry.register(Box::new(gateway_errors.clone()))?;
    registry.register(Box::new(paid_after_terminal.clone()))?;

    Ok(PaymentMetrics {
        registry,
        transactions_created,
        transitions,
        credits_applied,
        conflicts,
        gateway_errors,
        paid_after_terminal,
    })
}

impl PaymentMetrics {
    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
