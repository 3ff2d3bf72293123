pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod gateways;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod middleware;
pub mod ports;
pub mod services;

use axum::{
    http::HeaderValue,
    middleware as axum_middleware,
    routing::{get, patch, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::gateways::GatewayRegistry;
use crate::health::{HealthChecker, LedgerChecker};
use crate::metrics::PaymentMetrics;
use crate::ports::LedgerStore;
use crate::services::{
    AdminService, CheckoutService, LedgerService, Notifier, ReconciliationService,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn LedgerStore>,
    pub ledger: LedgerService,
    pub checkout: CheckoutService,
    pub reconciliation: ReconciliationService,
    pub admin: AdminService,
    pub metrics: PaymentMetrics,
    pub health: Arc<HealthChecker>,
}

impl AppState {
    /// Wires the services around one ledger store and one gateway registry.
    pub fn new(
        config: Config,
        store: Arc<dyn LedgerStore>,
        registry: GatewayRegistry,
    ) -> Result<Self, prometheus::Error> {
        let metrics = metrics::init_metrics()?;
        let ledger = LedgerService::new(store.clone(), Notifier::new(), metrics.clone());

        let checkout = CheckoutService::new(
            ledger.clone(),
            registry.clone(),
            config.bank_transfer.clone(),
            config.public_base_url.clone(),
        );
        let reconciliation = ReconciliationService::new(ledger.clone(), registry);
        let admin = AdminService::new(ledger.clone());
        let health = Arc::new(
            HealthChecker::new().add_checker(Box::new(LedgerChecker::new(store.clone()))),
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            ledger,
            checkout,
            reconciliation,
            admin,
            metrics,
            health,
        })
    }
}

pub fn create_app(app_state: AppState) -> Router {
    let cors = cors_layer(app_state.config.cors_allowed_origins.as_deref());

    let payments = Router::new()
        .route("/checkout/:method", post(handlers::payments::checkout))
        .route("/status/:id", get(handlers::payments::status))
        .route("/bank-accounts", get(handlers::payments::bank_accounts))
        .route("/plans", get(handlers::payments::plans))
        .route("/transactions", get(handlers::payments::history))
        .route("/transactions/:id/cancel", post(handlers::payments::cancel))
        .route("/account", get(handlers::payments::account))
        .route("/events", get(handlers::payments::events))
        .route("/webhooks/:gateway", post(handlers::webhook::gateway_callback))
        .route("/admin/transactions", get(handlers::admin::list_transactions))
        .route("/admin/transactions/:id/approve", patch(handlers::admin::approve))
        .route("/admin/transactions/:id/reject", patch(handlers::admin::reject))
        .route("/admin/analytics", get(handlers::admin::analytics))
        .route("/admin/plans", post(handlers::admin::create_plan))
        .route("/admin/plans/:id", put(handlers::admin::update_plan))
        .route("/admin/plans/:id/deactivate", patch(handlers::admin::deactivate_plan))
        .route(
            "/admin/accounts/:user_id/credits",
            patch(handlers::admin::grant_credits),
        );

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/api-docs/openapi.json", get(handlers::openapi))
        .nest("/payments", payments)
        .layer(axum_middleware::from_fn(
            middleware::request_logger::request_logger_middleware,
        ))
        .with_state(app_state);

    match cors {
        Some(cors) => app.layer(cors),
        None => app,
    }
}

fn cors_layer(origins: Option<&str>) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins?
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|o| match o.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any),
    )
}
