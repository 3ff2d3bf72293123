use clap::{Parser, Subcommand};
use payment_intake::config::{Config, ConfigInfo};
use payment_intake::services::{Reconciled, TransitionSource};
use payment_intake::AppState;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "payment-intake")]
#[command(about = "Payment intake - checkout, reconciliation and credit ledger", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server and the reconciliation worker (default)
    Serve,

    /// Transaction management commands
    #[command(subcommand)]
    Tx(TxCommands),

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// Resolve one pending transaction against its gateway
    Resolve {
        /// Transaction UUID
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
    },

    /// Run one reconciliation sweep over pending gateway transactions
    Sweep,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

pub async fn handle_tx_resolve(state: &AppState, tx_id: Uuid) -> anyhow::Result<()> {
    let result = state
        .reconciliation
        .resolve(tx_id, TransitionSource::Admin)
        .await?;

    let tx = result.transaction();
    match &result {
        Reconciled::Transitioned(_) => {
            tracing::info!(transaction_id = %tx_id, status = %tx.status, "Transaction resolved");
            println!("✓ Transaction {} is now {}", tx_id, tx.status);
        }
        Reconciled::AlreadyTerminal(_) => {
            println!("✓ Transaction {} was already {}", tx_id, tx.status);
        }
        Reconciled::PaidAfterTerminal(_) => {
            println!(
                "⚠️  Transaction {} is {} but the gateway reports it as paid; review it",
                tx_id, tx.status
            );
        }
        Reconciled::StillPending(_) => {
            println!("Transaction {} is still pending", tx_id);
        }
    }
    Ok(())
}

pub async fn handle_tx_sweep(state: &AppState) -> anyhow::Result<()> {
    let report = state.reconciliation.sweep(&state.config.reconcile).await?;

    println!("\n=== Reconciliation Sweep ===");
    println!("  Examined: {}", report.examined);
    println!("  Transitioned: {}", report.transitioned);
    println!("  Already terminal: {}", report.already_terminal);
    println!("  Paid after terminal: {}", report.paid_after_terminal);
    println!("  Still pending: {}", report.still_pending);
    println!("  Errors: {}", report.errors);

    if report.paid_after_terminal > 0 {
        println!("\n⚠️  Some payments arrived after their transaction was closed; review them");
    }
    if report.errors > 0 {
        println!("\n⚠️  Some transactions could not be resolved; they stay pending");
    } else {
        println!("\n✓ Sweep completed");
    }
    Ok(())
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    use std::path::Path;

    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set to run migrations"))?;
    let pool = payment_intake::db::create_pool(url).await?;

    tracing::info!("Running database migrations...");
    payment_intake::db::run_migrations(&pool, Path::new(payment_intake::db::MIGRATIONS_DIR)).await?;
    println!("✓ Database migrations completed");

    Ok(())
}

pub fn handle_config_validate(info: &ConfigInfo) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");
    let config = &info.config;

    println!("Configuration:");
    println!("  Profile: {}", info.profile.as_str());
    println!("  Server Port: {}", config.server_port);
    println!("  Ledger Backend: {}", config.ledger_backend.as_str());
    println!(
        "  Database URL: {}",
        config
            .database_url
            .as_deref()
            .map(mask_password)
            .unwrap_or_else(|| "(not set)".to_string())
    );
    println!("  Public Base URL: {}", config.public_base_url);
    println!(
        "  Admin API: {}",
        if config.admin_api_token.is_some() {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!("  Gateway A: {}", enabled(config.gateway_a.is_some()));
    println!("  Gateway B: {}", enabled(config.gateway_b.is_some()));
    println!("  Bank Transfer: {}", enabled(config.bank_transfer.is_some()));
    println!(
        "  Status Polling: {} attempts, {}ms initial backoff",
        config.status_poll.max_attempts,
        config.status_poll.initial_backoff.as_millis()
    );
    if !info.overrides.is_empty() {
        println!("  Overridden: {}", info.overrides.join(", "));
    }

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

fn enabled(on: bool) -> &'static str {
    if on {
        "enabled"
    } else {
        "disabled"
    }
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user_start = slash_pos + 2;
                let user = &url[user_start..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
