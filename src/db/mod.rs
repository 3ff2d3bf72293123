pub mod memory;
pub mod models;
pub mod pg;

pub use memory::InMemoryLedger;
pub use pg::PgLedger;

use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, LedgerBackend};
use crate::domain::PricingPlan;
use crate::ports::{LedgerStore, StoreError};

pub const MIGRATIONS_DIR: &str = "./migrations";

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool, dir: &Path) -> anyhow::Result<()> {
    let migrator = Migrator::new(dir).await?;
    migrator.run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

/// Inserts the default catalog when no plan exists yet. Returns the number inserted.
pub async fn seed_default_plans(store: &dyn LedgerStore) -> Result<usize, StoreError> {
    if !store.list_plans(false).await?.is_empty() {
        return Ok(0);
    }

    let plans = PricingPlan::defaults();
    for plan in &plans {
        store.insert_plan(plan).await?;
    }
    tracing::info!(count = plans.len(), "Seeded default pricing plans");
    Ok(plans.len())
}

/// Builds the configured ledger backend. Postgres is migrated and seeded before use.
pub async fn connect_ledger(config: &Config) -> anyhow::Result<Arc<dyn LedgerStore>> {
    match config.ledger_backend {
        LedgerBackend::Memory => {
            tracing::warn!("Using in-memory ledger; data is lost on restart");
            Ok(Arc::new(InMemoryLedger::with_default_plans()))
        }
        LedgerBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set for the postgres ledger"))?;
            let pool = create_pool(url).await?;
            run_migrations(&pool, Path::new(MIGRATIONS_DIR)).await?;

            let ledger = PgLedger::new(pool);
            seed_default_plans(&ledger).await?;
            Ok(Arc::new(ledger))
        }
    }
}
