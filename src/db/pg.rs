use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::models::{AccountRow, CreditApplicationRow, PlanPriceRow, PlanRow, TransactionRow};
use crate::domain::{
    CreditAccount, CreditGrant, Currency, PaymentMethod, PricingPlan, Transaction,
    TransactionStatus,
};
use crate::ports::{
    sort_plans, CreditApplication, Finalized, LedgerAnalytics, LedgerStore, Resolution,
    StoreError, TransactionFilter,
};

const TRANSACTION_COLUMNS: &str = "id, user_id, plan_id, package_type, amount, currency, \
    payment_method, external_reference, bank_reference, credits_to_add, status, \
    resolution_note, created_at, updated_at, completed_at";

/// Postgres-backed ledger.
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_insert_error(err: sqlx::Error, what: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Duplicate(what.to_string())
        }
        _ => StoreError::Database(err),
    }
}

async fn upsert_account(
    conn: &mut sqlx::PgConnection,
    user_id: Uuid,
    grant: CreditGrant,
) -> Result<CreditAccount, StoreError> {
    let row = sqlx::query_as::<_, AccountRow>(
        r#"
        INSERT INTO credit_accounts (user_id, remaining_credits, has_unlimited_credits)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id) DO UPDATE SET
            remaining_credits = credit_accounts.remaining_credits + EXCLUDED.remaining_credits,
            has_unlimited_credits = credit_accounts.has_unlimited_credits OR EXCLUDED.has_unlimited_credits,
            updated_at = NOW()
        RETURNING user_id, remaining_credits, has_unlimited_credits
        "#,
    )
    .bind(user_id)
    .bind(grant.credits())
    .bind(grant.is_unlimited())
    .fetch_one(&mut *conn)
    .await?;

    Ok(row.into())
}

async fn insert_prices(
    conn: &mut sqlx::PgConnection,
    plan: &PricingPlan,
) -> Result<(), StoreError> {
    for (currency, amount) in &plan.prices {
        sqlx::query("INSERT INTO plan_prices (plan_id, currency, amount) VALUES ($1, $2, $3)")
            .bind(&plan.id)
            .bind(currency.as_str())
            .bind(amount)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

fn count_map<K: Ord + std::str::FromStr>(rows: Vec<(String, i64)>) -> BTreeMap<K, i64> {
    rows.into_iter()
        .filter_map(|(key, count)| key.parse().ok().map(|k| (k, count)))
        .collect()
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO payment_transactions (
                id, user_id, plan_id, package_type, amount, currency, payment_method,
                external_reference, bank_reference, credits_to_add, status, resolution_note,
                created_at, updated_at, completed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(tx.id)
        .bind(tx.user_id)
        .bind(&tx.plan_id)
        .bind(tx.package_type.as_str())
        .bind(&tx.amount)
        .bind(tx.currency.as_str())
        .bind(tx.payment_method.as_str())
        .bind(&tx.external_reference)
        .bind(&tx.bank_reference)
        .bind(tx.credits_to_add)
        .bind(tx.status.as_str())
        .bind(&tx.resolution_note)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .bind(tx.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, "transaction"))?;

        Ok(())
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Transaction, StoreError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        row.try_into()
    }

    async fn find_by_external_reference(
        &self,
        method: PaymentMethod,
        external_reference: &str,
    ) -> Result<Transaction, StoreError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions \
             WHERE payment_method = $1 AND external_reference = $2"
        ))
        .bind(method.as_str())
        .bind(external_reference)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        row.try_into()
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS} FROM payment_transactions
            WHERE ($1::uuid IS NULL OR user_id = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR payment_method = $3)
            ORDER BY created_at DESC
            LIMIT $4
            "#
        ))
        .bind(filter.user_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.payment_method.map(|m| m.as_str()))
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn pending_gateway_transactions(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS} FROM payment_transactions
            WHERE status = 'pending'
              AND payment_method <> 'bank_transfer'
              AND created_at < $1
            ORDER BY created_at ASC
            LIMIT $2
            "#
        ))
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn finalize(&self, id: Uuid, resolution: Resolution) -> Result<Finalized, StoreError> {
        let status = resolution.status();
        let external_reference = match &resolution {
            Resolution::Completed { external_reference } => external_reference.clone(),
            _ => None,
        };

        let mut db_tx = self.pool.begin().await?;

        // Compare-and-set: only a row still in 'pending' is touched.
        let updated = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            UPDATE payment_transactions SET
                status = $2,
                external_reference = COALESCE($3, external_reference),
                resolution_note = COALESCE($4, resolution_note),
                updated_at = NOW(),
                completed_at = CASE WHEN $2 = 'completed' THEN NOW() ELSE completed_at END
            WHERE id = $1 AND status = 'pending'
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(&external_reference)
        .bind(resolution.note())
        .fetch_optional(&mut *db_tx)
        .await?;

        let Some(row) = updated else {
            let current: Option<(String,)> =
                sqlx::query_as("SELECT status FROM payment_transactions WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&mut *db_tx)
                    .await?;
            db_tx.rollback().await?;

            return match current {
                None => Err(StoreError::NotFound),
                Some((current,)) => {
                    let current: TransactionStatus = current
                        .parse()
                        .map_err(|e: crate::domain::ParseEnumError| {
                            StoreError::Internal(e.to_string())
                        })?;
                    Err(StoreError::Conflict { current })
                }
            };
        };

        let transaction = Transaction::try_from(row)?;

        if status != TransactionStatus::Completed {
            db_tx.commit().await?;
            return Ok(Finalized {
                transaction,
                account: None,
                application: None,
            });
        }

        let grant = CreditGrant::for_transaction(&transaction);

        let application = sqlx::query_as::<_, CreditApplicationRow>(
            r#"
            INSERT INTO credit_applications (transaction_id, user_id, credits_added, unlimited)
            VALUES ($1, $2, $3, $4)
            RETURNING transaction_id, user_id, credits_added, unlimited, applied_at
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.user_id)
        .bind(grant.credits())
        .bind(grant.is_unlimited())
        .fetch_one(&mut *db_tx)
        .await
        .map_err(|e| map_insert_error(e, "credit application"))?;

        let account = upsert_account(&mut db_tx, transaction.user_id, grant).await?;

        db_tx.commit().await?;

        Ok(Finalized {
            transaction,
            account: Some(account),
            application: Some(application.into()),
        })
    }

    async fn credit_application(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<CreditApplication>, StoreError> {
        let row = sqlx::query_as::<_, CreditApplicationRow>(
            "SELECT transaction_id, user_id, credits_added, unlimited, applied_at \
             FROM credit_applications WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn get_account(&self, user_id: Uuid) -> Result<CreditAccount, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT user_id, remaining_credits, has_unlimited_credits \
             FROM credit_accounts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(Into::into)
            .unwrap_or_else(|| CreditAccount::empty(user_id)))
    }

    async fn grant_credits(
        &self,
        user_id: Uuid,
        grant: CreditGrant,
        reason: Option<&str>,
    ) -> Result<CreditAccount, StoreError> {
        let mut db_tx = self.pool.begin().await?;

        let account = upsert_account(&mut db_tx, user_id, grant).await?;

        sqlx::query(
            "INSERT INTO credit_overrides (user_id, credits_added, unlimited, reason) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(user_id)
        .bind(grant.credits())
        .bind(grant.is_unlimited())
        .bind(reason)
        .execute(&mut *db_tx)
        .await?;

        db_tx.commit().await?;
        Ok(account)
    }

    async fn get_plan(&self, id: &str) -> Result<PricingPlan, StoreError> {
        let plan = sqlx::query_as::<_, PlanRow>(
            "SELECT id, name, name_en, description, plan_type, credits, is_popular, is_active, sort_order \
             FROM pricing_plans WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        let prices = sqlx::query_as::<_, PlanPriceRow>(
            "SELECT plan_id, currency, amount FROM plan_prices WHERE plan_id = $1",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        plan.into_plan(&prices)
    }

    async fn list_plans(&self, active_only: bool) -> Result<Vec<PricingPlan>, StoreError> {
        let rows = sqlx::query_as::<_, PlanRow>(
            "SELECT id, name, name_en, description, plan_type, credits, is_popular, is_active, sort_order \
             FROM pricing_plans WHERE ($1 = FALSE OR is_active)",
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        let prices = sqlx::query_as::<_, PlanPriceRow>(
            "SELECT plan_id, currency, amount FROM plan_prices",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut plans = rows
            .into_iter()
            .map(|row| row.into_plan(&prices))
            .collect::<Result<Vec<_>, _>>()?;
        sort_plans(&mut plans);
        Ok(plans)
    }

    async fn insert_plan(&self, plan: &PricingPlan) -> Result<(), StoreError> {
        let mut db_tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO pricing_plans
                (id, name, name_en, description, plan_type, credits, is_popular, is_active, sort_order)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&plan.id)
        .bind(&plan.name)
        .bind(&plan.name_en)
        .bind(&plan.description)
        .bind(plan.plan_type.as_str())
        .bind(plan.credits)
        .bind(plan.is_popular)
        .bind(plan.is_active)
        .bind(plan.sort_order)
        .execute(&mut *db_tx)
        .await
        .map_err(|e| map_insert_error(e, "plan"))?;

        insert_prices(&mut db_tx, plan).await?;

        db_tx.commit().await?;
        Ok(())
    }

    async fn update_plan(&self, plan: &PricingPlan) -> Result<(), StoreError> {
        let mut db_tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE pricing_plans SET
                name = $2, name_en = $3, description = $4, plan_type = $5, credits = $6,
                is_popular = $7, is_active = $8, sort_order = $9, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(&plan.id)
        .bind(&plan.name)
        .bind(&plan.name_en)
        .bind(&plan.description)
        .bind(plan.plan_type.as_str())
        .bind(plan.credits)
        .bind(plan.is_popular)
        .bind(plan.is_active)
        .bind(plan.sort_order)
        .execute(&mut *db_tx)
        .await?;

        if result.rows_affected() == 0 {
            db_tx.rollback().await?;
            return Err(StoreError::NotFound);
        }

        sqlx::query("DELETE FROM plan_prices WHERE plan_id = $1")
            .bind(&plan.id)
            .execute(&mut *db_tx)
            .await?;
        insert_prices(&mut db_tx, plan).await?;

        db_tx.commit().await?;
        Ok(())
    }

    async fn plan_has_completed_sales(&self, plan_id: &str) -> Result<bool, StoreError> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM payment_transactions WHERE plan_id = $1 AND status = 'completed')",
        )
        .bind(plan_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn analytics(&self) -> Result<LedgerAnalytics, StoreError> {
        let by_status: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM payment_transactions GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let by_method: Vec<(String, i64)> = sqlx::query_as(
            "SELECT payment_method, COUNT(*) FROM payment_transactions GROUP BY payment_method",
        )
        .fetch_all(&self.pool)
        .await?;

        let revenue: Vec<(String, Option<BigDecimal>)> = sqlx::query_as(
            r#"
            SELECT currency, SUM(amount)
            FROM payment_transactions
            WHERE status = 'completed'
            GROUP BY currency
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = LedgerAnalytics::zeroed();
        stats.by_status.extend(count_map::<TransactionStatus>(by_status));
        stats.by_method.extend(count_map::<PaymentMethod>(by_method));
        stats.revenue_by_currency = revenue
            .into_iter()
            .filter_map(|(currency, sum)| {
                let currency: Currency = currency.parse().ok()?;
                Some((currency, sum.unwrap_or_default()))
            })
            .collect();
        stats.total_transactions = stats.by_status.values().sum();

        Ok(stats)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
