use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config;
use crate::entitlement::resolve_tier;
use crate::error::{AppError, AppResult};

use super::models::{purchase_status, PendingPurchase};
use super::service::{ensure_owner, lock_account, set_lock_timeout};

/// Pending-purchase lifecycle: pending -> processing -> completed|failed,
/// with a timed pending|processing -> expired path. The (order_id,
/// owner_id) unique key plus the one-way transitions make the credit
/// idempotent under duplicate webhook delivery.
#[derive(Clone)]
pub struct PurchaseService {
    pool: PgPool,
}

impl PurchaseService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent by (order_id, owner_id): a replayed checkout returns the
    /// existing row unchanged instead of inserting or erroring.
    pub async fn create_pending_purchase(
        &self,
        caller_id: i32,
        owner_id: i32,
        order_id: &str,
        token_amount: i32,
        amount_minor: i32,
    ) -> AppResult<PendingPurchase> {
        ensure_owner(caller_id, owner_id)?;
        if order_id.trim().is_empty() {
            return Err(AppError::BadRequest("order_id must not be empty".into()));
        }
        if token_amount <= 0 {
            return Err(AppError::BadRequest("token_amount must be positive".into()));
        }
        if amount_minor < 0 {
            return Err(AppError::BadRequest(
                "amount_minor must not be negative".into(),
            ));
        }

        let expires_at = Utc::now() + Duration::minutes(*config::PURCHASE_TTL_MINUTES);
        let inserted = sqlx::query_as::<_, PendingPurchase>(
            r#"
            INSERT INTO pending_purchases
                (id, order_id, owner_id, token_amount, amount_minor, status, expires_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6)
            ON CONFLICT (order_id, owner_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order_id)
        .bind(owner_id)
        .bind(token_amount)
        .bind(amount_minor)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(purchase) => Ok(purchase),
            None => self.get_purchase(owner_id, order_id).await,
        }
    }

    pub async fn get_purchase(&self, owner_id: i32, order_id: &str) -> AppResult<PendingPurchase> {
        sqlx::query_as::<_, PendingPurchase>(
            "SELECT * FROM pending_purchases WHERE order_id = $1 AND owner_id = $2",
        )
        .bind(order_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound)
    }

    /// pending -> processing. A duplicate claim against a row already in
    /// `processing` returns the row as-is so webhook retries stay cheap.
    pub async fn claim_for_verification(
        &self,
        order_id: &str,
        owner_id: i32,
    ) -> AppResult<PendingPurchase> {
        let mut tx = self.pool.begin().await?;
        set_lock_timeout(&mut tx).await?;
        let purchase = lock_purchase(&mut tx, order_id, owner_id).await?;

        match purchase.status.as_str() {
            purchase_status::PENDING => {
                let updated = sqlx::query_as::<_, PendingPurchase>(
                    r#"
                    UPDATE pending_purchases
                    SET status = 'processing', updated_at = NOW()
                    WHERE order_id = $1 AND owner_id = $2
                    RETURNING *
                    "#,
                )
                .bind(order_id)
                .bind(owner_id)
                .fetch_one(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok(updated)
            }
            purchase_status::PROCESSING => {
                tx.rollback().await.ok();
                Ok(purchase)
            }
            other => {
                tx.rollback().await.ok();
                Err(AppError::InvalidTransition(format!(
                    "cannot claim a {other} purchase"
                )))
            }
        }
    }

    /// processing -> completed, crediting the purchased balance in the same
    /// transaction. Replay against an already-completed row is a no-op that
    /// does not credit a second time.
    pub async fn complete_purchase(
        &self,
        order_id: &str,
        owner_id: i32,
    ) -> AppResult<PendingPurchase> {
        let now = Utc::now();
        // Credit lands on the account for the tier the owner holds right now.
        let tier = resolve_tier(&self.pool, owner_id, now).await?;

        let mut tx = self.pool.begin().await?;
        set_lock_timeout(&mut tx).await?;
        let purchase = lock_purchase(&mut tx, order_id, owner_id).await?;

        match purchase.status.as_str() {
            purchase_status::COMPLETED => {
                tx.rollback().await.ok();
                Ok(purchase)
            }
            purchase_status::PROCESSING => {
                let updated = sqlx::query_as::<_, PendingPurchase>(
                    r#"
                    UPDATE pending_purchases
                    SET status = 'completed', updated_at = NOW()
                    WHERE order_id = $1 AND owner_id = $2
                    RETURNING *
                    "#,
                )
                .bind(order_id)
                .bind(owner_id)
                .fetch_one(&mut *tx)
                .await?;

                lock_account(&mut tx, owner_id, tier, now).await?;
                sqlx::query(
                    r#"
                    UPDATE quota_accounts
                    SET purchased_balance = purchased_balance + $3, updated_at = NOW()
                    WHERE owner_id = $1 AND tier = $2
                    "#,
                )
                .bind(owner_id)
                .bind(tier.as_str())
                .bind(purchase.token_amount)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;

                tracing::info!(
                    owner_id,
                    order_id,
                    tokens = purchase.token_amount,
                    tier = tier.as_str(),
                    "purchase completed, balance credited"
                );
                Ok(updated)
            }
            other => {
                tx.rollback().await.ok();
                Err(AppError::InvalidTransition(format!(
                    "cannot complete a {other} purchase"
                )))
            }
        }
    }

    /// pending|processing -> failed, no balance effect. Replay against a
    /// failed row is a no-op.
    pub async fn fail_purchase(&self, order_id: &str, owner_id: i32) -> AppResult<PendingPurchase> {
        let mut tx = self.pool.begin().await?;
        set_lock_timeout(&mut tx).await?;
        let purchase = lock_purchase(&mut tx, order_id, owner_id).await?;

        match purchase.status.as_str() {
            purchase_status::PENDING | purchase_status::PROCESSING => {
                let updated = sqlx::query_as::<_, PendingPurchase>(
                    r#"
                    UPDATE pending_purchases
                    SET status = 'failed', updated_at = NOW()
                    WHERE order_id = $1 AND owner_id = $2
                    RETURNING *
                    "#,
                )
                .bind(order_id)
                .bind(owner_id)
                .fetch_one(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok(updated)
            }
            purchase_status::FAILED => {
                tx.rollback().await.ok();
                Ok(purchase)
            }
            other => {
                tx.rollback().await.ok();
                Err(AppError::InvalidTransition(format!(
                    "cannot fail a {other} purchase"
                )))
            }
        }
    }

    /// Moves overdue pending/processing rows to `expired`. No balance effect.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE pending_purchases
            SET status = 'expired', updated_at = NOW()
            WHERE status IN ('pending', 'processing') AND expires_at < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

async fn lock_purchase(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    order_id: &str,
    owner_id: i32,
) -> AppResult<PendingPurchase> {
    sqlx::query_as::<_, PendingPurchase>(
        "SELECT * FROM pending_purchases WHERE order_id = $1 AND owner_id = $2 FOR UPDATE",
    )
    .bind(order_id)
    .bind(owner_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(AppError::NotFound)
}
