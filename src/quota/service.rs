use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::config;
use crate::entitlement::{Tier, UNLIMITED};
use crate::error::{AppError, AppResult};

use super::models::{ConsumeOutcome, QuotaAccount};

/// Consumption engine over per-(owner, tier) quota accounts. All balance
/// reads that feed a write happen under a `FOR UPDATE` row lock held for
/// the whole read-check-decrement.
#[derive(Clone)]
pub struct QuotaService {
    pool: PgPool,
}

impl QuotaService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Charges `cost` tokens against the caller's account, daily allowance
    /// first, purchased balance for the remainder. The insufficient path
    /// mutates nothing.
    pub async fn consume(
        &self,
        caller_id: i32,
        owner_id: i32,
        tier: Tier,
        cost: i32,
        feature: &str,
        context: Value,
    ) -> AppResult<ConsumeOutcome> {
        ensure_owner(caller_id, owner_id)?;
        if cost <= 0 {
            return Err(AppError::BadRequest("cost must be positive".into()));
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        set_lock_timeout(&mut tx).await?;
        let account = lock_account(&mut tx, owner_id, tier, now).await?;

        if tier.is_unlimited() {
            sqlx::query(
                "UPDATE quota_accounts SET updated_at = NOW() WHERE owner_id = $1 AND tier = $2",
            )
            .bind(owner_id)
            .bind(tier.as_str())
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            let purchased_remaining = account.purchased_balance;
            self.append_usage(owner_id, tier, 0, 0, 0, feature, &context)
                .await;
            return Ok(ConsumeOutcome {
                allowed: true,
                tier: tier.as_str().to_string(),
                charged_from_daily: 0,
                charged_from_purchased: 0,
                daily_remaining: UNLIMITED,
                purchased_remaining,
                notes: vec!["quota:unlimited".to_string()],
            });
        }

        let total = account.daily_available + account.purchased_balance;
        if total < cost {
            tx.rollback().await.ok();
            return Ok(ConsumeOutcome {
                allowed: false,
                tier: tier.as_str().to_string(),
                charged_from_daily: 0,
                charged_from_purchased: 0,
                daily_remaining: account.daily_available,
                purchased_remaining: account.purchased_balance,
                notes: vec!["quota:insufficient-balance".to_string()],
            });
        }

        let (from_daily, from_purchased) = split_charge(account.daily_available, cost);
        let updated = sqlx::query_as::<_, QuotaAccount>(
            r#"
            UPDATE quota_accounts
            SET daily_available = daily_available - $3,
                purchased_balance = purchased_balance - $4,
                consumed_today = consumed_today + $3,
                updated_at = NOW()
            WHERE owner_id = $1 AND tier = $2
            RETURNING *
            "#,
        )
        .bind(owner_id)
        .bind(tier.as_str())
        .bind(from_daily)
        .bind(from_purchased)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        self.append_usage(owner_id, tier, cost, from_daily, from_purchased, feature, &context)
            .await;

        Ok(ConsumeOutcome {
            allowed: true,
            tier: tier.as_str().to_string(),
            charged_from_daily: from_daily,
            charged_from_purchased: from_purchased,
            daily_remaining: updated.daily_available,
            purchased_remaining: updated.purchased_balance,
            notes: vec![format!("quota:charged:{from_daily}+{from_purchased}")],
        })
    }

    /// Read-only balance view. Shows what the next write would see after
    /// the daily reset, without touching the stored row; every write path
    /// persists the reset itself before acting.
    pub async fn account_snapshot(
        &self,
        caller_id: i32,
        owner_id: i32,
        tier: Tier,
    ) -> AppResult<QuotaAccount> {
        ensure_owner(caller_id, owner_id)?;
        let now = Utc::now();
        let stored = sqlx::query_as::<_, QuotaAccount>(
            "SELECT * FROM quota_accounts WHERE owner_id = $1 AND tier = $2",
        )
        .bind(owner_id)
        .bind(tier.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let mut account = match stored {
            Some(account) => account,
            None => return Ok(QuotaAccount::fresh(owner_id, tier, now)),
        };
        if !tier.is_unlimited() && account.last_reset_date < now.date_naive() {
            account.daily_available = account.daily_limit;
            account.consumed_today = 0;
            account.last_reset_date = now.date_naive();
        }
        Ok(account)
    }

    /// Best-effort audit append, run after the balance transaction has
    /// committed. A failure here is logged and swallowed; it must never
    /// undo a committed decrement.
    async fn append_usage(
        &self,
        owner_id: i32,
        tier: Tier,
        amount: i32,
        from_daily: i32,
        from_purchased: i32,
        feature: &str,
        context: &Value,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO usage_records (id, owner_id, tier, amount, from_daily, from_purchased, feature, context)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(owner_id)
        .bind(tier.as_str())
        .bind(amount)
        .bind(from_daily)
        .bind(from_purchased)
        .bind(feature)
        .bind(context)
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            tracing::warn!(?err, owner_id, feature, "usage record append failed");
        }
    }
}

/// Caller identity must match the account owner before any domain logic
/// runs; there is no row-level policy underneath to fall back on.
pub fn ensure_owner(caller_id: i32, owner_id: i32) -> AppResult<()> {
    if caller_id != owner_id {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

/// Daily allowance is perishable, so it is spent before the purchased
/// balance.
pub fn split_charge(daily_available: i32, cost: i32) -> (i32, i32) {
    let from_daily = daily_available.clamp(0, cost);
    (from_daily, cost - from_daily)
}

pub(crate) async fn set_lock_timeout(tx: &mut Transaction<'_, Postgres>) -> AppResult<()> {
    // SET LOCAL does not take bind parameters; the value is a checked u64.
    let statement = format!("SET LOCAL lock_timeout = '{}ms'", *config::QUOTA_LOCK_TIMEOUT_MS);
    sqlx::query(&statement).execute(&mut **tx).await?;
    Ok(())
}

/// Creates the account lazily, takes the exclusive row lock, and persists
/// the daily reset if one is due. Callers get back a row that is both
/// locked and fresh; the reset is never computed virtually on a write path.
pub(crate) async fn lock_account(
    tx: &mut Transaction<'_, Postgres>,
    owner_id: i32,
    tier: Tier,
    now: DateTime<Utc>,
) -> AppResult<QuotaAccount> {
    let limit = tier.daily_limit();
    let initial_available = if tier.is_unlimited() { 0 } else { limit };
    sqlx::query(
        r#"
        INSERT INTO quota_accounts (owner_id, tier, daily_limit, daily_available, last_reset_date)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (owner_id, tier) DO NOTHING
        "#,
    )
    .bind(owner_id)
    .bind(tier.as_str())
    .bind(limit)
    .bind(initial_available)
    .bind(now.date_naive())
    .execute(&mut **tx)
    .await?;

    let account = sqlx::query_as::<_, QuotaAccount>(
        "SELECT * FROM quota_accounts WHERE owner_id = $1 AND tier = $2 FOR UPDATE",
    )
    .bind(owner_id)
    .bind(tier.as_str())
    .fetch_one(&mut **tx)
    .await?;

    if tier.is_unlimited() || account.last_reset_date >= now.date_naive() {
        return Ok(account);
    }

    let reset = sqlx::query_as::<_, QuotaAccount>(
        r#"
        UPDATE quota_accounts
        SET daily_available = daily_limit,
            consumed_today = 0,
            last_reset_date = $3,
            updated_at = NOW()
        WHERE owner_id = $1 AND tier = $2
        RETURNING *
        "#,
    )
    .bind(owner_id)
    .bind(tier.as_str())
    .bind(now.date_naive())
    .fetch_one(&mut **tx)
    .await?;
    Ok(reset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_prefers_daily_allowance() {
        assert_eq!(split_charge(20, 5), (5, 0));
        assert_eq!(split_charge(3, 5), (3, 2));
        assert_eq!(split_charge(0, 5), (0, 5));
        assert_eq!(split_charge(5, 5), (5, 0));
    }

    #[test]
    fn split_never_goes_negative() {
        // an unlimited account carries the -1 sentinel in daily_limit, but
        // its daily_available is stored as 0; guard against both anyway
        assert_eq!(split_charge(-1, 4), (0, 4));
    }

    #[test]
    fn owner_check() {
        assert!(ensure_owner(7, 7).is_ok());
        assert!(matches!(ensure_owner(7, 8), Err(AppError::Forbidden)));
    }
}
