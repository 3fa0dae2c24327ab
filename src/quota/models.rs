use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::entitlement::Tier;

/// Purchase lifecycle states. Transitions are one-way; nothing re-enters
/// `pending` after leaving it.
pub mod purchase_status {
    pub const PENDING: &str = "pending";
    pub const PROCESSING: &str = "processing";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
    pub const EXPIRED: &str = "expired";
}

/// Per-(owner, tier) balance record. `daily_available` only grows through
/// the daily reset; `purchased_balance` only grows through a completed
/// purchase and only shrinks through consumption.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QuotaAccount {
    pub owner_id: i32,
    pub tier: String,
    pub daily_limit: i32,
    pub daily_available: i32,
    pub purchased_balance: i32,
    pub consumed_today: i32,
    pub last_reset_date: NaiveDate,
    pub updated_at: DateTime<Utc>,
}

impl QuotaAccount {
    /// In-memory default for an account that has never been touched.
    /// Used by read-only views; write paths create the row instead.
    pub fn fresh(owner_id: i32, tier: Tier, now: DateTime<Utc>) -> Self {
        let limit = tier.daily_limit();
        QuotaAccount {
            owner_id,
            tier: tier.as_str().to_string(),
            daily_limit: limit,
            daily_available: if tier.is_unlimited() { 0 } else { limit },
            purchased_balance: 0,
            consumed_today: 0,
            last_reset_date: now.date_naive(),
            updated_at: now,
        }
    }
}

/// Immutable audit row, one per consumption.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub owner_id: i32,
    pub tier: String,
    pub amount: i32,
    pub from_daily: i32,
    pub from_purchased: i32,
    pub feature: String,
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Checkout attempt awaiting confirmation from the payment provider.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PendingPurchase {
    pub id: Uuid,
    pub order_id: String,
    pub owner_id: i32,
    pub token_amount: i32,
    pub amount_minor: i32,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of a consumption attempt. An insufficient balance is reported
/// here with `allowed = false` rather than as a transport error; transport
/// errors are reserved for validation, auth and contention failures.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumeOutcome {
    pub allowed: bool,
    pub tier: String,
    pub charged_from_daily: i32,
    pub charged_from_purchased: i32,
    pub daily_remaining: i32,
    pub purchased_remaining: i32,
    pub notes: Vec<String>,
}
