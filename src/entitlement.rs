use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Row};

use crate::config;
use crate::error::AppResult;

/// Sentinel daily limit meaning "no daily cap".
pub const UNLIMITED: i32 = -1;

/// Subscription statuses that currently entitle the owner to the plan tier:
/// active, in-trial, authenticated but awaiting first charge, charge in
/// progress, and scheduled-for-cancellation but unexpired.
pub const ENTITLED_STATUSES: [&str; 5] =
    ["active", "trialing", "authenticated", "billing", "pending_cancel"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Standard,
    Plus,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Standard => "standard",
            Tier::Plus => "plus",
            Tier::Premium => "premium",
        }
    }

    pub fn parse(raw: &str) -> Option<Tier> {
        match raw {
            "free" => Some(Tier::Free),
            "standard" => Some(Tier::Standard),
            "plus" => Some(Tier::Plus),
            "premium" => Some(Tier::Premium),
            _ => None,
        }
    }

    /// Recurring daily allowance for the tier.
    pub fn daily_limit(&self) -> i32 {
        match self {
            Tier::Free => 5,
            Tier::Standard => 20,
            Tier::Plus => 75,
            Tier::Premium => UNLIMITED,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.daily_limit() == UNLIMITED
    }
}

/// Subscription state as written by the subscription webhook handler.
/// This service only ever reads these rows.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SubscriptionRecord {
    pub id: uuid::Uuid,
    pub owner_id: i32,
    pub provider: String,
    pub plan_tier: String,
    pub status: String,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything the tier decision depends on, loaded in one pass so the
/// decision itself stays a pure function.
#[derive(Debug, Clone)]
pub struct ResolverState {
    pub premium_override: bool,
    pub user_created_at: DateTime<Utc>,
    pub trial: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub subscriptions: Vec<SubscriptionRecord>,
}

/// Global launch-trial window configuration.
#[derive(Debug, Clone, Copy)]
pub struct TrialWindow {
    pub ends_at: Option<DateTime<Utc>>,
    pub grace_days: i64,
}

impl TrialWindow {
    pub fn from_env() -> Self {
        TrialWindow {
            ends_at: *config::LAUNCH_TRIAL_ENDS_AT,
            grace_days: *config::LAUNCH_TRIAL_GRACE_DAYS,
        }
    }
}

/// Resolves the caller's tier at `now`. Evaluated fresh on every call;
/// deliberately uncached.
pub async fn resolve_tier(pool: &PgPool, owner_id: i32, now: DateTime<Utc>) -> AppResult<Tier> {
    let state = load_state(pool, owner_id).await?;
    Ok(resolve(&state, now, &TrialWindow::from_env()))
}

pub async fn load_state(pool: &PgPool, owner_id: i32) -> AppResult<ResolverState> {
    let user = sqlx::query("SELECT premium_override, created_at FROM users WHERE id = $1")
        .bind(owner_id)
        .fetch_optional(pool)
        .await?
        .ok_or(crate::error::AppError::NotFound)?;

    let trial: Option<(DateTime<Utc>, DateTime<Utc>)> =
        sqlx::query_as("SELECT started_at, ends_at FROM premium_trials WHERE user_id = $1")
            .bind(owner_id)
            .fetch_optional(pool)
            .await?;

    let subscriptions = sqlx::query_as::<_, SubscriptionRecord>(
        "SELECT * FROM subscription_records WHERE owner_id = $1",
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await?;

    Ok(ResolverState {
        premium_override: user.get("premium_override"),
        user_created_at: user.get("created_at"),
        trial,
        subscriptions,
    })
}

/// Priority order, first match wins:
/// 1. administrative override
/// 2. active per-user premium trial
/// 3. best currently-entitled paid subscription (higher tier wins over
///    more recent when several overlap, e.g. mid-upgrade)
/// 4. administrator-set free subscription (overrides the launch trial)
/// 5. global launch-trial window
/// 6. post-cutoff grace period for users that existed before the cutoff
/// 7. free
pub fn resolve(state: &ResolverState, now: DateTime<Utc>, window: &TrialWindow) -> Tier {
    if state.premium_override {
        return Tier::Premium;
    }

    if let Some((started_at, ends_at)) = state.trial {
        if started_at <= now && now < ends_at {
            return Tier::Premium;
        }
    }

    let entitled = |sub: &SubscriptionRecord| {
        ENTITLED_STATUSES.contains(&sub.status.as_str())
            && sub.period_end.map_or(true, |end| end > now)
    };

    let best_paid = state
        .subscriptions
        .iter()
        .filter(|sub| entitled(sub))
        .filter_map(|sub| Tier::parse(&sub.plan_tier))
        .filter(|tier| *tier > Tier::Free)
        .max();
    if let Some(tier) = best_paid {
        return tier;
    }

    let admin_free = state
        .subscriptions
        .iter()
        .any(|sub| entitled(sub) && Tier::parse(&sub.plan_tier) == Some(Tier::Free));
    if admin_free {
        return Tier::Free;
    }

    if let Some(cutoff) = window.ends_at {
        if now < cutoff {
            return Tier::Standard;
        }
        if state.user_created_at < cutoff && now < cutoff + Duration::days(window.grace_days) {
            return Tier::Standard;
        }
    }

    Tier::Free
}
