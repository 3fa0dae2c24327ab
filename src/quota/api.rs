use axum::{extract::Extension, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;

use crate::entitlement::{resolve_tier, Tier};
use crate::error::AppResult;
use crate::extractor::AuthUser;

use super::models::{ConsumeOutcome, PendingPurchase, QuotaAccount};
use super::purchases::PurchaseService;
use super::service::QuotaService;

#[derive(Debug, Serialize)]
pub struct EntitlementEnvelope {
    pub tier: Tier,
    pub daily_limit: i32,
    pub unlimited: bool,
}

pub async fn get_entitlement(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
) -> AppResult<Json<EntitlementEnvelope>> {
    let tier = resolve_tier(&pool, user.user_id, Utc::now()).await?;
    Ok(Json(EntitlementEnvelope {
        tier,
        daily_limit: tier.daily_limit(),
        unlimited: tier.is_unlimited(),
    }))
}

pub async fn get_quota(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
) -> AppResult<Json<QuotaAccount>> {
    let tier = resolve_tier(&pool, user.user_id, Utc::now()).await?;
    let service = QuotaService::new(pool);
    let snapshot = service
        .account_snapshot(user.user_id, user.user_id, tier)
        .await?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    pub cost: i32,
    pub feature: String,
    #[serde(default)]
    pub context: Value,
}

pub async fn consume_quota(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Json(payload): Json<ConsumeRequest>,
) -> AppResult<Json<ConsumeOutcome>> {
    let tier = resolve_tier(&pool, user.user_id, Utc::now()).await?;
    let service = QuotaService::new(pool);
    let outcome = service
        .consume(
            user.user_id,
            user.user_id,
            tier,
            payload.cost,
            &payload.feature,
            payload.context,
        )
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct CreatePurchaseRequest {
    pub order_id: String,
    pub token_amount: i32,
    pub amount_minor: i32,
}

pub async fn create_purchase(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Json(payload): Json<CreatePurchaseRequest>,
) -> AppResult<(StatusCode, Json<PendingPurchase>)> {
    let service = PurchaseService::new(pool);
    let purchase = service
        .create_pending_purchase(
            user.user_id,
            user.user_id,
            &payload.order_id,
            payload.token_amount,
            payload.amount_minor,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(purchase)))
}
