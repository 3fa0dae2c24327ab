use axum::{body::Bytes, extract::Extension, http::HeaderMap, http::StatusCode};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use sqlx::PgPool;

use crate::config;
use crate::error::{AppError, AppResult};
use crate::quota::PurchaseService;

/// Payment provider callback. The provider signs the raw body with the
/// shared secret; an unverifiable request is rejected before any parsing.
#[derive(Debug, Deserialize)]
pub struct PaymentWebhookRequest {
    pub event: String,
    pub owner_id: i32,
    pub order_id: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub data: Value,
}

pub const SIGNATURE_HEADER: &str = "x-payment-signature";

pub async fn payment_webhook(
    Extension(pool): Extension<PgPool>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<StatusCode> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::Unauthorized)?;
    if !verify_signature(config::PAYMENT_WEBHOOK_SECRET.as_bytes(), &body, signature) {
        return Err(AppError::Unauthorized);
    }

    let payload: PaymentWebhookRequest = serde_json::from_slice(&body)
        .map_err(|err| AppError::BadRequest(format!("malformed webhook payload: {err}")))?;

    let service = PurchaseService::new(pool);
    match payload.event.as_str() {
        "payment.authorized" => {
            service
                .claim_for_verification(&payload.order_id, payload.owner_id)
                .await?;
            Ok(StatusCode::OK)
        }
        "payment.captured" => {
            service
                .complete_purchase(&payload.order_id, payload.owner_id)
                .await?;
            Ok(StatusCode::OK)
        }
        "payment.failed" => {
            service
                .fail_purchase(&payload.order_id, payload.owner_id)
                .await?;
            Ok(StatusCode::OK)
        }
        other => {
            tracing::debug!(event = other, "ignoring unhandled payment event");
            Ok(StatusCode::ACCEPTED)
        }
    }
}

pub fn verify_signature(secret: &[u8], body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
