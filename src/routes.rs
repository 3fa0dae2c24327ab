use axum::{
    routing::{get, post},
    Router,
};

use crate::{quota, webhooks};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/entitlement", get(quota::api::get_entitlement))
        .route("/api/quota", get(quota::api::get_quota))
        .route("/api/quota/consume", post(quota::api::consume_quota))
        .route("/api/purchases", post(quota::api::create_purchase))
        .route("/api/webhooks/payments", post(webhooks::payment_webhook))
}
