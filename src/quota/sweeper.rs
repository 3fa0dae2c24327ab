use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::time::{self, Duration as TokioDuration};
use tracing::{info, warn};

use crate::config;

use super::purchases::PurchaseService;

/// Periodic sweep that expires pending purchases whose confirmation window
/// has lapsed. The expiry timestamp itself is owned by the purchase rows.
pub fn spawn(pool: PgPool) {
    let interval = TokioDuration::from_secs(*config::PURCHASE_SWEEP_INTERVAL_SECS);
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = process_tick(&pool, Utc::now()).await {
                warn!(?err, "pending purchase expiry sweep failed");
            }
        }
    });
}

pub async fn process_tick(pool: &PgPool, now: DateTime<Utc>) -> Result<u64> {
    let service = PurchaseService::new(pool.clone());
    let expired = service.expire_stale(now).await?;
    if expired > 0 {
        info!(expired, "expired stale pending purchases");
    }
    Ok(expired)
}
