use chrono::{Duration, Utc};
use sqlx::PgPool;
use usage_backend::entitlement::{resolve_tier, Tier};
use usage_backend::error::AppError;
use uuid::Uuid;

async fn seed_user(pool: &PgPool) -> i32 {
    sqlx::query_scalar("INSERT INTO users (email) VALUES ($1) RETURNING id")
        .bind(format!("{}@example.com", Uuid::new_v4()))
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn seed_subscription(pool: &PgPool, owner_id: i32, plan_tier: &str, status: &str) {
    sqlx::query(
        "INSERT INTO subscription_records (id, owner_id, provider, plan_tier, status, period_start, period_end) \
         VALUES ($1, $2, 'stripe', $3, $4, NOW(), NULL)",
    )
    .bind(Uuid::new_v4())
    .bind(owner_id)
    .bind(plan_tier)
    .bind(status)
    .execute(pool)
    .await
    .unwrap();
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn user_with_no_entitlements_is_free(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let owner = seed_user(&pool).await;
    let tier = resolve_tier(&pool, owner, Utc::now()).await.unwrap();
    assert_eq!(tier, Tier::Free);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn unknown_user_is_not_found(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let err = resolve_tier(&pool, 999_999, Utc::now()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn active_subscription_grants_its_tier(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let owner = seed_user(&pool).await;
    seed_subscription(&pool, owner, "premium", "active").await;
    let tier = resolve_tier(&pool, owner, Utc::now()).await.unwrap();
    assert_eq!(tier, Tier::Premium);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn mid_upgrade_overlap_resolves_to_the_higher_tier(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let owner = seed_user(&pool).await;
    seed_subscription(&pool, owner, "standard", "active").await;
    seed_subscription(&pool, owner, "plus", "active").await;
    let tier = resolve_tier(&pool, owner, Utc::now()).await.unwrap();
    assert_eq!(tier, Tier::Plus);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn admin_override_wins_over_subscriptions(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let owner = seed_user(&pool).await;
    seed_subscription(&pool, owner, "standard", "active").await;
    sqlx::query("UPDATE users SET premium_override = TRUE WHERE id = $1")
        .bind(owner)
        .execute(&pool)
        .await
        .unwrap();
    let tier = resolve_tier(&pool, owner, Utc::now()).await.unwrap();
    assert_eq!(tier, Tier::Premium);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn premium_trial_expires(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let owner = seed_user(&pool).await;
    let now = Utc::now();
    sqlx::query("INSERT INTO premium_trials (user_id, started_at, ends_at) VALUES ($1, $2, $3)")
        .bind(owner)
        .bind(now - Duration::days(10))
        .bind(now - Duration::days(3))
        .execute(&pool)
        .await
        .unwrap();
    assert_eq!(resolve_tier(&pool, owner, now).await.unwrap(), Tier::Free);
    // the same trial was premium while it lasted
    let during = now - Duration::days(5);
    assert_eq!(
        resolve_tier(&pool, owner, during).await.unwrap(),
        Tier::Premium
    );
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn lapsed_period_end_revokes_the_tier(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let owner = seed_user(&pool).await;
    sqlx::query(
        "INSERT INTO subscription_records (id, owner_id, provider, plan_tier, status, period_start, period_end) \
         VALUES ($1, $2, 'google_play', 'plus', 'pending_cancel', NOW() - INTERVAL '60 days', NOW() - INTERVAL '1 day')",
    )
    .bind(Uuid::new_v4())
    .bind(owner)
    .execute(&pool)
    .await
    .unwrap();
    let tier = resolve_tier(&pool, owner, Utc::now()).await.unwrap();
    assert_eq!(tier, Tier::Free);
}
