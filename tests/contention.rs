use serde_json::json;
use sqlx::PgPool;
use usage_backend::entitlement::Tier;
use usage_backend::error::AppError;
use usage_backend::quota::QuotaService;

async fn seed_user(pool: &PgPool) -> i32 {
    sqlx::query_scalar("INSERT INTO users (email) VALUES ($1) RETURNING id")
        .bind(format!("{}@example.com", uuid::Uuid::new_v4()))
        .fetch_one(pool)
        .await
        .unwrap()
}

// Lives in its own test binary: the lock timeout is a process-wide Lazy,
// and this test needs it short before any transaction reads it.
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn contended_account_surfaces_a_retryable_error(pool: PgPool) {
    std::env::set_var("QUOTA_LOCK_TIMEOUT_MS", "200");
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let owner = seed_user(&pool).await;
    sqlx::query(
        "INSERT INTO quota_accounts (owner_id, tier, daily_limit, daily_available, last_reset_date) \
         VALUES ($1, 'standard', 20, 20, CURRENT_DATE)",
    )
    .bind(owner)
    .execute(&pool)
    .await
    .unwrap();

    let service = QuotaService::new(pool.clone());

    // another session holds the row lock for longer than the timeout
    let mut holder = pool.begin().await.unwrap();
    sqlx::query("SELECT * FROM quota_accounts WHERE owner_id = $1 AND tier = 'standard' FOR UPDATE")
        .bind(owner)
        .fetch_one(&mut *holder)
        .await
        .unwrap();

    let err = service
        .consume(owner, owner, Tier::Standard, 1, "generation", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::LockContended));

    // nothing was charged while the lock was held
    let available: i32 = sqlx::query_scalar(
        "SELECT daily_available FROM quota_accounts WHERE owner_id = $1 AND tier = 'standard'",
    )
    .bind(owner)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(available, 20);

    // once the holder lets go the same call goes through
    holder.rollback().await.unwrap();
    let outcome = service
        .consume(owner, owner, Tier::Standard, 1, "generation", json!({}))
        .await
        .unwrap();
    assert!(outcome.allowed);
    assert_eq!(outcome.daily_remaining, 19);
}
