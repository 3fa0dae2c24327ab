use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;

/// Secret used for JWT verification. Must be set via the `JWT_SECRET` env variable.
pub static JWT_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("JWT_SECRET").expect("JWT_SECRET must be set"));

/// Shared secret for payment webhook HMAC signatures. Must be set via
/// `PAYMENT_WEBHOOK_SECRET`.
pub static PAYMENT_WEBHOOK_SECRET: Lazy<String> = Lazy::new(|| {
    std::env::var("PAYMENT_WEBHOOK_SECRET").expect("PAYMENT_WEBHOOK_SECRET must be set")
});

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// When set to a truthy value, allows the application to continue running even if
/// database migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});

/// End of the global launch-trial window during which every user is entitled
/// to the standard tier. RFC 3339 timestamp; unset disables the window.
pub static LAUNCH_TRIAL_ENDS_AT: Lazy<Option<DateTime<Utc>>> = Lazy::new(|| {
    read_optional_env("LAUNCH_TRIAL_ENDS_AT").map(|raw| {
        raw.parse::<DateTime<Utc>>()
            .unwrap_or_else(|err| panic!("failed to parse LAUNCH_TRIAL_ENDS_AT: {err}"))
    })
});

/// Grace days after the launch-trial cutoff for users that existed before it.
pub static LAUNCH_TRIAL_GRACE_DAYS: Lazy<i64> = Lazy::new(|| {
    std::env::var("LAUNCH_TRIAL_GRACE_DAYS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value >= 0)
        .unwrap_or(7)
});

/// Lifetime of an unconfirmed pending purchase, in minutes.
pub static PURCHASE_TTL_MINUTES: Lazy<i64> = Lazy::new(|| {
    std::env::var("PURCHASE_TTL_MINUTES")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(15)
});

/// Cadence of the pending-purchase expiry sweep.
pub static PURCHASE_SWEEP_INTERVAL_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("PURCHASE_SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(60)
});

/// How long a transaction waits on a contended account row before giving up.
pub static QUOTA_LOCK_TIMEOUT_MS: Lazy<u64> = Lazy::new(|| {
    std::env::var("QUOTA_LOCK_TIMEOUT_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(5_000)
});

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
