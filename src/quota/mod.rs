pub mod api;
pub mod models;
pub mod purchases;
pub mod service;
pub mod sweeper;

pub use models::{ConsumeOutcome, PendingPurchase, QuotaAccount, UsageRecord};
pub use purchases::PurchaseService;
pub use service::{split_charge, QuotaService};
pub use sweeper::{process_tick as run_purchase_sweep_tick, spawn as spawn_purchase_sweeper};
