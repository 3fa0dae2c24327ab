pub mod config;
pub mod entitlement;
pub mod error;
pub mod extractor;
pub mod quota;
pub mod routes;
pub mod webhooks;
