//! PostgreSQL adapters.
//!
//! Schema lives in `migrations/` and is applied at startup with
//! `sqlx::migrate!`.

mod audit_sink;
mod subscription_store;

pub use audit_sink::PostgresAuditSink;
pub use subscription_store::PostgresSubscriptionStore;
