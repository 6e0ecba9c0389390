//! Redis adapters.

mod deduplicator;

pub use deduplicator::RedisDeduplicator;
