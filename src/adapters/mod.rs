//! Adapters - Implementations of port interfaces.
//!
//! - `http` - REST API for the provider and the crisis subsystem
//! - `websocket` - Live snapshot channels (implements `StatePublisher`)
//! - `memory` - In-process store, dedup and audit log, plus fault injection
//! - `postgres` - Durable subscription store and audit sink
//! - `redis` - Shared deduplicator for multi-instance deployments

pub mod http;
pub mod memory;
pub mod postgres;
pub mod redis;
pub mod websocket;
