//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (value objects, IDs, errors)
//! - `subscription` - Per-subject state, grace periods, emergency overrides
//! - `webhook` - Signature verification, urgency, routing, handlers

pub mod foundation;
pub mod subscription;
pub mod webhook;
