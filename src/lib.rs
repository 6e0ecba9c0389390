//! Lifeline Sync - Crisis-aware billing webhook processing
//!
//! This crate turns signed payment-provider webhooks into per-subject
//! subscription state, while guaranteeing that a subject in crisis never
//! loses access to safety features because of a billing event.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
