//! Application layer - Orchestration of the webhook pipeline.
//!
//! This layer wires domain logic to ports. `StateProjector` is the single
//! writer of subscription state; everything else (the pipeline, the override
//! controller, the expiry sweep) hands it an outcome to apply.
//!
//! - `WebhookPipeline` - validate, classify, dedup, route, project
//! - `PerformanceGovernor` - latency budgets and forced completion
//! - `EmergencyOverrideController` - overrides and crisis signals
//! - `SafetyAccessIndex` - store-independent safety-access answers
//! - `ExpirySweeper` / `AuditDispatcher` - background workers

mod audit_dispatcher;
mod emergency_override;
mod governor;
mod pipeline;
mod projector;
mod safety_access;
mod sweeper;

pub use audit_dispatcher::{AuditDispatcher, AuditQueue};
pub use emergency_override::{Deactivation, EmergencyOverrideController};
pub use governor::{GovernedOutcome, PerformanceGovernor, DEFAULT_FORCED_COMPLETION_RESERVE_MS};
pub use pipeline::{Accepted, Rejection, WebhookPipeline};
pub use projector::{Projection, ProjectionError, StateProjector, DEFAULT_MAX_ATTEMPTS};
pub use safety_access::SafetyAccessIndex;
pub use sweeper::{ExpirySweeper, ExpirySweeperConfig, SweepReport};
