//! AuditSink port - Append-only audit trail.

use async_trait::async_trait;

use crate::domain::foundation::DomainError;
use crate::domain::subscription::AuditRecord;

/// Port for persisting audit records.
///
/// Records are never updated or deleted through this port. Writes happen off
/// the request path (see `AuditDispatcher`), so implementations may block.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<(), DomainError>;
}
