//! In-memory audit log with a live export stream.

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use crate::domain::foundation::{DomainError, SubjectId};
use crate::domain::subscription::{AuditOutcome, AuditRecord};
use crate::ports::AuditSink;

/// Append-only audit log.
///
/// Every appended record is also sent on a broadcast channel so exporters
/// can tail the log without polling.
pub struct InMemoryAuditLog {
    records: RwLock<Vec<AuditRecord>>,
    export: broadcast::Sender<AuditRecord>,
}

impl InMemoryAuditLog {
    pub fn new(export_capacity: usize) -> Self {
        let (export, _) = broadcast::channel(export_capacity.max(1));
        Self {
            records: RwLock::new(Vec::new()),
            export,
        }
    }

    /// Subscribes to records appended from now on.
    pub fn export_stream(&self) -> broadcast::Receiver<AuditRecord> {
        self.export.subscribe()
    }

    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.read().await.clone()
    }

    pub async fn records_for_subject(&self, subject_id: &SubjectId) -> Vec<AuditRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.subject_id.as_ref() == Some(subject_id))
            .cloned()
            .collect()
    }

    pub async fn count_outcome(&self, outcome: AuditOutcome) -> usize {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.outcome == outcome)
            .count()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for InMemoryAuditLog {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditLog {
    async fn append(&self, record: AuditRecord) -> Result<(), DomainError> {
        self.records.write().await.push(record.clone());
        // No exporters attached is fine.
        let _ = self.export.send(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::Timestamp;

    #[tokio::test]
    async fn append_stores_and_exports() {
        let log = InMemoryAuditLog::default();
        let mut export = log.export_stream();
        let subject = SubjectId::new("u1").unwrap();

        log.append(AuditRecord::new(AuditOutcome::Applied, Timestamp::now()).for_subject(&subject))
            .await
            .unwrap();

        assert_eq!(log.len().await, 1);
        assert_eq!(log.records_for_subject(&subject).await.len(), 1);
        assert_eq!(export.recv().await.unwrap().outcome, AuditOutcome::Applied);
    }

    #[tokio::test]
    async fn records_are_kept_in_append_order() {
        let log = InMemoryAuditLog::default();
        log.append(AuditRecord::new(AuditOutcome::Rejected, Timestamp::now()))
            .await
            .unwrap();
        log.append(AuditRecord::new(AuditOutcome::Applied, Timestamp::now()))
            .await
            .unwrap();

        let records = log.records().await;
        assert_eq!(records[0].outcome, AuditOutcome::Rejected);
        assert_eq!(records[1].outcome, AuditOutcome::Applied);
        assert_eq!(log.count_outcome(AuditOutcome::Applied).await, 1);
    }
}
