//! PostgreSQL implementation of AuditSink.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::foundation::{DomainError, ErrorCode};
use crate::domain::subscription::AuditRecord;
use crate::ports::AuditSink;

/// Append-only audit table writer. Never issues UPDATE or DELETE.
pub struct PostgresAuditSink {
    pool: PgPool,
}

impl PostgresAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PostgresAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<(), DomainError> {
        let processing_time_ms = record
            .processing_time_ms
            .map(|ms| i64::try_from(ms).unwrap_or(i64::MAX));

        sqlx::query(
            r#"
            INSERT INTO audit_records (
                id, event_id, subject_id, transition_from, transition_to,
                processing_time_ms, urgent, sla_compliant, outcome, detail, recorded_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.event_id.as_ref().map(|id| id.as_str()))
        .bind(record.subject_id.as_ref().map(|id| id.as_str()))
        .bind(record.transition_from.map(|s| s.as_str()))
        .bind(record.transition_to.map(|s| s.as_str()))
        .bind(processing_time_ms)
        .bind(record.urgent)
        .bind(record.sla_compliant)
        .bind(record.outcome.as_str())
        .bind(&record.detail)
        .bind(record.timestamp.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Failed to append audit record: {}", e),
            )
        })?;

        Ok(())
    }
}
