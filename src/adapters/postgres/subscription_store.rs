//! PostgreSQL implementation of SubscriptionStore.
//!
//! Each subject is one row: the snapshot as JSONB plus a `version` column used
//! for compare-and-set and a `next_deadline` column the sweeper scans.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::domain::foundation::{DomainError, ErrorCode, SubjectId, Timestamp};
use crate::domain::subscription::SubscriptionState;
use crate::ports::{CasOutcome, SubscriptionStore};

pub struct PostgresSubscriptionStore {
    pool: PgPool,
}

impl PostgresSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Database row representation of a snapshot.
#[derive(Debug, sqlx::FromRow)]
struct StateRow {
    version: i64,
    snapshot: Json<SubscriptionState>,
}

impl StateRow {
    fn into_state(self) -> Result<SubscriptionState, DomainError> {
        let mut state = self.snapshot.0;
        state.version = u64::try_from(self.version).map_err(|_| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid version value: {}", self.version),
            )
        })?;
        Ok(state)
    }
}

fn db_error(context: &str, e: sqlx::Error) -> DomainError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            DomainError::unavailable(format!("{}: {}", context, e))
        }
        other => DomainError::new(ErrorCode::DatabaseError, format!("{}: {}", context, other)),
    }
}

fn to_db_version(version: u64) -> Result<i64, DomainError> {
    i64::try_from(version).map_err(|_| {
        DomainError::new(ErrorCode::DatabaseError, "Version exceeds database range")
    })
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    async fn get(&self, subject_id: &SubjectId) -> Result<Option<SubscriptionState>, DomainError> {
        let row: Option<StateRow> = sqlx::query_as(
            r#"
            SELECT version, snapshot
            FROM subscription_states
            WHERE subject_id = $1
            "#,
        )
        .bind(subject_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load subscription state", e))?;

        row.map(StateRow::into_state).transpose()
    }

    async fn compare_and_set(
        &self,
        subject_id: &SubjectId,
        expected_version: u64,
        mut new_state: SubscriptionState,
    ) -> Result<CasOutcome, DomainError> {
        let next_version = expected_version + 1;
        new_state.version = next_version;
        let next_deadline: Option<DateTime<Utc>> =
            new_state.next_deadline().map(|t| *t.as_datetime());

        let result = if expected_version == 0 {
            sqlx::query(
                r#"
                INSERT INTO subscription_states (subject_id, version, snapshot, next_deadline, updated_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (subject_id) DO NOTHING
                "#,
            )
            .bind(subject_id.as_str())
            .bind(to_db_version(next_version)?)
            .bind(Json(&new_state))
            .bind(next_deadline)
            .bind(new_state.updated_at.as_datetime())
            .execute(&self.pool)
            .await
        } else {
            sqlx::query(
                r#"
                UPDATE subscription_states SET
                    version = $2,
                    snapshot = $3,
                    next_deadline = $4,
                    updated_at = $5
                WHERE subject_id = $1 AND version = $6
                "#,
            )
            .bind(subject_id.as_str())
            .bind(to_db_version(next_version)?)
            .bind(Json(&new_state))
            .bind(next_deadline)
            .bind(new_state.updated_at.as_datetime())
            .bind(to_db_version(expected_version)?)
            .execute(&self.pool)
            .await
        }
        .map_err(|e| db_error("Failed to write subscription state", e))?;

        if result.rows_affected() == 0 {
            let current = self.get(subject_id).await?;
            return Ok(CasOutcome::Conflict(current));
        }

        Ok(CasOutcome::Applied(new_state))
    }

    async fn list_with_deadlines(
        &self,
        now: Timestamp,
    ) -> Result<Vec<SubscriptionState>, DomainError> {
        let rows: Vec<StateRow> = sqlx::query_as(
            r#"
            SELECT version, snapshot
            FROM subscription_states
            WHERE next_deadline IS NOT NULL AND next_deadline <= $1
            ORDER BY next_deadline
            "#,
        )
        .bind(now.as_datetime())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list due subscriptions", e))?;

        rows.into_iter()
            .map(StateRow::into_state)
            .filter(|s| s.as_ref().map_or(true, |s| s.has_due_deadline(now)))
            .collect()
    }
}
