//! Redis-backed deduplicator for multi-instance deployments.
//!
//! Uses `SET key <seen_at> NX EX <retention>`: the first writer gets `OK`, every
//! later writer within the retention window gets nil. Redis expires entries
//! natively, so `purge_expired` has nothing to do.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::domain::foundation::{DomainError, ErrorCode, EventId, Timestamp};
use crate::ports::{DedupOutcome, Deduplicator};

const KEY_PREFIX: &str = "lifeline:dedup:";

#[derive(Clone)]
pub struct RedisDeduplicator {
    conn: MultiplexedConnection,
    retention_secs: u64,
}

impl RedisDeduplicator {
    pub fn new(conn: MultiplexedConnection, retention_secs: u64) -> Self {
        Self {
            conn,
            retention_secs: retention_secs.max(1),
        }
    }

    fn key(event_id: &EventId) -> String {
        format!("{}{}", KEY_PREFIX, event_id.as_str())
    }
}

fn cache_error(e: redis::RedisError) -> DomainError {
    DomainError::new(ErrorCode::CacheError, format!("Redis deduplicator: {}", e))
}

#[async_trait]
impl Deduplicator for RedisDeduplicator {
    async fn check_and_record(
        &self,
        event_id: &EventId,
        seen_at: Timestamp,
    ) -> Result<DedupOutcome, DomainError> {
        let mut conn = self.conn.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::key(event_id))
            .arg(seen_at.as_unix_secs())
            .arg("NX")
            .arg("EX")
            .arg(self.retention_secs)
            .query_async(&mut conn)
            .await
            .map_err(cache_error)?;

        Ok(match reply {
            Some(_) => DedupOutcome::FirstSeen,
            None => DedupOutcome::Duplicate,
        })
    }

    async fn release(&self, event_id: &EventId) -> Result<(), DomainError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::key(event_id))
            .await
            .map_err(cache_error)?;
        Ok(())
    }

    async fn purge_expired(&self, _now: Timestamp) -> Result<u64, DomainError> {
        Ok(0)
    }
}

impl std::fmt::Debug for RedisDeduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDeduplicator")
            .field("retention_secs", &self.retention_secs)
            .finish_non_exhaustive()
    }
}
