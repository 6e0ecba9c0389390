//! AuditDispatcher - Background delivery of audit records.
//!
//! The request path never awaits an audit write. It hands records to an
//! [`AuditQueue`] (a bounded channel) and moves on; the dispatcher drains the
//! channel into the configured [`AuditSink`].
//!
//! When the queue is full the record is dropped with a `warn!`. Losing an
//! audit line is preferable to delaying a safety-critical response.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::domain::subscription::AuditRecord;
use crate::ports::AuditSink;

/// Producer handle for audit records. Cheap to clone.
#[derive(Clone)]
pub struct AuditQueue {
    tx: mpsc::Sender<AuditRecord>,
}

impl AuditQueue {
    /// Enqueues a record without waiting. Returns false if it was dropped.
    pub fn emit(&self, record: AuditRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(record)) => {
                tracing::warn!(
                    outcome = record.outcome.as_str(),
                    event_id = ?record.event_id,
                    "Audit queue full, dropping record"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Audit dispatcher stopped, dropping record");
                false
            }
        }
    }
}

/// Consumer side: writes queued records to the sink.
pub struct AuditDispatcher {
    rx: mpsc::Receiver<AuditRecord>,
    sink: Arc<dyn AuditSink>,
}

impl AuditDispatcher {
    /// Creates a queue/dispatcher pair with the given capacity.
    pub fn channel(sink: Arc<dyn AuditSink>, capacity: usize) -> (AuditQueue, AuditDispatcher) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (AuditQueue { tx }, AuditDispatcher { rx, sink })
    }

    /// Drains the queue until shutdown, then flushes what is already queued.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        self.flush().await;
                        return;
                    }
                }
                next = self.rx.recv() => match next {
                    Some(record) => self.write(record).await,
                    None => return,
                },
            }
        }
    }

    /// Writes every record currently queued. Returns how many were written.
    pub async fn flush(&mut self) -> usize {
        let mut written = 0;
        while let Ok(record) = self.rx.try_recv() {
            self.write(record).await;
            written += 1;
        }
        written
    }

    async fn write(&self, record: AuditRecord) {
        let id = record.id;
        if let Err(e) = self.sink.append(record).await {
            tracing::error!(audit_id = %id, error = %e, "Failed to append audit record");
        }
    }
}
