//! Dead letter queue for deliveries that exhausted their retries.
//!
//! Keeps the failed envelope plus failure metadata so operators can
//! investigate and reprocess. The saga itself never reads the DLQ; it is
//! an observability and incident-response surface.

use chrono::{DateTime, Utc};
use purchase_saga_core::envelope::Envelope;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors surfaced by DLQ operations.
#[derive(Error, Debug, Clone)]
pub enum DlqError {
    /// The backing store rejected the operation
    #[error("dead letter queue error: {0}")]
    Storage(String),

    /// No entry with the given id
    #[error("dead letter entry {0} not found")]
    NotFound(u64),
}

/// Status of a failed delivery in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlqStatus {
    /// Pending investigation or reprocessing
    Pending,
    /// Successfully reprocessed
    Resolved,
    /// Permanently discarded
    Discarded,
}

impl DlqStatus {
    /// Stable string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }
}

/// A delivery that could not be processed, as reported by the runner.
#[derive(Debug, Clone)]
pub struct FailureReport {
    /// Participant whose handler failed
    pub participant: &'static str,
    /// The envelope that could not be processed
    pub envelope: Envelope,
    /// Final error message
    pub error: String,
    /// Attempts made, including the first
    pub attempts: usize,
}

/// A stored dead-letter entry.
#[derive(Debug, Clone)]
pub struct FailedDelivery {
    /// Queue-assigned identifier
    pub id: u64,
    /// Participant whose handler failed
    pub participant: String,
    /// The envelope that could not be processed
    pub envelope: Envelope,
    /// Final error message
    pub error: String,
    /// Attempts made, including the first
    pub attempts: usize,
    /// When the delivery first failed
    pub first_failed_at: DateTime<Utc>,
    /// When the delivery most recently failed
    pub last_failed_at: DateTime<Utc>,
    /// Current status
    pub status: DlqStatus,
    /// Who resolved the entry, if resolved
    pub resolved_by: Option<String>,
}

/// Boxed future returned by DLQ operations.
pub type DlqFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DlqError>> + Send + 'a>>;

/// Dead letter queue interface.
pub trait DeadLetterQueue: Send + Sync {
    /// Record a failed delivery, returning its queue id.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::Storage`] if the entry cannot be recorded.
    fn push(&self, report: FailureReport) -> DlqFuture<'_, u64>;

    /// List pending entries, oldest first, up to `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::Storage`] if the queue cannot be read.
    fn list_pending(&self, limit: usize) -> DlqFuture<'_, Vec<FailedDelivery>>;

    /// Mark an entry resolved.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::NotFound`] if no entry has the given id.
    fn mark_resolved<'a>(&'a self, id: u64, resolved_by: &str) -> DlqFuture<'a, ()>;

    /// Number of pending entries.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::Storage`] if the queue cannot be read.
    fn depth(&self) -> DlqFuture<'_, usize>;
}

/// In-memory dead letter queue.
#[derive(Default)]
pub struct InMemoryDeadLetterQueue {
    next_id: AtomicU64,
    entries: Mutex<Vec<FailedDelivery>>,
}

impl InMemoryDeadLetterQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeadLetterQueue for InMemoryDeadLetterQueue {
    fn push(&self, report: FailureReport) -> DlqFuture<'_, u64> {
        Box::pin(async move {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            let now = Utc::now();

            metrics::counter!("saga.dlq.pushed", "participant" => report.participant)
                .increment(1);
            tracing::error!(
                participant = report.participant,
                event_type = %report.envelope.event_type,
                attempts = report.attempts,
                error = %report.error,
                dlq_id = id,
                "delivery dead-lettered"
            );

            self.entries.lock().await.push(FailedDelivery {
                id,
                participant: report.participant.to_string(),
                envelope: report.envelope,
                error: report.error,
                attempts: report.attempts,
                first_failed_at: now,
                last_failed_at: now,
                status: DlqStatus::Pending,
                resolved_by: None,
            });
            Ok(id)
        })
    }

    fn list_pending(&self, limit: usize) -> DlqFuture<'_, Vec<FailedDelivery>> {
        Box::pin(async move {
            Ok(self
                .entries
                .lock()
                .await
                .iter()
                .filter(|entry| entry.status == DlqStatus::Pending)
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn mark_resolved<'a>(&'a self, id: u64, resolved_by: &str) -> DlqFuture<'a, ()> {
        let resolved_by = resolved_by.to_string();
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            let entry = entries
                .iter_mut()
                .find(|entry| entry.id == id)
                .ok_or(DlqError::NotFound(id))?;
            entry.status = DlqStatus::Resolved;
            entry.resolved_by = Some(resolved_by);
            Ok(())
        })
    }

    fn depth(&self) -> DlqFuture<'_, usize> {
        Box::pin(async move {
            Ok(self
                .entries
                .lock()
                .await
                .iter()
                .filter(|entry| entry.status == DlqStatus::Pending)
                .count())
        })
    }
}
