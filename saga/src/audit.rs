//! Audit trail consumer.
//!
//! The audit log subsystem itself lives elsewhere; this module is the
//! consumer side: a participant subscribed to every saga channel that
//! buffers entries and hands them to an [`AuditSink`] in batches, plus a
//! retention cleanup pass. The in-memory sink backs tests and the demo
//! binary.

use chrono::{DateTime, Utc};
use purchase_saga_core::clock::Clock;
use purchase_saga_core::envelope::Envelope;
use purchase_saga_core::events::channels;
use purchase_saga_core::types::OrderId;
use purchase_saga_runtime::{HandlerError, HandlerFuture, Participant};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

/// Audit sink failure.
#[derive(Error, Debug, Clone)]
#[error("audit sink failure: {0}")]
pub struct AuditError(pub String);

/// One recorded saga event.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    /// Event type of the recorded envelope
    pub event_type: String,
    /// Order the event belongs to, when the payload carries one
    pub order_id: Option<OrderId>,
    /// Envelope timestamp
    pub timestamp: DateTime<Utc>,
    /// Full structural payload
    pub payload: serde_json::Value,
}

impl AuditEntry {
    /// Build an entry from an envelope, pulling `orderId` out of the
    /// payload when present.
    #[must_use]
    pub fn from_envelope(envelope: &Envelope) -> Self {
        let order_id = envelope
            .data
            .get("orderId")
            .and_then(serde_json::Value::as_str)
            .and_then(|raw| raw.parse::<Uuid>().ok())
            .map(OrderId::from_uuid);
        Self {
            event_type: envelope.event_type.clone(),
            order_id,
            timestamp: envelope.timestamp,
            payload: envelope.data.clone(),
        }
    }
}

/// Boxed future returned by sink operations.
pub type AuditFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AuditError>> + Send + 'a>>;

/// Append-only audit sink.
pub trait AuditSink: Send + Sync {
    /// Append a batch of entries.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] if the batch cannot be persisted.
    fn append(&self, batch: Vec<AuditEntry>) -> AuditFuture<'_, ()>;

    /// Purge entries older than `cutoff`. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] if the purge fails.
    fn purge_before(&self, cutoff: DateTime<Utc>) -> AuditFuture<'_, usize>;
}

/// In-memory [`AuditSink`].
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything persisted so far.
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, batch: Vec<AuditEntry>) -> AuditFuture<'_, ()> {
        Box::pin(async move {
            self.entries.lock().await.extend(batch);
            Ok(())
        })
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> AuditFuture<'_, usize> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            let before = entries.len();
            entries.retain(|entry| entry.timestamp >= cutoff);
            Ok(before - entries.len())
        })
    }
}

/// Participant that records every saga event into the sink, batched.
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    buffer: Mutex<Vec<AuditEntry>>,
    batch_size: usize,
}

impl AuditRecorder {
    /// Create a recorder flushing every `batch_size` entries.
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>, clock: Arc<dyn Clock>, batch_size: usize) -> Self {
        Self {
            sink,
            clock,
            buffer: Mutex::new(Vec::new()),
            batch_size: batch_size.max(1),
        }
    }

    /// Hand the buffered entries to the sink. Returns how many were
    /// flushed.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] if the sink rejects the batch; the entries
    /// are put back for the next attempt.
    pub async fn flush(&self) -> Result<usize, AuditError> {
        let batch: Vec<AuditEntry> = {
            let mut buffer = self.buffer.lock().await;
            if buffer.is_empty() {
                return Ok(0);
            }
            buffer.drain(..).collect()
        };

        let count = batch.len();
        if let Err(error) = self.sink.append(batch.clone()).await {
            let mut buffer = self.buffer.lock().await;
            let mut restored = batch;
            restored.extend(buffer.drain(..));
            *buffer = restored;
            return Err(error);
        }
        metrics::counter!("saga.audit.flushed").increment(count as u64);
        Ok(count)
    }

    /// Purge sink entries older than the retention window.
    pub async fn cleanup(&self, retention: Duration) -> usize {
        let cutoff = self.clock.now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::zero());
        match self.sink.purge_before(cutoff).await {
            Ok(purged) => {
                if purged > 0 {
                    tracing::info!(purged, "audit entries past retention purged");
                }
                purged
            }
            Err(error) => {
                tracing::error!(error = %error, "audit cleanup failed");
                0
            }
        }
    }

    /// Run periodic flush + cleanup until shutdown.
    pub async fn run_maintenance(
        self: Arc<Self>,
        flush_interval: Duration,
        retention: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(flush_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.flush().await {
                        tracing::error!(error = %error, "audit flush failed");
                    }
                    self.cleanup(retention).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        // final flush so a clean shutdown loses nothing
                        if let Err(error) = self.flush().await {
                            tracing::error!(error = %error, "final audit flush failed");
                        }
                        return;
                    }
                }
            }
        }
    }
}

impl Participant for AuditRecorder {
    fn name(&self) -> &'static str {
        "audit"
    }

    fn channels(&self) -> &'static [&'static str] {
        channels::ALL
    }

    fn handle<'a>(&'a self, envelope: &'a Envelope) -> HandlerFuture<'a> {
        Box::pin(async move {
            let should_flush = {
                let mut buffer = self.buffer.lock().await;
                buffer.push(AuditEntry::from_envelope(envelope));
                buffer.len() >= self.batch_size
            };
            if should_flush {
                self.flush()
                    .await
                    .map_err(|error| HandlerError::Retryable(error.to_string()))?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use purchase_saga_testing::{test_clock, ManualClock};

    fn envelope(event_type: &str, order_id: OrderId) -> Envelope {
        Envelope {
            event_type: event_type.to_string(),
            timestamp: test_clock().now(),
            data: serde_json::json!({ "orderId": order_id, "quantity": 1 }),
        }
    }

    #[tokio::test]
    async fn entries_extract_order_id() {
        let order_id = OrderId::new();
        let entry = AuditEntry::from_envelope(&envelope("order.created", order_id));
        assert_eq!(entry.order_id, Some(order_id));
        assert_eq!(entry.event_type, "order.created");
    }

    #[tokio::test]
    async fn batches_flush_at_the_threshold() {
        let sink = Arc::new(MemoryAuditSink::new());
        let recorder = AuditRecorder::new(
            sink.clone(),
            Arc::new(test_clock()) as Arc<dyn Clock>,
            3,
        );

        let order_id = OrderId::new();
        recorder
            .handle(&envelope("order.created", order_id))
            .await
            .unwrap();
        recorder
            .handle(&envelope("user.validated", order_id))
            .await
            .unwrap();
        assert!(sink.entries().await.is_empty());

        recorder
            .handle(&envelope("payment.reserved", order_id))
            .await
            .unwrap();
        let entries = sink.entries().await;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].event_type, "order.created");
    }

    #[tokio::test]
    async fn explicit_flush_drains_partial_batches() {
        let sink = Arc::new(MemoryAuditSink::new());
        let recorder = AuditRecorder::new(
            sink.clone(),
            Arc::new(test_clock()) as Arc<dyn Clock>,
            100,
        );

        recorder
            .handle(&envelope("order.created", OrderId::new()))
            .await
            .unwrap();
        assert_eq!(recorder.flush().await.unwrap(), 1);
        assert_eq!(recorder.flush().await.unwrap(), 0);
        assert_eq!(sink.entries().await.len(), 1);
    }

    #[tokio::test]
    async fn cleanup_honours_retention() {
        let clock = Arc::new(ManualClock::new(test_clock().now()));
        let sink = Arc::new(MemoryAuditSink::new());
        let recorder =
            AuditRecorder::new(sink.clone(), clock.clone() as Arc<dyn Clock>, 1);

        recorder
            .handle(&envelope("order.created", OrderId::new()))
            .await
            .unwrap();
        assert_eq!(sink.entries().await.len(), 1);

        clock.advance(chrono::Duration::days(8));
        let purged = recorder.cleanup(Duration::from_secs(7 * 24 * 3600)).await;
        assert_eq!(purged, 1);
        assert!(sink.entries().await.is_empty());
    }
}
