//! Subscription loop driving one participant.
//!
//! The runner subscribes a participant's channels on the bus and feeds it
//! every delivered envelope. Retryable handler failures are retried with
//! exponential backoff; exhausted or fatal deliveries go to the dead
//! letter queue and the loop continues. A single failed delivery never
//! stops a participant.

use crate::dlq::{DeadLetterQueue, FailureReport};
use crate::participant::{HandlerError, Participant};
use crate::retry::{retry_with_predicate, RetryPolicy};
use futures::StreamExt;
use purchase_saga_core::bus::{EventBus, EventBusError, EventStream};
use purchase_saga_core::envelope::Envelope;
use std::sync::Arc;
use tokio::sync::watch;

/// Drives one participant's event loop.
pub struct ParticipantRunner {
    participant: Arc<dyn Participant>,
    bus: Arc<dyn EventBus>,
    dlq: Arc<dyn DeadLetterQueue>,
    retry: RetryPolicy,
    shutdown: watch::Receiver<bool>,
    stream: Option<EventStream>,
}

impl ParticipantRunner {
    /// Create a runner. Send `true` on the shutdown channel to stop it.
    #[must_use]
    pub fn new(
        participant: Arc<dyn Participant>,
        bus: Arc<dyn EventBus>,
        dlq: Arc<dyn DeadLetterQueue>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            participant,
            bus,
            dlq,
            retry: RetryPolicy::default(),
            shutdown,
            stream: None,
        }
    }

    /// Override the retry policy for handler failures.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Establish the subscription eagerly. Useful before spawning, so no
    /// event published in the meantime is missed.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError`] if the subscription fails.
    pub async fn subscribe(&mut self) -> Result<(), EventBusError> {
        if self.stream.is_none() {
            self.stream = Some(self.bus.subscribe(self.participant.channels()).await?);
        }
        Ok(())
    }

    /// Subscribe (unless already subscribed) and process deliveries until
    /// shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError`] if the initial subscription fails; runtime
    /// delivery errors are logged and skipped.
    pub async fn run(mut self) -> Result<(), EventBusError> {
        let name = self.participant.name();
        tracing::info!(
            participant = name,
            channels = ?self.participant.channels(),
            "starting participant runner"
        );

        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => self.bus.subscribe(self.participant.channels()).await?,
        };

        while !*self.shutdown.borrow() {
            tokio::select! {
                next = stream.next() => {
                    match next {
                        Some(Ok(envelope)) => self.dispatch(envelope).await,
                        Some(Err(error)) => {
                            tracing::error!(
                                participant = name,
                                error = %error,
                                "error receiving from bus"
                            );
                        }
                        None => {
                            tracing::warn!(participant = name, "event stream closed");
                            break;
                        }
                    }
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        tracing::info!(participant = name, "shutdown signal received");
                        break;
                    }
                }
            }
        }

        tracing::info!(participant = name, "participant runner stopped");
        Ok(())
    }

    /// Spawn the runner as a background task.
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        let name = self.participant.name();
        tokio::spawn(async move {
            if let Err(error) = self.run().await {
                tracing::error!(participant = name, error = %error, "runner exited with error");
            }
        })
    }

    async fn dispatch(&self, envelope: Envelope) {
        let name = self.participant.name();
        metrics::counter!("saga.deliveries.total", "participant" => name).increment(1);
        tracing::debug!(
            participant = name,
            event_type = %envelope.event_type,
            "dispatching envelope"
        );

        let result = retry_with_predicate(
            &self.retry,
            || self.participant.handle(&envelope),
            HandlerError::is_retryable,
        )
        .await;

        match result {
            Ok(()) => {
                metrics::counter!("saga.deliveries.processed", "participant" => name)
                    .increment(1);
            }
            Err((error, attempts)) => {
                metrics::counter!("saga.deliveries.failed", "participant" => name).increment(1);
                let report = FailureReport {
                    participant: name,
                    envelope,
                    error: error.to_string(),
                    attempts,
                };
                if let Err(dlq_error) = self.dlq.push(report).await {
                    tracing::error!(
                        participant = name,
                        error = %dlq_error,
                        "failed to dead-letter undeliverable envelope"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dlq::InMemoryDeadLetterQueue;
    use crate::participant::HandlerFuture;
    use chrono::Utc;
    use purchase_saga_testing::InMemoryEventBus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingParticipant {
        calls: AtomicUsize,
        fail_first: usize,
        fatal: bool,
    }

    impl CountingParticipant {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first: 0,
                fatal: false,
            }
        }

        fn flaky(fail_first: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first,
                fatal: false,
            }
        }

        fn broken() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first: usize::MAX,
                fatal: true,
            }
        }
    }

    impl Participant for CountingParticipant {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn channels(&self) -> &'static [&'static str] {
            &["test.tick"]
        }

        fn handle<'a>(&'a self, _envelope: &'a Envelope) -> HandlerFuture<'a> {
            Box::pin(async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if call < self.fail_first {
                    if self.fatal {
                        Err(HandlerError::Fatal("malformed".to_string()))
                    } else {
                        Err(HandlerError::Retryable("transient".to_string()))
                    }
                } else {
                    Ok(())
                }
            })
        }
    }

    fn tick() -> Envelope {
        Envelope {
            event_type: "test.tick".to_string(),
            timestamp: Utc::now(),
            data: serde_json::json!({}),
        }
    }

    async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let end = tokio::time::Instant::now() + deadline;
        while tokio::time::Instant::now() < end {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        check()
    }

    #[tokio::test]
    async fn delivers_envelopes_to_participant() {
        let bus = Arc::new(InMemoryEventBus::new());
        let dlq = Arc::new(InMemoryDeadLetterQueue::new());
        let participant = Arc::new(CountingParticipant::ok());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut runner = ParticipantRunner::new(
            Arc::clone(&participant) as Arc<dyn Participant>,
            Arc::clone(&bus) as Arc<dyn EventBus>,
            Arc::clone(&dlq) as Arc<dyn DeadLetterQueue>,
            shutdown_rx,
        );
        runner.subscribe().await.unwrap();
        let handle = runner.spawn();

        bus.publish("test.tick", &tick()).await.unwrap();
        bus.publish("test.tick", &tick()).await.unwrap();

        assert!(
            wait_until(Duration::from_secs(1), || {
                participant.calls.load(Ordering::SeqCst) == 2
            })
            .await
        );

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(dlq.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let bus = Arc::new(InMemoryEventBus::new());
        let dlq = Arc::new(InMemoryDeadLetterQueue::new());
        let participant = Arc::new(CountingParticipant::flaky(2));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut runner = ParticipantRunner::new(
            Arc::clone(&participant) as Arc<dyn Participant>,
            Arc::clone(&bus) as Arc<dyn EventBus>,
            Arc::clone(&dlq) as Arc<dyn DeadLetterQueue>,
            shutdown_rx,
        )
        .with_retry_policy(
            RetryPolicy::builder()
                .max_retries(3)
                .initial_delay(Duration::from_millis(5))
                .build(),
        );
        runner.subscribe().await.unwrap();
        let handle = runner.spawn();

        bus.publish("test.tick", &tick()).await.unwrap();

        assert!(
            wait_until(Duration::from_secs(1), || {
                participant.calls.load(Ordering::SeqCst) == 3
            })
            .await
        );

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(dlq.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fatal_failures_are_dead_lettered_without_retry() {
        let bus = Arc::new(InMemoryEventBus::new());
        let dlq = Arc::new(InMemoryDeadLetterQueue::new());
        let participant = Arc::new(CountingParticipant::broken());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut runner = ParticipantRunner::new(
            Arc::clone(&participant) as Arc<dyn Participant>,
            Arc::clone(&bus) as Arc<dyn EventBus>,
            Arc::clone(&dlq) as Arc<dyn DeadLetterQueue>,
            shutdown_rx,
        );
        runner.subscribe().await.unwrap();
        let handle = runner.spawn();

        bus.publish("test.tick", &tick()).await.unwrap();

        let mut dead_lettered = false;
        for _ in 0..200 {
            if dlq.depth().await.unwrap() == 1 {
                dead_lettered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(dead_lettered);

        // No retries happened for the fatal error.
        assert_eq!(participant.calls.load(Ordering::SeqCst), 1);

        let pending = dlq.list_pending(10).await.unwrap();
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].participant, "counting");

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
