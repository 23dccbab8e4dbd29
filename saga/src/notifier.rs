//! Outcome notifications.
//!
//! On a terminal order event, renders a message, delivers it through the
//! [`NotificationSender`] trait and announces `notification.sent`. The
//! delivery transport is a collaborator; the default implementation just
//! logs.

use crate::participants::{decode_payload, publish_event};
use purchase_saga_core::bus::EventBus;
use purchase_saga_core::clock::Clock;
use purchase_saga_core::envelope::Envelope;
use purchase_saga_core::events::{
    channels, NotificationKind, NotificationSent, OrderCompleted, OrderFailed,
};
use purchase_saga_core::types::UserId;
use purchase_saga_runtime::{HandlerError, HandlerFuture, Participant};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Notification delivery failure.
#[derive(Error, Debug, Clone)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Boxed future returned by delivery calls.
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;

/// Delivery transport for user notifications.
pub trait NotificationSender: Send + Sync {
    /// Deliver one message to a user.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if delivery fails.
    fn send<'a>(
        &'a self,
        user_id: UserId,
        kind: NotificationKind,
        message: &str,
    ) -> NotifyFuture<'a>;
}

/// Sender that logs the message instead of delivering it anywhere.
#[derive(Debug, Clone, Default)]
pub struct LogNotificationSender;

impl NotificationSender for LogNotificationSender {
    fn send<'a>(
        &'a self,
        user_id: UserId,
        kind: NotificationKind,
        message: &str,
    ) -> NotifyFuture<'a> {
        let message = message.to_string();
        Box::pin(async move {
            tracing::info!(user_id = %user_id, kind = ?kind, message, "notification delivered");
            Ok(())
        })
    }
}

/// The notification participant.
pub struct NotificationParticipant {
    sender: Arc<dyn NotificationSender>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
}

const CHANNELS: &[&str] = &[channels::ORDER_COMPLETED, channels::ORDER_FAILED];

impl NotificationParticipant {
    /// Create the participant with its collaborators.
    #[must_use]
    pub fn new(
        sender: Arc<dyn NotificationSender>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { sender, bus, clock }
    }

    async fn notify(
        &self,
        order_id: purchase_saga_core::types::OrderId,
        user_id: UserId,
        kind: NotificationKind,
        message: String,
    ) -> Result<(), HandlerError> {
        self.sender
            .send(user_id, kind, &message)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;

        let sent = NotificationSent {
            order_id,
            user_id,
            message,
            kind,
            sent_at: self.clock.now(),
        };
        publish_event(self.bus.as_ref(), self.clock.as_ref(), &sent).await
    }

    async fn on_order_completed(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: OrderCompleted = decode_payload(envelope)?;
        let message = format!(
            "Your order for {} is complete. Charged {}.",
            payload.item_name, payload.total_amount
        );
        self.notify(
            payload.order_id,
            payload.user_id,
            NotificationKind::OrderCompleted,
            message,
        )
        .await
    }

    async fn on_order_failed(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: OrderFailed = decode_payload(envelope)?;
        let message = format!(
            "Your order could not be completed: {}. Nothing was charged.",
            payload.reason
        );
        self.notify(
            payload.order_id,
            payload.user_id,
            NotificationKind::OrderFailed,
            message,
        )
        .await
    }
}

impl Participant for NotificationParticipant {
    fn name(&self) -> &'static str {
        "notifier"
    }

    fn channels(&self) -> &'static [&'static str] {
        CHANNELS
    }

    fn handle<'a>(&'a self, envelope: &'a Envelope) -> HandlerFuture<'a> {
        Box::pin(async move {
            match envelope.event_type.as_str() {
                channels::ORDER_COMPLETED => self.on_order_completed(envelope).await,
                channels::ORDER_FAILED => self.on_order_failed(envelope).await,
                other => {
                    tracing::warn!(event_type = other, "notifier ignoring event");
                    Ok(())
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use purchase_saga_core::events::FailedStep;
    use purchase_saga_core::types::{Money, OrderId};
    use purchase_saga_testing::{test_clock, EventRecorder, InMemoryEventBus};
    use std::time::Duration;

    fn participant(bus: &Arc<InMemoryEventBus>) -> NotificationParticipant {
        NotificationParticipant::new(
            Arc::new(LogNotificationSender),
            bus.clone(),
            Arc::new(test_clock()),
        )
    }

    #[tokio::test]
    async fn completion_produces_notification() {
        let bus = Arc::new(InMemoryEventBus::new());
        let recorder = EventRecorder::attach(bus.as_ref(), &[channels::NOTIFICATION_SENT])
            .await
            .unwrap();
        let participant = participant(&bus);

        let completed = OrderCompleted {
            order_id: OrderId::new(),
            user_id: UserId::new(),
            item_name: "widget".to_string(),
            total_amount: Money::from_dollars(100),
        };
        participant
            .handle(&Envelope::encode(&completed, Utc::now()).unwrap())
            .await
            .unwrap();

        let sent: NotificationSent = recorder
            .wait_for(channels::NOTIFICATION_SENT, Duration::from_secs(1))
            .await
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(sent.kind, NotificationKind::OrderCompleted);
        assert!(sent.message.contains("widget"));
        assert_eq!(sent.order_id, completed.order_id);
    }

    #[tokio::test]
    async fn failure_produces_notification_with_reason() {
        let bus = Arc::new(InMemoryEventBus::new());
        let recorder = EventRecorder::attach(bus.as_ref(), &[channels::NOTIFICATION_SENT])
            .await
            .unwrap();
        let participant = participant(&bus);

        let failed = OrderFailed {
            order_id: OrderId::new(),
            user_id: UserId::new(),
            reason: "insufficient-stock".to_string(),
            failed_step: FailedStep::Item,
            user_coupon_id: None,
            discount_amount: None,
        };
        participant
            .handle(&Envelope::encode(&failed, Utc::now()).unwrap())
            .await
            .unwrap();

        let sent: NotificationSent = recorder
            .wait_for(channels::NOTIFICATION_SENT, Duration::from_secs(1))
            .await
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(sent.kind, NotificationKind::OrderFailed);
        assert!(sent.message.contains("insufficient-stock"));
    }
}
