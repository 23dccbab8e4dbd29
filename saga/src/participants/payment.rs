//! Payment participant: step 4, the charge itself.
//!
//! On `item.reserved`: read the balance hold, charge it through the
//! gateway, and report `payment.processed` + `payment.success` or
//! `payment.failed`. The step is guarded by an at-most-once lock per
//! order: money moves at most once no matter how often the trigger is
//! delivered.

use crate::gateway::PaymentGateway;
use crate::participants::{decode_payload, publish_event};
use crate::types::BalanceReservation;
use purchase_saga_core::bus::EventBus;
use purchase_saga_core::clock::Clock;
use purchase_saga_core::envelope::Envelope;
use purchase_saga_core::events::{
    channels, FailedStep, ItemReserved, PaymentFailed, PaymentProcessed, PaymentSucceeded,
};
use purchase_saga_core::kv::{keys, KvStore};
use purchase_saga_core::types::Money;
use purchase_saga_runtime::{HandlerError, HandlerFuture, Participant};
use std::sync::Arc;
use std::time::Duration;

/// The payment participant.
pub struct PaymentParticipant {
    kv: Arc<dyn KvStore>,
    gateway: Arc<dyn PaymentGateway>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    attempt_ttl: Duration,
}

const CHANNELS: &[&str] = &[channels::ITEM_RESERVED];

impl PaymentParticipant {
    /// Create the participant with its collaborators. `attempt_ttl` bounds
    /// the at-most-once guard; it should cover the longest plausible
    /// gateway call by a wide margin.
    #[must_use]
    pub fn new(
        kv: Arc<dyn KvStore>,
        gateway: Arc<dyn PaymentGateway>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        attempt_ttl: Duration,
    ) -> Self {
        Self {
            kv,
            gateway,
            bus,
            clock,
            attempt_ttl,
        }
    }

    async fn report_failure(
        &self,
        payload: &ItemReserved,
        reason: &str,
        attempted_amount: Money,
    ) -> Result<(), HandlerError> {
        tracing::warn!(
            order_id = %payload.order_id,
            user_id = %payload.user_id,
            reason,
            attempted = attempted_amount.cents(),
            "payment failed"
        );
        let failed = PaymentFailed {
            order_id: payload.order_id,
            user_id: payload.user_id,
            reason: reason.to_string(),
            attempted_amount,
            failed_step: Some(FailedStep::Payment),
        };
        publish_event(self.bus.as_ref(), self.clock.as_ref(), &failed).await
    }

    async fn on_item_reserved(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: ItemReserved = decode_payload(envelope)?;

        // At-most-once commitment: whoever wins this lock owns the charge.
        // A duplicate delivery (or a replica race) loses it and walks away.
        let attempt_key = keys::payment_attempt(&payload.order_id);
        let first_attempt = self
            .kv
            .acquire_lock(&attempt_key, self.attempt_ttl)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;
        if !first_attempt {
            tracing::debug!(
                order_id = %payload.order_id,
                "payment already attempted for order, skipping"
            );
            return Ok(());
        }

        let hold_key = keys::balance_reserve(&payload.user_id, &payload.order_id);
        let Some(value) = self
            .kv
            .get_reservation(&hold_key)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?
        else {
            return self
                .report_failure(&payload, "reservation-missing", Money::ZERO)
                .await;
        };
        let hold: BalanceReservation =
            serde_json::from_value(value).map_err(|error| HandlerError::Fatal(error.to_string()))?;

        match self
            .gateway
            .charge(payload.order_id, payload.user_id, hold.amount)
            .await
        {
            Ok(receipt) => {
                tracing::info!(
                    order_id = %payload.order_id,
                    user_id = %payload.user_id,
                    amount = hold.amount.cents(),
                    transaction_id = %receipt.transaction_id,
                    "payment processed"
                );
                let processed = PaymentProcessed {
                    order_id: payload.order_id,
                    user_id: payload.user_id,
                    payment_amount: hold.amount,
                    payment_method: receipt.method,
                };
                let success = PaymentSucceeded::from(processed.clone());
                publish_event(self.bus.as_ref(), self.clock.as_ref(), &processed).await?;
                publish_event(self.bus.as_ref(), self.clock.as_ref(), &success).await
            }
            Err(error) => {
                self.report_failure(&payload, &error.to_string(), hold.amount)
                    .await
            }
        }
    }
}

impl Participant for PaymentParticipant {
    fn name(&self) -> &'static str {
        "payment"
    }

    fn channels(&self) -> &'static [&'static str] {
        CHANNELS
    }

    fn handle<'a>(&'a self, envelope: &'a Envelope) -> HandlerFuture<'a> {
        Box::pin(async move {
            match envelope.event_type.as_str() {
                channels::ITEM_RESERVED => self.on_item_reserved(envelope).await,
                other => {
                    tracing::warn!(event_type = other, "payment participant ignoring event");
                    Ok(())
                }
            }
        })
    }
}
