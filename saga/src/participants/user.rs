//! User participant: step 1, balance reservation and its compensation.
//!
//! Forward path on `order.created`: validate the user, hold the required
//! amount, and only then announce `user.validated` + `payment.reserved`.
//! The hold is recorded in the KV store before any event leaves, so a
//! rollback trigger always finds what it needs to compensate.
//!
//! The rollback is keyed on the KV entry's presence: a second trigger
//! finds nothing and is a no-op, which is what makes the overlapping
//! rollback triggers safe.

use crate::participants::{decode_payload, publish_event};
use crate::storage::{BalanceError, UserStore};
use crate::types::BalanceReservation;
use purchase_saga_core::bus::EventBus;
use purchase_saga_core::clock::Clock;
use purchase_saga_core::envelope::Envelope;
use purchase_saga_core::events::{
    channels, FailedStep, InventoryReservationFailed, ItemReservationFailed, OrderCreated,
    PaymentFailed, PaymentReserved, PaymentRollback, UserValidated, UserValidationFailed,
};
use purchase_saga_core::kv::{keys, KvStore};
use purchase_saga_core::types::{Money, OrderId, UserId};
use purchase_saga_runtime::{HandlerError, HandlerFuture, Participant};
use std::sync::Arc;
use std::time::Duration;

/// The user participant.
pub struct UserParticipant {
    users: Arc<dyn UserStore>,
    kv: Arc<dyn KvStore>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    balance_ttl: Duration,
}

const CHANNELS: &[&str] = &[
    channels::ORDER_CREATED,
    channels::PAYMENT_FAILED,
    channels::INVENTORY_RESERVATION_FAILED,
    channels::ITEM_RESERVATION_FAILED,
];

impl UserParticipant {
    /// Create the participant with its collaborators.
    #[must_use]
    pub fn new(
        users: Arc<dyn UserStore>,
        kv: Arc<dyn KvStore>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        balance_ttl: Duration,
    ) -> Self {
        Self {
            users,
            kv,
            bus,
            clock,
            balance_ttl,
        }
    }

    /// Advisory occupied-slot count maintained by the inventory
    /// participant. The authoritative check re-runs in the inventory step.
    async fn occupied_slots(&self, user_id: UserId) -> Result<u32, HandlerError> {
        let value = self
            .kv
            .get_reservation(&keys::inventory_slots(&user_id))
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;
        Ok(value
            .and_then(|v| v.as_i64())
            .and_then(|count| u32::try_from(count).ok())
            .unwrap_or(0))
    }

    async fn announce_reserved(
        &self,
        payload: &OrderCreated,
        required: Money,
        remaining: Money,
    ) -> Result<(), HandlerError> {
        let validated = UserValidated {
            order_id: payload.order_id,
            user_id: payload.user_id,
            user_balance: remaining,
            required_amount: required,
        };
        publish_event(self.bus.as_ref(), self.clock.as_ref(), &validated).await?;

        let reserved = PaymentReserved {
            order_id: payload.order_id,
            user_id: payload.user_id,
            item_id: payload.item_id,
            quantity: payload.quantity,
            reserved_amount: required,
            remaining_balance: remaining,
        };
        publish_event(self.bus.as_ref(), self.clock.as_ref(), &reserved).await
    }

    async fn reject(
        &self,
        order_id: OrderId,
        user_id: UserId,
        reason: &str,
    ) -> Result<(), HandlerError> {
        tracing::warn!(order_id = %order_id, user_id = %user_id, reason, "user validation failed");
        let failed = UserValidationFailed {
            order_id,
            user_id,
            reason: reason.to_string(),
            failed_step: Some(FailedStep::User),
        };
        publish_event(self.bus.as_ref(), self.clock.as_ref(), &failed).await
    }

    async fn on_order_created(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: OrderCreated = decode_payload(envelope)?;
        let key = keys::balance_reserve(&payload.user_id, &payload.order_id);
        let required = payload.final_amount;

        // Duplicate delivery: the hold already exists. Re-announce from the
        // recorded hold so a lost downstream event is healed.
        let existing = self
            .kv
            .get_reservation(&key)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;
        if let Some(value) = existing {
            let hold: BalanceReservation = serde_json::from_value(value)
                .map_err(|error| HandlerError::Fatal(error.to_string()))?;
            tracing::debug!(
                order_id = %payload.order_id,
                user_id = %payload.user_id,
                "balance already reserved, re-announcing"
            );
            let remaining = hold.original_balance.saturating_sub(hold.amount);
            return self.announce_reserved(&payload, hold.amount, remaining).await;
        }

        let occupied = self.occupied_slots(payload.user_id).await?;

        let snapshot = match self
            .users
            .reserve_balance(payload.user_id, required, occupied)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(error) => {
                if let BalanceError::Storage(ref source) = error {
                    tracing::error!(
                        order_id = %payload.order_id,
                        error = %source,
                        "balance reservation hit storage failure"
                    );
                }
                return self
                    .reject(payload.order_id, payload.user_id, &error.to_string())
                    .await;
            }
        };

        let hold = BalanceReservation {
            amount: required,
            original_balance: snapshot.original_balance,
        };
        let hold_value = serde_json::to_value(&hold)
            .map_err(|error| HandlerError::Fatal(error.to_string()))?;
        if let Err(error) = self
            .kv
            .set_reservation(&key, hold_value, self.balance_ttl)
            .await
        {
            // No rollback record could be written; undo the decrement now
            // and fail the step instead of continuing without a net.
            tracing::error!(
                order_id = %payload.order_id,
                error = %error,
                "failed to record balance hold, compensating"
            );
            if let Err(restore_error) = self
                .users
                .restore_balance(payload.user_id, snapshot.original_balance)
                .await
            {
                return Err(HandlerError::Retryable(format!(
                    "failed to restore balance after kv failure: {restore_error}"
                )));
            }
            return self
                .reject(payload.order_id, payload.user_id, "system-error")
                .await;
        }

        tracing::info!(
            order_id = %payload.order_id,
            user_id = %payload.user_id,
            reserved = required.cents(),
            remaining = snapshot.remaining_balance.cents(),
            "balance reserved"
        );
        self.announce_reserved(&payload, required, snapshot.remaining_balance)
            .await
    }

    /// Compensation shared by every downstream failure trigger.
    async fn rollback(
        &self,
        order_id: OrderId,
        user_id: UserId,
        reason: &str,
    ) -> Result<(), HandlerError> {
        let key = keys::balance_reserve(&user_id, &order_id);

        let Some(value) = self
            .kv
            .get_reservation(&key)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?
        else {
            tracing::debug!(
                order_id = %order_id,
                user_id = %user_id,
                "no balance hold to roll back"
            );
            return Ok(());
        };

        let hold: BalanceReservation =
            serde_json::from_value(value).map_err(|error| HandlerError::Fatal(error.to_string()))?;

        // Snapshot restore: converges even against a concurrent duplicate
        // of this rollback.
        match self
            .users
            .restore_balance(user_id, hold.original_balance)
            .await
        {
            Ok(()) => {}
            Err(BalanceError::UserNotFound) => {
                tracing::warn!(user_id = %user_id, "rollback for unknown user, dropping hold");
            }
            Err(error) => {
                return Err(HandlerError::Retryable(error.to_string()));
            }
        }

        self.kv
            .delete_reservation(&key)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;

        tracing::info!(
            order_id = %order_id,
            user_id = %user_id,
            restored = hold.amount.cents(),
            reason,
            "balance rolled back"
        );
        let rollback = PaymentRollback {
            order_id,
            user_id,
            rollback_amount: hold.amount,
            reason: reason.to_string(),
        };
        publish_event(self.bus.as_ref(), self.clock.as_ref(), &rollback).await
    }

    async fn on_payment_failed(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: PaymentFailed = decode_payload(envelope)?;
        self.rollback(payload.order_id, payload.user_id, &payload.reason)
            .await
    }

    async fn on_inventory_failed(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: InventoryReservationFailed = decode_payload(envelope)?;
        self.rollback(payload.order_id, payload.user_id, &payload.reason)
            .await
    }

    async fn on_item_failed(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: ItemReservationFailed = decode_payload(envelope)?;
        self.rollback(payload.order_id, payload.user_id, &payload.reason)
            .await
    }
}

impl Participant for UserParticipant {
    fn name(&self) -> &'static str {
        "user"
    }

    fn channels(&self) -> &'static [&'static str] {
        CHANNELS
    }

    fn handle<'a>(&'a self, envelope: &'a Envelope) -> HandlerFuture<'a> {
        Box::pin(async move {
            match envelope.event_type.as_str() {
                channels::ORDER_CREATED => self.on_order_created(envelope).await,
                channels::PAYMENT_FAILED => self.on_payment_failed(envelope).await,
                channels::INVENTORY_RESERVATION_FAILED => self.on_inventory_failed(envelope).await,
                channels::ITEM_RESERVATION_FAILED => self.on_item_failed(envelope).await,
                other => {
                    tracing::warn!(event_type = other, "user participant ignoring event");
                    Ok(())
                }
            }
        })
    }
}
