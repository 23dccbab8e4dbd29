//! Inventory participant: step 2, slot capacity and durable placement.
//!
//! Forward path on `payment.reserved`: verify free slot capacity under a
//! short advisory lock and hold one slot in the KV store. Confirmation on
//! `payment.processed` turns the hold into a durable inventory row.
//! Rollback releases the hold; there is no durable state to compensate
//! before confirmation.
//!
//! The participant maintains the advisory `inventory_slots:{userId}`
//! counter (occupied + pending) that the user participant prechecks.

use crate::participants::{decode_payload, publish_event};
use crate::storage::{InventoryStore, UserStore};
use crate::types::SlotReservation;
use purchase_saga_core::bus::EventBus;
use purchase_saga_core::clock::Clock;
use purchase_saga_core::envelope::Envelope;
use purchase_saga_core::events::{
    channels, FailedStep, InventoryConfirmed, InventoryReservationFailed, InventoryReserved,
    InventoryRollback, ItemReservationFailed, PaymentFailed, PaymentProcessed, PaymentReserved,
};
use purchase_saga_core::kv::{keys, KvStore};
use purchase_saga_core::types::{OrderId, UserId};
use purchase_saga_runtime::{HandlerError, HandlerFuture, Participant};
use std::sync::Arc;
use std::time::Duration;

/// The inventory participant.
pub struct InventoryParticipant {
    inventory: Arc<dyn InventoryStore>,
    users: Arc<dyn UserStore>,
    kv: Arc<dyn KvStore>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    lock_ttl: Duration,
    slot_ttl: Duration,
}

const CHANNELS: &[&str] = &[
    channels::PAYMENT_RESERVED,
    channels::PAYMENT_PROCESSED,
    channels::ITEM_RESERVATION_FAILED,
    channels::PAYMENT_FAILED,
];

/// Reason published when the per-user critical section is contended.
const BUSY_REASON: &str = "inventory-busy-try-again";

impl InventoryParticipant {
    /// Create the participant with its collaborators. The user store is
    /// used read-only, for the slot maximum.
    #[must_use]
    pub fn new(
        inventory: Arc<dyn InventoryStore>,
        users: Arc<dyn UserStore>,
        kv: Arc<dyn KvStore>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        lock_ttl: Duration,
        slot_ttl: Duration,
    ) -> Self {
        Self {
            inventory,
            users,
            kv,
            bus,
            clock,
            lock_ttl,
            slot_ttl,
        }
    }

    fn user_lock_key(user_id: UserId) -> String {
        keys::lock(&format!("inventory:{user_id}"))
    }

    async fn release(&self, lock_key: &str) {
        if let Err(error) = self.kv.release_lock(lock_key).await {
            tracing::error!(key = lock_key, error = %error, "failed to release inventory lock");
        }
    }

    async fn reject(
        &self,
        payload: &PaymentReserved,
        reason: &str,
    ) -> Result<(), HandlerError> {
        tracing::warn!(
            order_id = %payload.order_id,
            user_id = %payload.user_id,
            reason,
            "inventory reservation failed"
        );
        let failed = InventoryReservationFailed {
            order_id: payload.order_id,
            user_id: payload.user_id,
            item_id: payload.item_id,
            reason: reason.to_string(),
            failed_step: Some(FailedStep::Inventory),
        };
        publish_event(self.bus.as_ref(), self.clock.as_ref(), &failed).await
    }

    async fn announce_reserved(
        &self,
        payload: &PaymentReserved,
        available_slots: u32,
    ) -> Result<(), HandlerError> {
        let reserved = InventoryReserved {
            order_id: payload.order_id,
            user_id: payload.user_id,
            item_id: payload.item_id,
            quantity: payload.quantity,
            reserved_slots: 1,
            available_slots,
        };
        publish_event(self.bus.as_ref(), self.clock.as_ref(), &reserved).await
    }

    async fn on_payment_reserved(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: PaymentReserved = decode_payload(envelope)?;
        let reserve_key = keys::inventory_reserve(&payload.user_id, &payload.order_id);

        // Duplicate delivery: the slot hold already exists; re-announce.
        let existing = self
            .kv
            .get_reservation(&reserve_key)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;
        if existing.is_some() {
            tracing::debug!(
                order_id = %payload.order_id,
                user_id = %payload.user_id,
                "slot already reserved, re-announcing"
            );
            let available = self.available_slots(payload.user_id).await?;
            return self.announce_reserved(&payload, available).await;
        }

        let lock_key = Self::user_lock_key(payload.user_id);
        let acquired = self
            .kv
            .acquire_lock(&lock_key, self.lock_ttl)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;
        if !acquired {
            return self.reject(&payload, BUSY_REASON).await;
        }

        let outcome = self.reserve_slot(&payload, &reserve_key).await;
        self.release(&lock_key).await;

        match outcome {
            Ok(available_slots) => {
                tracing::info!(
                    order_id = %payload.order_id,
                    user_id = %payload.user_id,
                    available_slots,
                    "inventory slot reserved"
                );
                self.announce_reserved(&payload, available_slots).await
            }
            Err(reason) => self.reject(&payload, &reason).await,
        }
    }

    /// Authoritative capacity check plus the KV hold, inside the per-user
    /// critical section. Returns the slots left after the hold, or the
    /// failure reason.
    async fn reserve_slot(
        &self,
        payload: &PaymentReserved,
        reserve_key: &str,
    ) -> Result<u32, String> {
        let user = match self.users.get(payload.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return Err("user-not-found".to_string()),
            Err(error) => {
                tracing::error!(error = %error, "user lookup failed");
                return Err("system-error".to_string());
            }
        };

        let occupied = match self.inventory.count_entries(payload.user_id).await {
            Ok(count) => count,
            Err(error) => {
                tracing::error!(error = %error, "slot count failed");
                return Err("system-error".to_string());
            }
        };
        if occupied >= user.max_inventory_slots {
            return Err("insufficient-inventory-slots".to_string());
        }

        let hold = SlotReservation {
            item_id: payload.item_id,
            quantity: payload.quantity,
            reserved_at: self.clock.now(),
        };
        let value = match serde_json::to_value(&hold) {
            Ok(value) => value,
            Err(error) => {
                tracing::error!(error = %error, "slot hold serialization failed");
                return Err("system-error".to_string());
            }
        };
        if let Err(error) = self.kv.set_reservation(reserve_key, value, self.slot_ttl).await {
            tracing::error!(error = %error, "slot hold write failed");
            return Err("system-error".to_string());
        }
        if let Err(error) = self.kv.incr(&keys::inventory_slots(&payload.user_id)).await {
            tracing::error!(error = %error, "slot counter increment failed");
        }

        Ok(user.max_inventory_slots - occupied - 1)
    }

    async fn available_slots(&self, user_id: UserId) -> Result<u32, HandlerError> {
        let user = self
            .users
            .get(user_id)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;
        let occupied = self
            .inventory
            .count_entries(user_id)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;
        Ok(user
            .map(|user| user.max_inventory_slots.saturating_sub(occupied).saturating_sub(1))
            .unwrap_or(0))
    }

    async fn on_payment_processed(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: PaymentProcessed = decode_payload(envelope)?;
        let reserve_key = keys::inventory_reserve(&payload.user_id, &payload.order_id);
        let lock_key = Self::user_lock_key(payload.user_id);

        let acquired = self
            .kv
            .acquire_lock(&lock_key, self.lock_ttl)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;
        if !acquired {
            // Confirmation must not be dropped; let the runner retry.
            return Err(HandlerError::Retryable("inventory critical section busy".to_string()));
        }

        let outcome = self.confirm(&payload, &reserve_key).await;
        self.release(&lock_key).await;

        match outcome? {
            Some(confirmed) => {
                publish_event(self.bus.as_ref(), self.clock.as_ref(), &confirmed).await
            }
            None => Ok(()),
        }
    }

    async fn confirm(
        &self,
        payload: &PaymentProcessed,
        reserve_key: &str,
    ) -> Result<Option<InventoryConfirmed>, HandlerError> {
        let Some(value) = self
            .kv
            .get_reservation(reserve_key)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?
        else {
            tracing::warn!(
                order_id = %payload.order_id,
                user_id = %payload.user_id,
                "no slot hold to confirm"
            );
            return Ok(None);
        };
        let hold: SlotReservation =
            serde_json::from_value(value).map_err(|error| HandlerError::Fatal(error.to_string()))?;

        let upsert = self
            .inventory
            .add(payload.user_id, hold.item_id, hold.quantity)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;

        // Counter bookkeeping: the pending hold goes away; a newly created
        // row keeps the counter where it is, an increment of an existing
        // row frees the pending slot.
        if !upsert.newly_created {
            if let Err(error) = self.kv.decr(&keys::inventory_slots(&payload.user_id)).await {
                tracing::error!(error = %error, "slot counter decrement failed");
            }
        }

        self.kv
            .delete_reservation(reserve_key)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;

        tracing::info!(
            order_id = %payload.order_id,
            user_id = %payload.user_id,
            item_id = %hold.item_id,
            quantity = hold.quantity,
            "inventory confirmed"
        );
        Ok(Some(InventoryConfirmed {
            order_id: payload.order_id,
            user_id: payload.user_id,
            item_id: hold.item_id,
            quantity: hold.quantity,
        }))
    }

    async fn rollback(
        &self,
        order_id: OrderId,
        user_id: UserId,
        reason: &str,
    ) -> Result<(), HandlerError> {
        let reserve_key = keys::inventory_reserve(&user_id, &order_id);

        let Some(value) = self
            .kv
            .get_reservation(&reserve_key)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?
        else {
            tracing::debug!(order_id = %order_id, user_id = %user_id, "no slot hold to release");
            return Ok(());
        };
        let hold: SlotReservation =
            serde_json::from_value(value).map_err(|error| HandlerError::Fatal(error.to_string()))?;

        self.kv
            .delete_reservation(&reserve_key)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;
        if let Err(error) = self.kv.decr(&keys::inventory_slots(&user_id)).await {
            tracing::error!(error = %error, "slot counter decrement failed");
        }

        tracing::info!(
            order_id = %order_id,
            user_id = %user_id,
            item_id = %hold.item_id,
            reason,
            "inventory slot released"
        );
        let rollback = InventoryRollback {
            order_id,
            user_id,
            item_id: hold.item_id,
            released_slots: 1,
            reason: reason.to_string(),
        };
        publish_event(self.bus.as_ref(), self.clock.as_ref(), &rollback).await
    }

    async fn on_item_failed(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: ItemReservationFailed = decode_payload(envelope)?;
        self.rollback(payload.order_id, payload.user_id, &payload.reason)
            .await
    }

    async fn on_payment_failed(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: PaymentFailed = decode_payload(envelope)?;
        self.rollback(payload.order_id, payload.user_id, &payload.reason)
            .await
    }
}

impl Participant for InventoryParticipant {
    fn name(&self) -> &'static str {
        "inventory"
    }

    fn channels(&self) -> &'static [&'static str] {
        CHANNELS
    }

    fn handle<'a>(&'a self, envelope: &'a Envelope) -> HandlerFuture<'a> {
        Box::pin(async move {
            match envelope.event_type.as_str() {
                channels::PAYMENT_RESERVED => self.on_payment_reserved(envelope).await,
                channels::PAYMENT_PROCESSED => self.on_payment_processed(envelope).await,
                channels::ITEM_RESERVATION_FAILED => self.on_item_failed(envelope).await,
                channels::PAYMENT_FAILED => self.on_payment_failed(envelope).await,
                other => {
                    tracing::warn!(event_type = other, "inventory participant ignoring event");
                    Ok(())
                }
            }
        })
    }
}
