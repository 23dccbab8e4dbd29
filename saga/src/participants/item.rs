//! Item participant: step 3, stock decrement with a durable reservation.
//!
//! Forward path on `inventory.reserved`: one per-item transaction
//! decrements the stock and records a `RESERVED` row with a five-minute
//! expiry. `payment.success` flips the rows to `CONFIRMED`;
//! `payment.failed` restores the stock and flips them to `CANCELLED`. The
//! expiry sweeper (see [`crate::sweeper`]) reclaims rows the saga never
//! settled.

use crate::participants::{decode_payload, publish_event};
use crate::storage::{ItemStore, StockError};
use purchase_saga_core::bus::EventBus;
use purchase_saga_core::clock::Clock;
use purchase_saga_core::envelope::Envelope;
use purchase_saga_core::events::{
    channels, FailedStep, InventoryReserved, ItemReservationFailed, ItemReserved, ItemRestored,
    PaymentFailed, PaymentSucceeded, RestoredItem,
};
use purchase_saga_runtime::{HandlerError, HandlerFuture, Participant};
use std::sync::Arc;
use std::time::Duration;

/// The item participant.
pub struct ItemParticipant {
    items: Arc<dyn ItemStore>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    stock_ttl: Duration,
}

const CHANNELS: &[&str] = &[
    channels::INVENTORY_RESERVED,
    channels::PAYMENT_SUCCESS,
    channels::PAYMENT_FAILED,
];

impl ItemParticipant {
    /// Create the participant with its collaborators.
    #[must_use]
    pub fn new(
        items: Arc<dyn ItemStore>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        stock_ttl: Duration,
    ) -> Self {
        Self {
            items,
            bus,
            clock,
            stock_ttl,
        }
    }

    async fn on_inventory_reserved(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: InventoryReserved = decode_payload(envelope)?;

        // Duplicate delivery: a live reservation for this order already
        // holds the stock; re-announce instead of decrementing again.
        let active = self
            .items
            .active_by_order(payload.order_id)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;
        if let Some(existing) = active.first() {
            tracing::debug!(
                order_id = %payload.order_id,
                item_id = %existing.item_id,
                "stock already reserved, re-announcing"
            );
            let remaining = self
                .items
                .get(existing.item_id)
                .await
                .map_err(|error| HandlerError::Retryable(error.to_string()))?
                .map_or(0, |item| item.stock);
            let reserved = ItemReserved {
                order_id: payload.order_id,
                user_id: payload.user_id,
                item_id: existing.item_id,
                reserved_quantity: existing.reserved_quantity,
                remaining_stock: remaining,
            };
            return publish_event(self.bus.as_ref(), self.clock.as_ref(), &reserved).await;
        }

        match self
            .items
            .reserve_stock(
                payload.order_id,
                payload.user_id,
                payload.item_id,
                payload.quantity,
                self.stock_ttl,
            )
            .await
        {
            Ok(outcome) => {
                tracing::info!(
                    order_id = %payload.order_id,
                    item_id = %payload.item_id,
                    reserved = outcome.reservation.reserved_quantity,
                    remaining = outcome.remaining_stock,
                    "stock reserved"
                );
                let reserved = ItemReserved {
                    order_id: payload.order_id,
                    user_id: payload.user_id,
                    item_id: payload.item_id,
                    reserved_quantity: outcome.reservation.reserved_quantity,
                    remaining_stock: outcome.remaining_stock,
                };
                publish_event(self.bus.as_ref(), self.clock.as_ref(), &reserved).await
            }
            Err(error) => {
                if let StockError::Storage(ref source) = error {
                    tracing::error!(
                        order_id = %payload.order_id,
                        error = %source,
                        "stock reservation hit storage failure"
                    );
                }
                tracing::warn!(
                    order_id = %payload.order_id,
                    item_id = %payload.item_id,
                    reason = %error,
                    "stock reservation failed"
                );
                let failed = ItemReservationFailed {
                    order_id: payload.order_id,
                    user_id: payload.user_id,
                    item_id: payload.item_id,
                    reason: error.to_string(),
                    failed_step: Some(FailedStep::Item),
                };
                publish_event(self.bus.as_ref(), self.clock.as_ref(), &failed).await
            }
        }
    }

    async fn on_payment_success(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: PaymentSucceeded = decode_payload(envelope)?;
        let confirmed = self
            .items
            .confirm_reservations(payload.order_id)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;
        if confirmed > 0 {
            tracing::info!(order_id = %payload.order_id, confirmed, "stock reservations confirmed");
        } else {
            tracing::debug!(order_id = %payload.order_id, "no reservations left to confirm");
        }
        Ok(())
    }

    async fn on_payment_failed(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: PaymentFailed = decode_payload(envelope)?;
        let restored = self
            .items
            .cancel_reservations(payload.order_id, &payload.reason)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;

        if restored.is_empty() {
            // Already compensated, or the sweeper got there first.
            tracing::debug!(order_id = %payload.order_id, "no stock reservations to restore");
            return Ok(());
        }

        tracing::info!(
            order_id = %payload.order_id,
            lines = restored.len(),
            "stock restored"
        );
        let event = ItemRestored {
            order_id: payload.order_id,
            user_id: payload.user_id,
            restored_items: restored
                .into_iter()
                .map(|line| RestoredItem {
                    item_id: line.item_id,
                    restored_quantity: line.quantity,
                })
                .collect(),
            reason: payload.reason.clone(),
        };
        publish_event(self.bus.as_ref(), self.clock.as_ref(), &event).await
    }
}

impl Participant for ItemParticipant {
    fn name(&self) -> &'static str {
        "item"
    }

    fn channels(&self) -> &'static [&'static str] {
        CHANNELS
    }

    fn handle<'a>(&'a self, envelope: &'a Envelope) -> HandlerFuture<'a> {
        Box::pin(async move {
            match envelope.event_type.as_str() {
                channels::INVENTORY_RESERVED => self.on_inventory_reserved(envelope).await,
                channels::PAYMENT_SUCCESS => self.on_payment_success(envelope).await,
                channels::PAYMENT_FAILED => self.on_payment_failed(envelope).await,
                other => {
                    tracing::warn!(event_type = other, "item participant ignoring event");
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
    use crate::storage::memory::MemoryItemStore;
    use crate::types::{Item, ReservationStatus};
    use chrono::Utc;
    use purchase_saga_core::types::{ItemId, Money, OrderId, UserId};
    use purchase_saga_testing::{test_clock, EventRecorder, InMemoryEventBus};

    struct Fixture {
        participant: ItemParticipant,
        items: Arc<MemoryItemStore>,
        bus: Arc<InMemoryEventBus>,
        item_id: ItemId,
    }

    async fn fixture(stock: u32) -> Fixture {
        let clock = Arc::new(test_clock());
        let items = Arc::new(MemoryItemStore::new(clock.clone() as Arc<dyn Clock>));
        let bus = Arc::new(InMemoryEventBus::new());

        let item = Item {
            id: ItemId::new(),
            name: "widget".to_string(),
            price: Money::from_dollars(100),
            stock,
            is_active: true,
        };
        let item_id = item.id;
        items.insert(item).await.unwrap();

        let participant = ItemParticipant::new(
            items.clone(),
            bus.clone(),
            clock,
            Duration::from_secs(300),
        );

        Fixture {
            participant,
            items,
            bus,
            item_id,
        }
    }

    fn inventory_reserved(item_id: ItemId, quantity: u32) -> (InventoryReserved, Envelope) {
        let payload = InventoryReserved {
            order_id: OrderId::new(),
            user_id: UserId::new(),
            item_id,
            quantity,
            reserved_slots: 1,
            available_slots: 4,
        };
        let envelope = Envelope::encode(&payload, Utc::now()).unwrap();
        (payload, envelope)
    }

    #[tokio::test]
    async fn forward_path_decrements_and_records() {
        let fixture = fixture(50).await;
        let recorder = EventRecorder::attach(fixture.bus.as_ref(), &[channels::ITEM_RESERVED])
            .await
            .unwrap();

        let (payload, envelope) = inventory_reserved(fixture.item_id, 3);
        fixture.participant.handle(&envelope).await.unwrap();

        let reserved: ItemReserved = recorder
            .wait_for(channels::ITEM_RESERVED, Duration::from_secs(1))
            .await
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(reserved.reserved_quantity, 3);
        assert_eq!(reserved.remaining_stock, 47);

        assert_eq!(
            fixture.items.get(fixture.item_id).await.unwrap().unwrap().stock,
            47
        );
        let active = fixture.items.active_by_order(payload.order_id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].original_stock, 50);
    }

    #[tokio::test]
    async fn out_of_stock_rejects() {
        let fixture = fixture(0).await;
        let recorder =
            EventRecorder::attach(fixture.bus.as_ref(), &[channels::ITEM_RESERVATION_FAILED])
                .await
                .unwrap();

        let (_, envelope) = inventory_reserved(fixture.item_id, 1);
        fixture.participant.handle(&envelope).await.unwrap();

        let failed: ItemReservationFailed = recorder
            .wait_for(channels::ITEM_RESERVATION_FAILED, Duration::from_secs(1))
            .await
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(failed.reason, "insufficient-stock");
        assert_eq!(failed.failed_step, Some(FailedStep::Item));
        assert_eq!(
            fixture.items.get(fixture.item_id).await.unwrap().unwrap().stock,
            0
        );
    }

    #[tokio::test]
    async fn duplicate_delivery_does_not_double_decrement() {
        let fixture = fixture(50).await;
        let recorder = EventRecorder::attach(fixture.bus.as_ref(), &[channels::ITEM_RESERVED])
            .await
            .unwrap();

        let (_, envelope) = inventory_reserved(fixture.item_id, 3);
        fixture.participant.handle(&envelope).await.unwrap();
        fixture.participant.handle(&envelope).await.unwrap();

        assert_eq!(
            fixture.items.get(fixture.item_id).await.unwrap().unwrap().stock,
            47
        );
        assert!(
            recorder
                .wait_for_count(channels::ITEM_RESERVED, 2, Duration::from_secs(1))
                .await
        );
    }

    #[tokio::test]
    async fn payment_success_confirms() {
        let fixture = fixture(50).await;
        let (payload, envelope) = inventory_reserved(fixture.item_id, 3);
        fixture.participant.handle(&envelope).await.unwrap();

        let success = PaymentSucceeded {
            order_id: payload.order_id,
            user_id: payload.user_id,
            payment_amount: Money::from_dollars(300),
            payment_method: "credit-card".to_string(),
        };
        let success_envelope = Envelope::encode(&success, Utc::now()).unwrap();
        fixture.participant.handle(&success_envelope).await.unwrap();
        fixture.participant.handle(&success_envelope).await.unwrap(); // idempotent

        let all = fixture.items.all_reservations().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, ReservationStatus::Confirmed);
        // stock stays decremented
        assert_eq!(
            fixture.items.get(fixture.item_id).await.unwrap().unwrap().stock,
            47
        );
    }

    #[tokio::test]
    async fn payment_failure_restores_stock_once() {
        let fixture = fixture(50).await;
        let recorder = EventRecorder::attach(fixture.bus.as_ref(), &[channels::ITEM_RESTORED])
            .await
            .unwrap();

        let (payload, envelope) = inventory_reserved(fixture.item_id, 3);
        fixture.participant.handle(&envelope).await.unwrap();

        let failure = PaymentFailed {
            order_id: payload.order_id,
            user_id: payload.user_id,
            reason: "card declined".to_string(),
            attempted_amount: Money::from_dollars(300),
            failed_step: Some(FailedStep::Payment),
        };
        let failure_envelope = Envelope::encode(&failure, Utc::now()).unwrap();
        fixture.participant.handle(&failure_envelope).await.unwrap();
        fixture.participant.handle(&failure_envelope).await.unwrap();

        let restored: ItemRestored = recorder
            .wait_for(channels::ITEM_RESTORED, Duration::from_secs(1))
            .await
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(restored.restored_items.len(), 1);
        assert_eq!(restored.restored_items[0].restored_quantity, 3);
        assert_eq!(recorder.count_of(channels::ITEM_RESTORED).await, 1);

        assert_eq!(
            fixture.items.get(fixture.item_id).await.unwrap().unwrap().stock,
            50
        );
        let all = fixture.items.all_reservations().await;
        assert_eq!(all[0].status, ReservationStatus::Cancelled);
        assert_eq!(all[0].cancel_reason.as_deref(), Some("card declined"));
    }
}
