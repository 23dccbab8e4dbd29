//! Order participant: saga initiator and terminal bookkeeper.
//!
//! Creates the order row, starts the chain (optionally after coupon
//! pre-validation), and records the terminal outcome when the chain
//! reports back. There is no central saga state machine: an order's
//! progress is reconstructible from its row plus the event chain keyed by
//! `orderId`.

use crate::participants::{decode_payload, publish_event};
use crate::storage::{ItemStore, OrderStore, StorageError, TerminalTransition, UserStore};
use crate::types::Order;
use purchase_saga_core::bus::EventBus;
use purchase_saga_core::clock::Clock;
use purchase_saga_core::envelope::Envelope;
use purchase_saga_core::events::{
    channels, CouponValidated, CouponValidationFailed, CouponValidationRequested, FailedStep,
    InventoryReservationFailed, ItemReservationFailed, OrderCompleted, OrderCreated, OrderFailed,
    PaymentFailed, PaymentProcessed, UserValidationFailed,
};
use purchase_saga_core::types::{ItemId, OrderId, UserCouponId, UserId};
use purchase_saga_runtime::{HandlerError, HandlerFuture, Participant};
use std::sync::Arc;
use thiserror::Error;

/// Failure creating an order; surfaced synchronously to the caller.
#[derive(Error, Debug)]
pub enum CreateOrderError {
    /// The buying user does not exist
    #[error("user {0} not found")]
    UnknownUser(UserId),

    /// The purchased item does not exist
    #[error("item {0} not found")]
    UnknownItem(ItemId),

    /// Quantity must be a positive integer
    #[error("quantity must be positive")]
    InvalidQuantity,

    /// The order row could not be written
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    /// The starting event could not be published
    #[error("failed to start saga: {0}")]
    Publish(String),
}

/// The order participant.
pub struct OrderParticipant {
    orders: Arc<dyn OrderStore>,
    users: Arc<dyn UserStore>,
    items: Arc<dyn ItemStore>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
}

const CHANNELS: &[&str] = &[
    channels::COUPON_VALIDATED,
    channels::COUPON_VALIDATION_FAILED,
    channels::PAYMENT_PROCESSED,
    channels::USER_VALIDATION_FAILED,
    channels::INVENTORY_RESERVATION_FAILED,
    channels::ITEM_RESERVATION_FAILED,
    channels::PAYMENT_FAILED,
];

impl OrderParticipant {
    /// Create the participant with its collaborators. The user and item
    /// stores are used read-only, for admission-time lookups.
    #[must_use]
    pub fn new(
        orders: Arc<dyn OrderStore>,
        users: Arc<dyn UserStore>,
        items: Arc<dyn ItemStore>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            orders,
            users,
            items,
            bus,
            clock,
        }
    }

    /// Create an order and start the saga.
    ///
    /// With a coupon, the chain continues when `coupon.validated` arrives;
    /// without one, `order.created` is published immediately.
    ///
    /// # Errors
    ///
    /// Returns [`CreateOrderError`] for admission failures (unknown user or
    /// item, zero quantity) and infrastructure failures.
    pub async fn create_order(
        &self,
        user_id: UserId,
        item_id: ItemId,
        quantity: u32,
        user_coupon_id: Option<UserCouponId>,
    ) -> Result<Order, CreateOrderError> {
        if quantity == 0 {
            return Err(CreateOrderError::InvalidQuantity);
        }

        let user = self
            .users
            .get(user_id)
            .await?
            .ok_or(CreateOrderError::UnknownUser(user_id))?;
        let item = self
            .items
            .get(item_id)
            .await?
            .ok_or(CreateOrderError::UnknownItem(item_id))?;

        let total_amount = item.price.multiply(quantity);
        let order = Order::new(
            OrderId::new(),
            user.id,
            item.id,
            quantity,
            total_amount,
            self.clock.now(),
        );
        self.orders.insert(order.clone()).await?;

        tracing::info!(
            order_id = %order.id,
            user_id = %user.id,
            item_id = %item.id,
            quantity,
            total_amount = total_amount.cents(),
            coupon = user_coupon_id.is_some(),
            "order created"
        );

        if let Some(coupon_id) = user_coupon_id {
            let request = CouponValidationRequested {
                order_id: order.id,
                user_id: user.id,
                item_id: item.id,
                quantity,
                total_amount,
                user_coupon_id: coupon_id,
            };
            publish_event(self.bus.as_ref(), self.clock.as_ref(), &request)
                .await
                .map_err(|error| CreateOrderError::Publish(error.to_string()))?;
        } else {
            self.start_chain(&order).await
                .map_err(|error| CreateOrderError::Publish(error.to_string()))?;
        }

        Ok(order)
    }

    /// Publish `order.created` and mark the row as processing. On the
    /// wire, `totalAmount` is the amount downstream must charge.
    async fn start_chain(&self, order: &Order) -> Result<(), HandlerError> {
        let created = OrderCreated {
            order_id: order.id,
            user_id: order.user_id,
            item_id: order.item_id,
            quantity: order.quantity,
            total_amount: order.final_amount,
            discount_amount: order.discount_amount,
            final_amount: order.final_amount,
            user_coupon_id: order.user_coupon_id,
        };
        publish_event(self.bus.as_ref(), self.clock.as_ref(), &created).await?;
        self.orders
            .begin_processing(order.id)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;
        Ok(())
    }

    async fn on_coupon_validated(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: CouponValidated = decode_payload(envelope)?;

        let Some(order) = self
            .orders
            .apply_coupon(payload.order_id, payload.user_coupon_id, payload.discount_amount)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?
        else {
            tracing::warn!(order_id = %payload.order_id, "coupon validated for unknown order");
            return Ok(());
        };

        tracing::info!(
            order_id = %order.id,
            discount = order.discount_amount.cents(),
            final_amount = order.final_amount.cents(),
            "discount applied, starting chain"
        );
        self.start_chain(&order).await
    }

    async fn on_coupon_rejected(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: CouponValidationFailed = decode_payload(envelope)?;
        let step = payload
            .failed_step
            .or_else(|| FailedStep::classify(&payload.reason))
            .unwrap_or(FailedStep::Coupon);
        self.record_failure(payload.order_id, &payload.reason, step).await
    }

    async fn on_payment_processed(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: PaymentProcessed = decode_payload(envelope)?;

        let transition = self
            .orders
            .mark_completed(payload.order_id)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;
        let order = match transition {
            TerminalTransition::Applied(order) => order,
            TerminalTransition::AlreadyTerminal(order) => {
                tracing::debug!(
                    order_id = %order.id,
                    status = ?order.status,
                    "duplicate completion trigger ignored"
                );
                return Ok(());
            }
            TerminalTransition::NotFound => {
                tracing::warn!(order_id = %payload.order_id, "payment processed for unknown order");
                return Ok(());
            }
        };

        let item_name = self
            .items
            .get(order.item_id)
            .await
            .ok()
            .flatten()
            .map_or_else(|| order.item_id.to_string(), |item| item.name);

        tracing::info!(order_id = %order.id, user_id = %order.user_id, "order completed");
        let completed = OrderCompleted {
            order_id: order.id,
            user_id: order.user_id,
            item_name,
            total_amount: order.final_amount,
        };
        publish_event(self.bus.as_ref(), self.clock.as_ref(), &completed).await
    }

    /// Terminal failure bookkeeping shared by every `*_FAILED` trigger.
    /// Terminal states are sticky, so overlapping failure events collapse
    /// into one `order.failed`.
    async fn record_failure(
        &self,
        order_id: OrderId,
        reason: &str,
        failed_step: FailedStep,
    ) -> Result<(), HandlerError> {
        let transition = self
            .orders
            .mark_failed(order_id, reason)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;
        let order = match transition {
            TerminalTransition::Applied(order) => order,
            TerminalTransition::AlreadyTerminal(order) => {
                tracing::debug!(
                    order_id = %order.id,
                    status = ?order.status,
                    "duplicate failure trigger ignored"
                );
                return Ok(());
            }
            TerminalTransition::NotFound => {
                tracing::warn!(order_id = %order_id, "failure reported for unknown order");
                return Ok(());
            }
        };

        tracing::warn!(
            order_id = %order.id,
            user_id = %order.user_id,
            reason,
            step = ?failed_step,
            "order failed"
        );
        let failed = OrderFailed {
            order_id: order.id,
            user_id: order.user_id,
            reason: reason.to_string(),
            failed_step,
            user_coupon_id: order.user_coupon_id,
            discount_amount: order.user_coupon_id.map(|_| order.discount_amount),
        };
        publish_event(self.bus.as_ref(), self.clock.as_ref(), &failed).await
    }

    async fn on_user_failed(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: UserValidationFailed = decode_payload(envelope)?;
        let step = payload
            .failed_step
            .or_else(|| FailedStep::classify(&payload.reason))
            .unwrap_or(FailedStep::User);
        self.record_failure(payload.order_id, &payload.reason, step).await
    }

    async fn on_inventory_failed(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: InventoryReservationFailed = decode_payload(envelope)?;
        let step = payload
            .failed_step
            .or_else(|| FailedStep::classify(&payload.reason))
            .unwrap_or(FailedStep::Inventory);
        self.record_failure(payload.order_id, &payload.reason, step).await
    }

    async fn on_item_failed(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: ItemReservationFailed = decode_payload(envelope)?;
        let step = payload
            .failed_step
            .or_else(|| FailedStep::classify(&payload.reason))
            .unwrap_or(FailedStep::Item);
        self.record_failure(payload.order_id, &payload.reason, step).await
    }

    async fn on_payment_failed(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: PaymentFailed = decode_payload(envelope)?;
        let step = payload
            .failed_step
            .or_else(|| FailedStep::classify(&payload.reason))
            .unwrap_or(FailedStep::Payment);
        self.record_failure(payload.order_id, &payload.reason, step).await
    }
}

impl Participant for OrderParticipant {
    fn name(&self) -> &'static str {
        "order"
    }

    fn channels(&self) -> &'static [&'static str] {
        CHANNELS
    }

    fn handle<'a>(&'a self, envelope: &'a Envelope) -> HandlerFuture<'a> {
        Box::pin(async move {
            match envelope.event_type.as_str() {
                channels::COUPON_VALIDATED => self.on_coupon_validated(envelope).await,
                channels::COUPON_VALIDATION_FAILED => self.on_coupon_rejected(envelope).await,
                channels::PAYMENT_PROCESSED => self.on_payment_processed(envelope).await,
                channels::USER_VALIDATION_FAILED => self.on_user_failed(envelope).await,
                channels::INVENTORY_RESERVATION_FAILED => self.on_inventory_failed(envelope).await,
                channels::ITEM_RESERVATION_FAILED => self.on_item_failed(envelope).await,
                channels::PAYMENT_FAILED => self.on_payment_failed(envelope).await,
                other => {
                    tracing::warn!(event_type = other, "order participant ignoring event");
                    Ok(())
                }
            }
        })
    }
}
