//! Coupon validator: external collaborator honouring four events.
//!
//! On `coupon.validation.requested` it checks ownership, availability,
//! expiry, remaining uses, minimum order amount and applicability, then
//! computes the discount and reserves the usage. The terminal order
//! events settle the usage: `order.completed` confirms it,
//! `order.failed` releases it. The saga core treats this participant as a
//! black box behind those events.

use crate::participants::{decode_payload, publish_event};
use crate::storage::{StorageError, StoreFuture};
use chrono::{DateTime, Utc};
use purchase_saga_core::bus::EventBus;
use purchase_saga_core::clock::Clock;
use purchase_saga_core::envelope::Envelope;
use purchase_saga_core::events::{
    channels, CouponInfo, CouponValidated, CouponValidationFailed, CouponValidationRequested,
    DiscountType, FailedStep, OrderCompleted, OrderFailed,
};
use purchase_saga_core::types::{ItemId, Money, OrderId, UserCouponId, UserId};
use purchase_saga_runtime::{HandlerError, HandlerFuture, Participant};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

// ============================================================================
// Coupon rows and store
// ============================================================================

/// Usage lifecycle of a user-held coupon.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CouponUsageStatus {
    /// Can be applied to an order
    Available,
    /// Held by an in-flight order
    Reserved,
    /// Consumed by a completed order
    Used,
    /// Administratively disabled
    Disabled,
}

/// A coupon held by a user.
#[derive(Clone, Debug)]
pub struct UserCoupon {
    /// Coupon identifier
    pub id: UserCouponId,
    /// Owning user
    pub user_id: UserId,
    /// Display name
    pub name: String,
    /// How the discount is computed
    pub discount_type: DiscountType,
    /// Fixed cents or percentage points
    pub discount_value: u64,
    /// Cap for percentage discounts
    pub max_discount: Option<Money>,
    /// Minimum order total the coupon applies to
    pub min_order_amount: Option<Money>,
    /// Restrict to specific items; `None` means any item
    pub applicable_items: Option<Vec<ItemId>>,
    /// Uses left
    pub remaining_uses: u32,
    /// Validity window end
    pub expires_at: Option<DateTime<Utc>>,
    /// Current usage status
    pub status: CouponUsageStatus,
}

impl UserCoupon {
    /// Compute the discount for an order total, honouring the cap and
    /// never exceeding the total itself.
    #[must_use]
    pub fn discount_for(&self, total: Money) -> Money {
        let raw = match self.discount_type {
            DiscountType::Fixed => Money::from_cents(self.discount_value),
            DiscountType::Percentage => {
                let discount = total.percentage(self.discount_value);
                self.max_discount.map_or(discount, |cap| discount.min(cap))
            }
        };
        raw.min(total)
    }

    fn coupon_info(&self) -> CouponInfo {
        CouponInfo {
            name: self.name.clone(),
            discount_type: self.discount_type,
            discount_value: self.discount_value,
            max_discount: self.max_discount,
        }
    }
}

/// Coupon rows, owned by the validator.
pub trait CouponStore: Send + Sync {
    /// Insert or replace a coupon row.
    fn insert(&self, coupon: UserCoupon) -> StoreFuture<'_, Result<(), StorageError>>;

    /// Fetch a coupon row.
    fn get(&self, id: UserCouponId) -> StoreFuture<'_, Result<Option<UserCoupon>, StorageError>>;

    /// Hold the coupon for an order: one use consumed, status `Reserved`.
    fn reserve_usage(
        &self,
        id: UserCouponId,
        order_id: OrderId,
    ) -> StoreFuture<'_, Result<(), StorageError>>;

    /// Settle the usage held by `order_id` as consumed. Returns whether a
    /// held usage existed.
    fn confirm_usage(&self, order_id: OrderId) -> StoreFuture<'_, Result<bool, StorageError>>;

    /// Return the usage held by `order_id` to the pool. Returns whether a
    /// held usage existed.
    fn release_usage(&self, order_id: OrderId) -> StoreFuture<'_, Result<bool, StorageError>>;
}

/// In-memory [`CouponStore`].
#[derive(Default)]
pub struct MemoryCouponStore {
    coupons: Mutex<HashMap<UserCouponId, UserCoupon>>,
    held_by_order: Mutex<HashMap<OrderId, UserCouponId>>,
}

impl MemoryCouponStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CouponStore for MemoryCouponStore {
    fn insert(&self, coupon: UserCoupon) -> StoreFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            self.coupons.lock().await.insert(coupon.id, coupon);
            Ok(())
        })
    }

    fn get(&self, id: UserCouponId) -> StoreFuture<'_, Result<Option<UserCoupon>, StorageError>> {
        Box::pin(async move { Ok(self.coupons.lock().await.get(&id).cloned()) })
    }

    fn reserve_usage(
        &self,
        id: UserCouponId,
        order_id: OrderId,
    ) -> StoreFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            let mut coupons = self.coupons.lock().await;
            let coupon = coupons
                .get_mut(&id)
                .ok_or_else(|| StorageError(format!("coupon {id} vanished")))?;
            coupon.remaining_uses = coupon.remaining_uses.saturating_sub(1);
            coupon.status = CouponUsageStatus::Reserved;
            drop(coupons);

            self.held_by_order.lock().await.insert(order_id, id);
            Ok(())
        })
    }

    fn confirm_usage(&self, order_id: OrderId) -> StoreFuture<'_, Result<bool, StorageError>> {
        Box::pin(async move {
            let Some(coupon_id) = self.held_by_order.lock().await.remove(&order_id) else {
                return Ok(false);
            };
            if let Some(coupon) = self.coupons.lock().await.get_mut(&coupon_id) {
                coupon.status = CouponUsageStatus::Used;
            }
            Ok(true)
        })
    }

    fn release_usage(&self, order_id: OrderId) -> StoreFuture<'_, Result<bool, StorageError>> {
        Box::pin(async move {
            let Some(coupon_id) = self.held_by_order.lock().await.remove(&order_id) else {
                return Ok(false);
            };
            if let Some(coupon) = self.coupons.lock().await.get_mut(&coupon_id) {
                coupon.remaining_uses = coupon.remaining_uses.saturating_add(1);
                coupon.status = CouponUsageStatus::Available;
            }
            Ok(true)
        })
    }
}

// ============================================================================
// Validator participant
// ============================================================================

/// The coupon validator.
pub struct CouponValidator {
    coupons: Arc<dyn CouponStore>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
}

const CHANNELS: &[&str] = &[
    channels::COUPON_VALIDATION_REQUESTED,
    channels::ORDER_COMPLETED,
    channels::ORDER_FAILED,
];

impl CouponValidator {
    /// Create the validator with its collaborators.
    #[must_use]
    pub fn new(
        coupons: Arc<dyn CouponStore>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { coupons, bus, clock }
    }

    /// Run every check, collecting all violations.
    fn check(
        coupon: Option<&UserCoupon>,
        request: &CouponValidationRequested,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let Some(coupon) = coupon else {
            return vec!["coupon-not-found".to_string()];
        };

        let mut errors = Vec::new();
        if coupon.user_id != request.user_id {
            errors.push("coupon-not-owned".to_string());
        }
        match coupon.status {
            CouponUsageStatus::Available => {}
            CouponUsageStatus::Reserved | CouponUsageStatus::Used => {
                errors.push("coupon-already-used".to_string());
            }
            CouponUsageStatus::Disabled => errors.push("coupon-disabled".to_string()),
        }
        if coupon.expires_at.is_some_and(|at| at <= now) {
            errors.push("coupon-expired".to_string());
        }
        if coupon.remaining_uses == 0 {
            errors.push("coupon-out-of-stock".to_string());
        }
        if coupon
            .min_order_amount
            .is_some_and(|min| request.total_amount < min)
        {
            errors.push("order-below-minimum".to_string());
        }
        if coupon
            .applicable_items
            .as_ref()
            .is_some_and(|items| !items.contains(&request.item_id))
        {
            errors.push("coupon-not-applicable".to_string());
        }
        errors
    }

    async fn on_validation_requested(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let request: CouponValidationRequested = decode_payload(envelope)?;

        let coupon = self
            .coupons
            .get(request.user_coupon_id)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;

        let errors = Self::check(coupon.as_ref(), &request, self.clock.now());
        if !errors.is_empty() {
            tracing::warn!(
                order_id = %request.order_id,
                user_coupon_id = %request.user_coupon_id,
                errors = ?errors,
                "coupon rejected"
            );
            let reason = errors
                .first()
                .cloned()
                .unwrap_or_else(|| "coupon-invalid".to_string());
            let failed = CouponValidationFailed {
                order_id: request.order_id,
                user_id: request.user_id,
                user_coupon_id: request.user_coupon_id,
                errors,
                reason,
                failed_step: Some(FailedStep::Coupon),
            };
            return publish_event(self.bus.as_ref(), self.clock.as_ref(), &failed).await;
        }

        // checked above: the coupon exists when errors is empty
        let Some(coupon) = coupon else {
            return Ok(());
        };
        let discount = coupon.discount_for(request.total_amount);
        let final_amount = request.total_amount.saturating_sub(discount);

        self.coupons
            .reserve_usage(coupon.id, request.order_id)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;

        tracing::info!(
            order_id = %request.order_id,
            user_coupon_id = %coupon.id,
            discount = discount.cents(),
            final_amount = final_amount.cents(),
            "coupon validated"
        );
        let validated = CouponValidated {
            order_id: request.order_id,
            user_id: request.user_id,
            user_coupon_id: coupon.id,
            discount_amount: discount,
            final_amount,
            original_amount: request.total_amount,
            coupon_info: coupon.coupon_info(),
        };
        publish_event(self.bus.as_ref(), self.clock.as_ref(), &validated).await
    }

    async fn on_order_completed(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: OrderCompleted = decode_payload(envelope)?;
        let confirmed = self
            .coupons
            .confirm_usage(payload.order_id)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;
        if confirmed {
            tracing::info!(order_id = %payload.order_id, "coupon usage confirmed");
        }
        Ok(())
    }

    async fn on_order_failed(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: OrderFailed = decode_payload(envelope)?;
        if payload.user_coupon_id.is_none() {
            return Ok(());
        }
        let released = self
            .coupons
            .release_usage(payload.order_id)
            .await
            .map_err(|error| HandlerError::Retryable(error.to_string()))?;
        if released {
            tracing::info!(order_id = %payload.order_id, "coupon usage released");
        }
        Ok(())
    }
}

impl Participant for CouponValidator {
    fn name(&self) -> &'static str {
        "coupon"
    }

    fn channels(&self) -> &'static [&'static str] {
        CHANNELS
    }

    fn handle<'a>(&'a self, envelope: &'a Envelope) -> HandlerFuture<'a> {
        Box::pin(async move {
            match envelope.event_type.as_str() {
                channels::COUPON_VALIDATION_REQUESTED => {
                    self.on_validation_requested(envelope).await
                }
                channels::ORDER_COMPLETED => self.on_order_completed(envelope).await,
                channels::ORDER_FAILED => self.on_order_failed(envelope).await,
                other => {
                    tracing::warn!(event_type = other, "coupon validator ignoring event");
                    Ok(())
                }
            }
        })
    }
}
