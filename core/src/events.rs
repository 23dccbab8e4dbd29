//! Event taxonomy for the purchase saga.
//!
//! One payload struct per wire event. Field names serialize in camelCase to
//! match the channel contract; the channel name is the event type string.
//!
//! Two contract refinements over the minimal taxonomy:
//!
//! - `payment.reserved` and `inventory.reserved` carry `itemId`/`quantity`
//!   so the order's line data flows through every step instead of being
//!   re-read from another participant's rows.
//! - every `*.failed` payload carries a typed [`FailedStep`] discriminant;
//!   consumers no longer classify the failing step from reason text.

use crate::envelope::Event;
use crate::types::{ItemId, Money, OrderId, UserCouponId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Channel names. The channel a payload travels on equals its event type.
pub mod channels {
    /// Saga start: order persisted, chain begins
    pub const ORDER_CREATED: &str = "order.created";
    /// Terminal success for a saga
    pub const ORDER_COMPLETED: &str = "order.completed";
    /// Terminal failure for a saga
    pub const ORDER_FAILED: &str = "order.failed";
    /// Coupon pre-validation requested by the order participant
    pub const COUPON_VALIDATION_REQUESTED: &str = "coupon.validation.requested";
    /// Coupon accepted, discount computed
    pub const COUPON_VALIDATED: &str = "coupon.validated";
    /// Coupon rejected
    pub const COUPON_VALIDATION_FAILED: &str = "coupon.validation.failed";
    /// User checks passed
    pub const USER_VALIDATED: &str = "user.validated";
    /// User checks failed
    pub const USER_VALIDATION_FAILED: &str = "user.validation.failed";
    /// Balance reserved for the order
    pub const PAYMENT_RESERVED: &str = "payment.reserved";
    /// Balance restored during compensation
    pub const PAYMENT_ROLLBACK: &str = "payment.rollback";
    /// Inventory slot reserved
    pub const INVENTORY_RESERVED: &str = "inventory.reserved";
    /// Inventory row written after payment
    pub const INVENTORY_CONFIRMED: &str = "inventory.confirmed";
    /// Inventory slot released during compensation
    pub const INVENTORY_ROLLBACK: &str = "inventory.rollback";
    /// Slot reservation failed
    pub const INVENTORY_RESERVATION_FAILED: &str = "inventory.reservation.failed";
    /// Stock decremented and reservation recorded
    pub const ITEM_RESERVED: &str = "item.reserved";
    /// Stock reservation failed
    pub const ITEM_RESERVATION_FAILED: &str = "item.reservation.failed";
    /// Stock restored during compensation
    pub const ITEM_RESTORED: &str = "item.restored";
    /// Payment executed (order participant consumes this)
    pub const PAYMENT_PROCESSED: &str = "payment.processed";
    /// Payment executed (item participant confirms on this)
    pub const PAYMENT_SUCCESS: &str = "payment.success";
    /// Payment declined or errored
    pub const PAYMENT_FAILED: &str = "payment.failed";
    /// Outcome notification delivered
    pub const NOTIFICATION_SENT: &str = "notification.sent";

    /// Every saga channel, in no particular order. Used by consumers that
    /// observe the whole flow (audit).
    pub const ALL: &[&str] = &[
        ORDER_CREATED,
        ORDER_COMPLETED,
        ORDER_FAILED,
        COUPON_VALIDATION_REQUESTED,
        COUPON_VALIDATED,
        COUPON_VALIDATION_FAILED,
        USER_VALIDATED,
        USER_VALIDATION_FAILED,
        PAYMENT_RESERVED,
        PAYMENT_ROLLBACK,
        INVENTORY_RESERVED,
        INVENTORY_CONFIRMED,
        INVENTORY_ROLLBACK,
        INVENTORY_RESERVATION_FAILED,
        ITEM_RESERVED,
        ITEM_RESERVATION_FAILED,
        ITEM_RESTORED,
        PAYMENT_PROCESSED,
        PAYMENT_SUCCESS,
        PAYMENT_FAILED,
        NOTIFICATION_SENT,
    ];
}

/// Which saga step produced a failure event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailedStep {
    /// Coupon pre-validation
    Coupon,
    /// User validation / balance reservation
    User,
    /// Inventory slot reservation
    Inventory,
    /// Item stock reservation
    Item,
    /// Payment execution
    Payment,
}

impl FailedStep {
    /// Best-effort classification from reason text, for producers that do
    /// not emit the typed discriminant.
    #[must_use]
    pub fn classify(reason: &str) -> Option<Self> {
        let reason = reason.to_ascii_lowercase();
        if reason.contains("coupon") {
            Some(Self::Coupon)
        } else if reason.contains("balance") || reason.contains("user") {
            Some(Self::User)
        } else if reason.contains("slot") || reason.contains("inventory") {
            Some(Self::Inventory)
        } else if reason.contains("stock") || reason.contains("item") {
            Some(Self::Item)
        } else if reason.contains("payment") || reason.contains("reservation-missing") {
            Some(Self::Payment)
        } else {
            None
        }
    }
}

// ============================================================================
// Order lifecycle
// ============================================================================

/// `order.created` - the saga starts. `totalAmount` is the amount to charge
/// downstream; when a coupon applied, it already reflects the discount.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    /// Order identifier
    pub order_id: OrderId,
    /// Buying user
    pub user_id: UserId,
    /// Purchased item
    pub item_id: ItemId,
    /// Units purchased
    pub quantity: u32,
    /// Amount to charge
    pub total_amount: Money,
    /// Discount applied before the chain started
    pub discount_amount: Money,
    /// Final amount (equal to `total_amount` on the wire)
    pub final_amount: Money,
    /// Coupon consumed by this order, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_coupon_id: Option<UserCouponId>,
}

impl Event for OrderCreated {
    fn event_type(&self) -> &'static str {
        channels::ORDER_CREATED
    }
}

/// `order.completed` - terminal success.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCompleted {
    /// Order identifier
    pub order_id: OrderId,
    /// Buying user
    pub user_id: UserId,
    /// Display name of the purchased item
    pub item_name: String,
    /// Amount charged
    pub total_amount: Money,
}

impl Event for OrderCompleted {
    fn event_type(&self) -> &'static str {
        channels::ORDER_COMPLETED
    }
}

/// `order.failed` - terminal failure, after compensation has been triggered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFailed {
    /// Order identifier
    pub order_id: OrderId,
    /// Buying user
    pub user_id: UserId,
    /// Human-readable failure reason
    pub reason: String,
    /// Step that failed
    pub failed_step: FailedStep,
    /// Coupon held by the order, so the validator can release it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_coupon_id: Option<UserCouponId>,
    /// Discount that had been applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_amount: Option<Money>,
}

impl Event for OrderFailed {
    fn event_type(&self) -> &'static str {
        channels::ORDER_FAILED
    }
}

// ============================================================================
// Coupon validation
// ============================================================================

/// `coupon.validation.requested` - order asks the validator for a discount.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponValidationRequested {
    /// Order identifier
    pub order_id: OrderId,
    /// Buying user
    pub user_id: UserId,
    /// Purchased item
    pub item_id: ItemId,
    /// Units purchased
    pub quantity: u32,
    /// Undiscounted order total
    pub total_amount: Money,
    /// Coupon to validate
    pub user_coupon_id: UserCouponId,
}

impl Event for CouponValidationRequested {
    fn event_type(&self) -> &'static str {
        channels::COUPON_VALIDATION_REQUESTED
    }
}

/// Discount computation rule carried inside `couponInfo`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    /// Fixed amount off, in cents
    Fixed,
    /// Percentage off the order total
    Percentage,
}

/// Descriptive coupon data echoed back to the order participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponInfo {
    /// Coupon display name
    pub name: String,
    /// How the discount is computed
    pub discount_type: DiscountType,
    /// Fixed cents or percentage points, per `discount_type`
    pub discount_value: u64,
    /// Cap for percentage discounts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_discount: Option<Money>,
}

/// `coupon.validated` - discount accepted and computed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponValidated {
    /// Order identifier
    pub order_id: OrderId,
    /// Buying user
    pub user_id: UserId,
    /// Validated coupon
    pub user_coupon_id: UserCouponId,
    /// Computed discount
    pub discount_amount: Money,
    /// Amount to charge after the discount
    pub final_amount: Money,
    /// Undiscounted total the discount was computed from
    pub original_amount: Money,
    /// Descriptive coupon data
    pub coupon_info: CouponInfo,
}

impl Event for CouponValidated {
    fn event_type(&self) -> &'static str {
        channels::COUPON_VALIDATED
    }
}

/// `coupon.validation.failed` - coupon rejected; the order fails before the
/// chain starts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponValidationFailed {
    /// Order identifier
    pub order_id: OrderId,
    /// Buying user
    pub user_id: UserId,
    /// Rejected coupon
    pub user_coupon_id: UserCouponId,
    /// Every check that failed
    pub errors: Vec<String>,
    /// Summary reason
    pub reason: String,
    /// Step that failed (always `coupon`); optional so envelopes from
    /// producers without the discriminant still decode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<FailedStep>,
}

impl Event for CouponValidationFailed {
    fn event_type(&self) -> &'static str {
        channels::COUPON_VALIDATION_FAILED
    }
}

// ============================================================================
// User step
// ============================================================================

/// `user.validated` - user checks passed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserValidated {
    /// Order identifier
    pub order_id: OrderId,
    /// Validated user
    pub user_id: UserId,
    /// Balance after the reservation committed
    pub user_balance: Money,
    /// Amount that was required
    pub required_amount: Money,
}

impl Event for UserValidated {
    fn event_type(&self) -> &'static str {
        channels::USER_VALIDATED
    }
}

/// `user.validation.failed` - user checks failed; saga ends at step 1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserValidationFailed {
    /// Order identifier
    pub order_id: OrderId,
    /// User that failed validation
    pub user_id: UserId,
    /// Failure reason (`user-not-found`, `user-inactive`,
    /// `insufficient-balance`, `insufficient-inventory-slots`,
    /// `system-error`)
    pub reason: String,
    /// Step that failed (always `user`); optional so envelopes from
    /// producers without the discriminant still decode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<FailedStep>,
}

impl Event for UserValidationFailed {
    fn event_type(&self) -> &'static str {
        channels::USER_VALIDATION_FAILED
    }
}

/// `payment.reserved` - balance held for the order. Carries the order line
/// so downstream steps need no foreign reads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReserved {
    /// Order identifier
    pub order_id: OrderId,
    /// Paying user
    pub user_id: UserId,
    /// Purchased item
    pub item_id: ItemId,
    /// Units purchased
    pub quantity: u32,
    /// Amount held
    pub reserved_amount: Money,
    /// Balance left after the hold
    pub remaining_balance: Money,
}

impl Event for PaymentReserved {
    fn event_type(&self) -> &'static str {
        channels::PAYMENT_RESERVED
    }
}

/// `payment.rollback` - balance restored during compensation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRollback {
    /// Order identifier
    pub order_id: OrderId,
    /// User whose balance was restored
    pub user_id: UserId,
    /// Amount returned
    pub rollback_amount: Money,
    /// Why the rollback ran
    pub reason: String,
}

impl Event for PaymentRollback {
    fn event_type(&self) -> &'static str {
        channels::PAYMENT_ROLLBACK
    }
}

// ============================================================================
// Inventory step
// ============================================================================

/// `inventory.reserved` - a slot is held; carries the order line for the
/// item step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReserved {
    /// Order identifier
    pub order_id: OrderId,
    /// Slot owner
    pub user_id: UserId,
    /// Item the slot is held for
    pub item_id: ItemId,
    /// Units purchased
    pub quantity: u32,
    /// Slots taken by this reservation (always 1)
    pub reserved_slots: u32,
    /// Slots left after the hold
    pub available_slots: u32,
}

impl Event for InventoryReserved {
    fn event_type(&self) -> &'static str {
        channels::INVENTORY_RESERVED
    }
}

/// `inventory.confirmed` - the item landed in the user's inventory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryConfirmed {
    /// Order identifier
    pub order_id: OrderId,
    /// Inventory owner
    pub user_id: UserId,
    /// Item added
    pub item_id: ItemId,
    /// Units added
    pub quantity: u32,
}

impl Event for InventoryConfirmed {
    fn event_type(&self) -> &'static str {
        channels::INVENTORY_CONFIRMED
    }
}

/// `inventory.rollback` - the held slot was released.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryRollback {
    /// Order identifier
    pub order_id: OrderId,
    /// Slot owner
    pub user_id: UserId,
    /// Item the slot was held for
    pub item_id: ItemId,
    /// Slots released (always 1)
    pub released_slots: u32,
    /// Why the rollback ran
    pub reason: String,
}

impl Event for InventoryRollback {
    fn event_type(&self) -> &'static str {
        channels::INVENTORY_ROLLBACK
    }
}

/// `inventory.reservation.failed` - no free slot; saga compensates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReservationFailed {
    /// Order identifier
    pub order_id: OrderId,
    /// User that is out of slots
    pub user_id: UserId,
    /// Item that could not be slotted
    pub item_id: ItemId,
    /// Failure reason
    pub reason: String,
    /// Step that failed (always `inventory`); optional so envelopes from
    /// producers without the discriminant still decode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<FailedStep>,
}

impl Event for InventoryReservationFailed {
    fn event_type(&self) -> &'static str {
        channels::INVENTORY_RESERVATION_FAILED
    }
}

// ============================================================================
// Item step
// ============================================================================

/// `item.reserved` - stock decremented and a durable reservation recorded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemReserved {
    /// Order identifier
    pub order_id: OrderId,
    /// Buying user
    pub user_id: UserId,
    /// Reserved item
    pub item_id: ItemId,
    /// Units reserved
    pub reserved_quantity: u32,
    /// Stock left after the decrement
    pub remaining_stock: u32,
}

impl Event for ItemReserved {
    fn event_type(&self) -> &'static str {
        channels::ITEM_RESERVED
    }
}

/// `item.reservation.failed` - stock check failed; saga compensates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemReservationFailed {
    /// Order identifier
    pub order_id: OrderId,
    /// Buying user
    pub user_id: UserId,
    /// Item that could not be reserved
    pub item_id: ItemId,
    /// Failure reason (`item-not-found`, `item-inactive`,
    /// `insufficient-stock`, `system-error`)
    pub reason: String,
    /// Step that failed (always `item`); optional so envelopes from
    /// producers without the discriminant still decode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<FailedStep>,
}

impl Event for ItemReservationFailed {
    fn event_type(&self) -> &'static str {
        channels::ITEM_RESERVATION_FAILED
    }
}

/// One restored line inside [`ItemRestored`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoredItem {
    /// Item whose stock was restored
    pub item_id: ItemId,
    /// Units returned to stock
    pub restored_quantity: u32,
}

/// `item.restored` - stock returned during compensation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRestored {
    /// Order identifier
    pub order_id: OrderId,
    /// Buying user
    pub user_id: UserId,
    /// Every restored line
    pub restored_items: Vec<RestoredItem>,
    /// Why the restore ran
    pub reason: String,
}

impl Event for ItemRestored {
    fn event_type(&self) -> &'static str {
        channels::ITEM_RESTORED
    }
}

// ============================================================================
// Payment step
// ============================================================================

/// `payment.processed` - the charge went through.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProcessed {
    /// Order identifier
    pub order_id: OrderId,
    /// Paying user
    pub user_id: UserId,
    /// Amount charged
    pub payment_amount: Money,
    /// Payment method used
    pub payment_method: String,
}

impl Event for PaymentProcessed {
    fn event_type(&self) -> &'static str {
        channels::PAYMENT_PROCESSED
    }
}

/// `payment.success` - same payload as `payment.processed`, on the channel
/// the item participant confirms from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSucceeded {
    /// Order identifier
    pub order_id: OrderId,
    /// Paying user
    pub user_id: UserId,
    /// Amount charged
    pub payment_amount: Money,
    /// Payment method used
    pub payment_method: String,
}

impl Event for PaymentSucceeded {
    fn event_type(&self) -> &'static str {
        channels::PAYMENT_SUCCESS
    }
}

impl From<PaymentProcessed> for PaymentSucceeded {
    fn from(processed: PaymentProcessed) -> Self {
        Self {
            order_id: processed.order_id,
            user_id: processed.user_id,
            payment_amount: processed.payment_amount,
            payment_method: processed.payment_method,
        }
    }
}

/// `payment.failed` - charge declined or errored; saga compensates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailed {
    /// Order identifier
    pub order_id: OrderId,
    /// Paying user
    pub user_id: UserId,
    /// Failure reason (`reservation-missing`, gateway decline text,
    /// `system-error`)
    pub reason: String,
    /// Amount the charge was attempted for
    pub attempted_amount: Money,
    /// Step that failed (always `payment`); optional so envelopes from
    /// producers without the discriminant still decode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<FailedStep>,
}

impl Event for PaymentFailed {
    fn event_type(&self) -> &'static str {
        channels::PAYMENT_FAILED
    }
}

// ============================================================================
// Notification
// ============================================================================

/// Notification category on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    /// Order completed successfully
    OrderCompleted,
    /// Order failed and was compensated
    OrderFailed,
}

/// `notification.sent` - an outcome notification was delivered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSent {
    /// Order identifier
    pub order_id: OrderId,
    /// Notified user
    pub user_id: UserId,
    /// Rendered message
    pub message: String,
    /// Notification category
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Delivery timestamp
    pub sent_at: DateTime<Utc>,
}

impl Event for NotificationSent {
    fn event_type(&self) -> &'static str {
        channels::NOTIFICATION_SENT
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;

    #[test]
    fn order_created_wire_shape() {
        let event = OrderCreated {
            order_id: OrderId::new(),
            user_id: UserId::new(),
            item_id: ItemId::new(),
            quantity: 2,
            total_amount: Money::from_dollars(200),
            discount_amount: Money::ZERO,
            final_amount: Money::from_dollars(200),
            user_coupon_id: None,
        };
        let envelope = Envelope::encode(&event, chrono::Utc::now()).unwrap();

        assert_eq!(envelope.event_type, "order.created");
        assert!(envelope.data.get("totalAmount").is_some());
        assert!(envelope.data.get("finalAmount").is_some());
        // absent optionals are omitted, not null
        assert!(envelope.data.get("userCouponId").is_none());

        let decoded: OrderCreated = envelope.decode().unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn failed_step_serializes_lowercase() {
        let json = serde_json::to_value(FailedStep::Inventory).unwrap();
        assert_eq!(json, serde_json::json!("inventory"));
    }

    #[test]
    fn failed_step_classification_fallback() {
        assert_eq!(
            FailedStep::classify("insufficient-balance"),
            Some(FailedStep::User)
        );
        assert_eq!(
            FailedStep::classify("insufficient-stock"),
            Some(FailedStep::Item)
        );
        assert_eq!(
            FailedStep::classify("insufficient-inventory-slots"),
            Some(FailedStep::Inventory)
        );
        assert_eq!(
            FailedStep::classify("reservation-missing"),
            Some(FailedStep::Payment)
        );
        assert_eq!(FailedStep::classify("meteor strike"), None);
    }

    #[test]
    fn notification_kind_uses_type_field() {
        let event = NotificationSent {
            order_id: OrderId::new(),
            user_id: UserId::new(),
            message: "done".to_string(),
            kind: NotificationKind::OrderCompleted,
            sent_at: chrono::Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value.get("type"), Some(&serde_json::json!("order-completed")));
    }

    #[test]
    fn payment_success_mirrors_processed() {
        let processed = PaymentProcessed {
            order_id: OrderId::new(),
            user_id: UserId::new(),
            payment_amount: Money::from_dollars(10),
            payment_method: "credit-card".to_string(),
        };
        let success: PaymentSucceeded = processed.clone().into();
        assert_eq!(success.order_id, processed.order_id);
        assert_eq!(success.payment_amount, processed.payment_amount);
        assert_eq!(success.event_type(), "payment.success");
        assert_eq!(processed.event_type(), "payment.processed");
    }

    #[test]
    fn every_channel_is_unique() {
        let mut seen = std::collections::HashSet::new();
        for channel in channels::ALL {
            assert!(seen.insert(*channel), "duplicate channel {channel}");
        }
        assert_eq!(channels::ALL.len(), 21);
    }
}
