//! Domain rows owned by the saga participants.
//!
//! Each entity is mutated only by its owning participant: orders by the
//! order participant, users by the user participant, items and their
//! reservations by the item participant, inventory rows by the inventory
//! participant. The ephemeral KV record shapes live here too so both the
//! writer and the compensating reader agree on them.

use chrono::{DateTime, Utc};
use purchase_saga_core::types::{ItemId, Money, OrderId, ReservationId, UserCouponId, UserId};
use serde::{Deserialize, Serialize};

// ============================================================================
// Order
// ============================================================================

/// Lifecycle of an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Persisted, chain not started
    Pending,
    /// Chain started (`order.created` emitted)
    Processing,
    /// All steps done, awaiting completion record
    Confirmed,
    /// Terminal success
    Completed,
    /// Terminal failure, compensation triggered
    Failed,
    /// Terminal administrative cancellation
    Cancelled,
}

impl OrderStatus {
    /// Whether this status admits no further transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether moving to `next` is a legal transition. Transitions only go
    /// forward; terminal states are sticky.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing | Self::Failed | Self::Cancelled)
                | (
                    Self::Processing,
                    Self::Confirmed | Self::Completed | Self::Failed | Self::Cancelled
                )
                | (Self::Confirmed, Self::Completed | Self::Failed)
        )
    }
}

/// One purchase order; the saga's unit of work.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier
    pub id: OrderId,
    /// Buying user
    pub user_id: UserId,
    /// Purchased item
    pub item_id: ItemId,
    /// Units purchased
    pub quantity: u32,
    /// Undiscounted total (price x quantity)
    pub total_amount: Money,
    /// Discount applied by coupon validation
    pub discount_amount: Money,
    /// Amount actually charged (`total_amount` - `discount_amount`)
    pub final_amount: Money,
    /// Coupon consumed by this order
    pub user_coupon_id: Option<UserCouponId>,
    /// Current status
    pub status: OrderStatus,
    /// Non-empty exactly when the status is `Failed`
    pub failure_reason: Option<String>,
    /// When the row was created
    pub created_at: DateTime<Utc>,
    /// When the row was last mutated
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a pending order with no discount.
    #[must_use]
    pub fn new(
        id: OrderId,
        user_id: UserId,
        item_id: ItemId,
        quantity: u32,
        total_amount: Money,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            item_id,
            quantity,
            total_amount,
            discount_amount: Money::ZERO,
            final_amount: total_amount,
            user_coupon_id: None,
            status: OrderStatus::Pending,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a validated coupon. Recomputes `final_amount` so the amount
    /// invariant holds regardless of what the validator sent.
    pub fn apply_discount(
        &mut self,
        coupon_id: UserCouponId,
        discount: Money,
        now: DateTime<Utc>,
    ) {
        self.user_coupon_id = Some(coupon_id);
        self.discount_amount = discount;
        self.final_amount = self.total_amount.saturating_sub(discount);
        self.updated_at = now;
    }

    /// Mark the chain as started. Idempotent.
    pub fn begin_processing(&mut self, now: DateTime<Utc>) {
        if self.status == OrderStatus::Pending {
            self.status = OrderStatus::Processing;
            self.updated_at = now;
        }
    }

    /// Transition to `Completed`. Returns whether the transition applied;
    /// terminal states are sticky.
    pub fn complete(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.can_transition_to(OrderStatus::Completed) {
            self.status = OrderStatus::Completed;
            self.updated_at = now;
            true
        } else {
            false
        }
    }

    /// Transition to `Failed` with a reason. Returns whether the
    /// transition applied; terminal states are sticky.
    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) -> bool {
        if self.status.can_transition_to(OrderStatus::Failed) {
            self.status = OrderStatus::Failed;
            self.failure_reason = Some(reason.to_string());
            self.updated_at = now;
            true
        } else {
            false
        }
    }
}

// ============================================================================
// User and Item
// ============================================================================

/// A user account; balance mutated only under per-user serialization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// User identifier
    pub id: UserId,
    /// Unique login name
    pub username: String,
    /// Spendable balance
    pub balance: Money,
    /// Inactive users cannot purchase
    pub is_active: bool,
    /// Maximum distinct inventory rows this user may hold
    pub max_inventory_slots: u32,
}

/// A purchasable item; stock mutated only under per-item serialization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Item identifier
    pub id: ItemId,
    /// Display name
    pub name: String,
    /// Unit price
    pub price: Money,
    /// Units in stock, never observed negative
    pub stock: u32,
    /// Inactive items cannot be purchased
    pub is_active: bool,
}

/// One row of a user's inventory (one slot).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InventoryEntry {
    /// Owning user
    pub user_id: UserId,
    /// Held item
    pub item_id: ItemId,
    /// Units held
    pub quantity: u32,
    /// When the row was last mutated
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Item reservations
// ============================================================================

/// Lifecycle of a durable stock reservation. Exactly one transition leaves
/// `Reserved`; `Cancelled` and `Expired` are always paired with a stock
/// restore in the same local transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    /// Stock held, outcome undecided
    Reserved,
    /// Terminal: purchase went through, stock stays decremented
    Confirmed,
    /// Terminal: compensated, stock restored
    Cancelled,
    /// Terminal: swept after TTL, stock restored
    Expired,
}

impl ReservationStatus {
    /// Whether the reservation has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Reserved)
    }
}

/// Durable record of one stock hold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemReservation {
    /// Reservation identifier
    pub id: ReservationId,
    /// Order that holds the stock
    pub order_id: OrderId,
    /// Item the stock belongs to
    pub item_id: ItemId,
    /// Buying user
    pub user_id: UserId,
    /// Units held
    pub reserved_quantity: u32,
    /// Stock level before the decrement
    pub original_stock: u32,
    /// Current status
    pub status: ReservationStatus,
    /// When the hold was taken
    pub reserved_at: DateTime<Utc>,
    /// Advisory expiry for the sweeper
    pub expires_at: DateTime<Utc>,
    /// Why the hold was cancelled, if it was
    pub cancel_reason: Option<String>,
}

impl ItemReservation {
    /// Create a fresh `Reserved` record.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_id: OrderId,
        item_id: ItemId,
        user_id: UserId,
        reserved_quantity: u32,
        original_stock: u32,
        reserved_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            order_id,
            item_id,
            user_id,
            reserved_quantity,
            original_stock,
            status: ReservationStatus::Reserved,
            reserved_at,
            expires_at,
            cancel_reason: None,
        }
    }

    /// Whether the sweeper should reclaim this hold at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Reserved && self.expires_at <= now
    }
}

// ============================================================================
// Ephemeral KV record shapes
// ============================================================================

/// Balance hold stored at `balance_reserve:{userId}:{orderId}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceReservation {
    /// Amount held
    pub amount: Money,
    /// Balance before the hold, used verbatim on rollback
    pub original_balance: Money,
}

/// Slot hold stored at `inventory_reserve:{userId}:{orderId}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotReservation {
    /// Item the slot is held for
    pub item_id: ItemId,
    /// Units purchased
    pub quantity: u32,
    /// When the slot was held
    pub reserved_at: DateTime<Utc>,
}
