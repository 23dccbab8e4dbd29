//! Storage interfaces for the saga's durable rows.
//!
//! Relational engines are outside this crate; participants depend on these
//! traits and the protocols lean on their transactional contracts:
//!
//! - `UserStore::reserve_balance` runs its checks and the decrement under
//!   an exclusive per-user row lock, as one local transaction.
//! - `ItemStore::reserve_stock` co-locates the stock decrement and the
//!   reservation insert; `cancel_reservations` and `sweep_expired`
//!   co-locate the status flip and the stock restore, one transaction per
//!   reservation. A reservation leaves `RESERVED` exactly once, so the
//!   matching stock delta is applied exactly once.
//!
//! Methods return boxed futures so participants can hold stores as
//! `Arc<dyn ...>` trait objects.

pub mod memory;

use crate::types::{
    InventoryEntry, Item, ItemReservation, Order, User,
};
use chrono::{DateTime, Utc};
use purchase_saga_core::types::{ItemId, Money, OrderId, UserCouponId, UserId};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Infrastructure failure inside a store.
#[derive(Error, Debug, Clone)]
#[error("storage failure: {0}")]
pub struct StorageError(pub String);

// ============================================================================
// Orders
// ============================================================================

/// Result of driving an order to a terminal state.
#[derive(Debug, Clone)]
pub enum TerminalTransition {
    /// The transition applied now; callers publish the terminal event
    Applied(Order),
    /// The order was already terminal; duplicate trigger, nothing to emit
    AlreadyTerminal(Order),
    /// No such order
    NotFound,
}

/// Order rows, owned by the order participant.
pub trait OrderStore: Send + Sync {
    /// Insert a new order row.
    fn insert(&self, order: Order) -> StoreFuture<'_, Result<(), StorageError>>;

    /// Fetch an order row.
    fn get(&self, id: OrderId) -> StoreFuture<'_, Result<Option<Order>, StorageError>>;

    /// Record a validated coupon on a pending order and recompute the
    /// final amount. Returns the updated row.
    fn apply_coupon(
        &self,
        id: OrderId,
        coupon_id: UserCouponId,
        discount: Money,
    ) -> StoreFuture<'_, Result<Option<Order>, StorageError>>;

    /// Mark the chain as started. Idempotent.
    fn begin_processing(&self, id: OrderId) -> StoreFuture<'_, Result<(), StorageError>>;

    /// Drive the order to `Completed`. Terminal states are sticky.
    fn mark_completed(&self, id: OrderId)
    -> StoreFuture<'_, Result<TerminalTransition, StorageError>>;

    /// Drive the order to `Failed` with a reason. Terminal states are
    /// sticky.
    fn mark_failed<'a>(
        &'a self,
        id: OrderId,
        reason: &str,
    ) -> StoreFuture<'a, Result<TerminalTransition, StorageError>>;
}

// ============================================================================
// Users
// ============================================================================

/// Why a balance reservation was refused. `Display` renders the wire
/// reason verbatim.
#[derive(Error, Debug)]
pub enum BalanceError {
    /// No such user
    #[error("user-not-found")]
    UserNotFound,

    /// The user account is disabled
    #[error("user-inactive")]
    UserInactive,

    /// The required amount exceeds the balance
    #[error("insufficient-balance")]
    InsufficientBalance,

    /// The advisory slot count is already at the user's maximum
    #[error("insufficient-inventory-slots")]
    InsufficientSlots,

    /// The store itself failed
    #[error("system-error")]
    Storage(#[source] StorageError),
}

/// Balances observed by a successful reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceSnapshot {
    /// Balance before the decrement, kept for rollback
    pub original_balance: Money,
    /// Balance after the decrement
    pub remaining_balance: Money,
}

/// User rows, owned by the user participant.
pub trait UserStore: Send + Sync {
    /// Insert or replace a user row.
    fn insert(&self, user: User) -> StoreFuture<'_, Result<(), StorageError>>;

    /// Fetch a user row.
    fn get(&self, id: UserId) -> StoreFuture<'_, Result<Option<User>, StorageError>>;

    /// Validate the user and decrement the balance by `required`, all
    /// under an exclusive per-user row lock. `occupied_slots` is the
    /// advisory slot count read by the caller; the check against
    /// `max_inventory_slots` re-runs inside the transaction.
    fn reserve_balance(
        &self,
        user_id: UserId,
        required: Money,
        occupied_slots: u32,
    ) -> StoreFuture<'_, Result<BalanceSnapshot, BalanceError>>;

    /// Write the pre-reservation balance back, under the row lock. The
    /// snapshot is authoritative: compensation converges even when applied
    /// twice.
    fn restore_balance(
        &self,
        user_id: UserId,
        original: Money,
    ) -> StoreFuture<'_, Result<(), BalanceError>>;
}

// ============================================================================
// Items and stock reservations
// ============================================================================

/// Why a stock reservation was refused. `Display` renders the wire reason
/// verbatim.
#[derive(Error, Debug)]
pub enum StockError {
    /// No such item
    #[error("item-not-found")]
    ItemNotFound,

    /// The item is disabled for purchase
    #[error("item-inactive")]
    ItemInactive,

    /// Requested quantity exceeds the stock
    #[error("insufficient-stock")]
    InsufficientStock,

    /// The store itself failed
    #[error("system-error")]
    Storage(#[source] StorageError),
}

/// Result of a successful stock reservation.
#[derive(Debug, Clone)]
pub struct StockReservation {
    /// The durable reservation row, status `Reserved`
    pub reservation: ItemReservation,
    /// Stock level after the decrement
    pub remaining_stock: u32,
}

/// One restored stock line from a cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredStock {
    /// Item whose stock was restored
    pub item_id: ItemId,
    /// Units returned
    pub quantity: u32,
}

/// Item rows plus their durable reservations, owned by the item
/// participant.
pub trait ItemStore: Send + Sync {
    /// Insert or replace an item row.
    fn insert(&self, item: Item) -> StoreFuture<'_, Result<(), StorageError>>;

    /// Fetch an item row.
    fn get(&self, id: ItemId) -> StoreFuture<'_, Result<Option<Item>, StorageError>>;

    /// Decrement stock by `quantity` and insert a `Reserved` reservation
    /// expiring after `ttl`, in one per-item transaction.
    fn reserve_stock(
        &self,
        order_id: OrderId,
        user_id: UserId,
        item_id: ItemId,
        quantity: u32,
        ttl: Duration,
    ) -> StoreFuture<'_, Result<StockReservation, StockError>>;

    /// Reservations for `order_id` still in `Reserved`.
    fn active_by_order(
        &self,
        order_id: OrderId,
    ) -> StoreFuture<'_, Result<Vec<ItemReservation>, StorageError>>;

    /// Flip all `Reserved` reservations for the order to `Confirmed`. No
    /// stock change. Idempotent; returns how many rows transitioned.
    fn confirm_reservations(
        &self,
        order_id: OrderId,
    ) -> StoreFuture<'_, Result<usize, StorageError>>;

    /// For every `Reserved` reservation of the order: restore the stock
    /// and flip to `Cancelled`, one transaction per reservation. Rows
    /// already terminal are skipped. Returns the restored lines.
    fn cancel_reservations<'a>(
        &'a self,
        order_id: OrderId,
        reason: &str,
    ) -> StoreFuture<'a, Result<Vec<RestoredStock>, StorageError>>;

    /// Flip `Reserved` reservations with `expires_at <= now` to `Expired`,
    /// restoring stock identically to cancellation. Returns the swept
    /// rows.
    fn sweep_expired(
        &self,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Result<Vec<ItemReservation>, StorageError>>;
}

// ============================================================================
// Inventory
// ============================================================================

/// Result of an inventory upsert.
#[derive(Debug, Clone)]
pub struct InventoryUpsert {
    /// The row after the upsert
    pub entry: InventoryEntry,
    /// Whether a new row (slot) was created
    pub newly_created: bool,
}

/// Per-user inventory rows, owned by the inventory participant.
pub trait InventoryStore: Send + Sync {
    /// Number of rows (occupied slots) the user holds.
    fn count_entries(&self, user_id: UserId) -> StoreFuture<'_, Result<u32, StorageError>>;

    /// Upsert the user's row for `item_id`: increment the quantity if the
    /// row exists, insert it otherwise.
    fn add(
        &self,
        user_id: UserId,
        item_id: ItemId,
        quantity: u32,
    ) -> StoreFuture<'_, Result<InventoryUpsert, StorageError>>;

    /// All rows the user holds.
    fn entries(
        &self,
        user_id: UserId,
    ) -> StoreFuture<'_, Result<Vec<InventoryEntry>, StorageError>>;
}
