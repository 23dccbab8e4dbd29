//! In-memory store implementations.
//!
//! Back the demo binary and the protocol tests. A per-key `tokio::sync::Mutex`
//! models the exclusive row lock: every multi-step operation runs entirely
//! under its key's lock, which is the local-transaction equivalence the
//! traits promise. The map mutexes are held only for point reads/writes and
//! are never nested.

use crate::storage::{
    BalanceError, BalanceSnapshot, InventoryStore, InventoryUpsert, ItemStore, OrderStore,
    RestoredStock, StockError, StockReservation, StorageError, StoreFuture, TerminalTransition,
    UserStore,
};
use crate::types::{
    InventoryEntry, Item, ItemReservation, Order, ReservationStatus, User,
};
use chrono::{DateTime, Utc};
use purchase_saga_core::clock::Clock;
use purchase_saga_core::types::{ItemId, Money, OrderId, ReservationId, UserCouponId, UserId};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Registry of per-key row locks.
struct RowLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> RowLocks<K> {
    fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, key: K) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(key).or_default())
    }
}

// ============================================================================
// Orders
// ============================================================================

/// In-memory [`OrderStore`].
pub struct MemoryOrderStore {
    clock: Arc<dyn Clock>,
    orders: Mutex<HashMap<OrderId, Order>>,
}

impl MemoryOrderStore {
    /// Create an empty store
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            orders: Mutex::new(HashMap::new()),
        }
    }
}

impl OrderStore for MemoryOrderStore {
    fn insert(&self, order: Order) -> StoreFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            self.orders.lock().await.insert(order.id, order);
            Ok(())
        })
    }

    fn get(&self, id: OrderId) -> StoreFuture<'_, Result<Option<Order>, StorageError>> {
        Box::pin(async move { Ok(self.orders.lock().await.get(&id).cloned()) })
    }

    fn apply_coupon(
        &self,
        id: OrderId,
        coupon_id: UserCouponId,
        discount: Money,
    ) -> StoreFuture<'_, Result<Option<Order>, StorageError>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut orders = self.orders.lock().await;
            Ok(orders.get_mut(&id).map(|order| {
                order.apply_discount(coupon_id, discount, now);
                order.clone()
            }))
        })
    }

    fn begin_processing(&self, id: OrderId) -> StoreFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            let now = self.clock.now();
            if let Some(order) = self.orders.lock().await.get_mut(&id) {
                order.begin_processing(now);
            }
            Ok(())
        })
    }

    fn mark_completed(
        &self,
        id: OrderId,
    ) -> StoreFuture<'_, Result<TerminalTransition, StorageError>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut orders = self.orders.lock().await;
            Ok(match orders.get_mut(&id) {
                None => TerminalTransition::NotFound,
                Some(order) => {
                    if order.complete(now) {
                        TerminalTransition::Applied(order.clone())
                    } else {
                        TerminalTransition::AlreadyTerminal(order.clone())
                    }
                }
            })
        })
    }

    fn mark_failed<'a>(
        &'a self,
        id: OrderId,
        reason: &str,
    ) -> StoreFuture<'a, Result<TerminalTransition, StorageError>> {
        let reason = reason.to_string();
        Box::pin(async move {
            let now = self.clock.now();
            let mut orders = self.orders.lock().await;
            Ok(match orders.get_mut(&id) {
                None => TerminalTransition::NotFound,
                Some(order) => {
                    if order.fail(&reason, now) {
                        TerminalTransition::Applied(order.clone())
                    } else {
                        TerminalTransition::AlreadyTerminal(order.clone())
                    }
                }
            })
        })
    }
}

// ============================================================================
// Users
// ============================================================================

/// In-memory [`UserStore`].
pub struct MemoryUserStore {
    users: Mutex<HashMap<UserId, User>>,
    row_locks: RowLocks<UserId>,
}

impl MemoryUserStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            row_locks: RowLocks::new(),
        }
    }
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UserStore for MemoryUserStore {
    fn insert(&self, user: User) -> StoreFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            self.users.lock().await.insert(user.id, user);
            Ok(())
        })
    }

    fn get(&self, id: UserId) -> StoreFuture<'_, Result<Option<User>, StorageError>> {
        Box::pin(async move { Ok(self.users.lock().await.get(&id).cloned()) })
    }

    fn reserve_balance(
        &self,
        user_id: UserId,
        required: Money,
        occupied_slots: u32,
    ) -> StoreFuture<'_, Result<BalanceSnapshot, BalanceError>> {
        Box::pin(async move {
            let row = self.row_locks.lock_for(user_id).await;
            let _guard = row.lock().await;

            let mut users = self.users.lock().await;
            let user = users.get_mut(&user_id).ok_or(BalanceError::UserNotFound)?;

            if !user.is_active {
                return Err(BalanceError::UserInactive);
            }
            if occupied_slots >= user.max_inventory_slots {
                return Err(BalanceError::InsufficientSlots);
            }

            let original_balance = user.balance;
            user.balance = user
                .balance
                .checked_sub(required)
                .ok_or(BalanceError::InsufficientBalance)?;

            Ok(BalanceSnapshot {
                original_balance,
                remaining_balance: user.balance,
            })
        })
    }

    fn restore_balance(
        &self,
        user_id: UserId,
        original: Money,
    ) -> StoreFuture<'_, Result<(), BalanceError>> {
        Box::pin(async move {
            let row = self.row_locks.lock_for(user_id).await;
            let _guard = row.lock().await;

            let mut users = self.users.lock().await;
            let user = users.get_mut(&user_id).ok_or(BalanceError::UserNotFound)?;
            user.balance = original;
            Ok(())
        })
    }
}

// ============================================================================
// Items and stock reservations
// ============================================================================

/// In-memory [`ItemStore`].
pub struct MemoryItemStore {
    clock: Arc<dyn Clock>,
    items: Mutex<HashMap<ItemId, Item>>,
    reservations: Mutex<HashMap<ReservationId, ItemReservation>>,
    row_locks: RowLocks<ItemId>,
}

impl MemoryItemStore {
    /// Create an empty store
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            items: Mutex::new(HashMap::new()),
            reservations: Mutex::new(HashMap::new()),
            row_locks: RowLocks::new(),
        }
    }

    /// Every reservation row, for assertions on closure invariants.
    pub async fn all_reservations(&self) -> Vec<ItemReservation> {
        self.reservations.lock().await.values().cloned().collect()
    }

    /// Terminate one reservation: flip out of `Reserved` and restore the
    /// stock, under the item row lock. Skips rows already terminal.
    async fn terminate(
        &self,
        reservation_id: ReservationId,
        to: ReservationStatus,
        reason: Option<&str>,
    ) -> Option<ItemReservation> {
        // Look up the item first so the row lock is taken outside any map
        // guard.
        let item_id = {
            let reservations = self.reservations.lock().await;
            reservations.get(&reservation_id)?.item_id
        };

        let row = self.row_locks.lock_for(item_id).await;
        let _guard = row.lock().await;

        let (reservation, quantity) = {
            let mut reservations = self.reservations.lock().await;
            let reservation = reservations.get_mut(&reservation_id)?;
            if reservation.status != ReservationStatus::Reserved {
                return None;
            }
            reservation.status = to;
            reservation.cancel_reason = reason.map(ToString::to_string);
            (reservation.clone(), reservation.reserved_quantity)
        };

        let mut items = self.items.lock().await;
        if let Some(item) = items.get_mut(&item_id) {
            item.stock = item.stock.saturating_add(quantity);
        }

        Some(reservation)
    }
}

impl ItemStore for MemoryItemStore {
    fn insert(&self, item: Item) -> StoreFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            self.items.lock().await.insert(item.id, item);
            Ok(())
        })
    }

    fn get(&self, id: ItemId) -> StoreFuture<'_, Result<Option<Item>, StorageError>> {
        Box::pin(async move { Ok(self.items.lock().await.get(&id).cloned()) })
    }

    fn reserve_stock(
        &self,
        order_id: OrderId,
        user_id: UserId,
        item_id: ItemId,
        quantity: u32,
        ttl: Duration,
    ) -> StoreFuture<'_, Result<StockReservation, StockError>> {
        Box::pin(async move {
            let row = self.row_locks.lock_for(item_id).await;
            let _guard = row.lock().await;

            let (original_stock, remaining_stock) = {
                let mut items = self.items.lock().await;
                let item = items.get_mut(&item_id).ok_or(StockError::ItemNotFound)?;
                if !item.is_active {
                    return Err(StockError::ItemInactive);
                }
                if item.stock < quantity {
                    return Err(StockError::InsufficientStock);
                }
                let original = item.stock;
                item.stock -= quantity;
                (original, item.stock)
            };

            let now = self.clock.now();
            let expires_at = now
                + chrono::Duration::from_std(ttl)
                    .map_err(|e| StockError::Storage(StorageError(e.to_string())))?;
            let reservation = ItemReservation::new(
                order_id,
                item_id,
                user_id,
                quantity,
                original_stock,
                now,
                expires_at,
            );
            self.reservations
                .lock()
                .await
                .insert(reservation.id, reservation.clone());

            Ok(StockReservation {
                reservation,
                remaining_stock,
            })
        })
    }

    fn active_by_order(
        &self,
        order_id: OrderId,
    ) -> StoreFuture<'_, Result<Vec<ItemReservation>, StorageError>> {
        Box::pin(async move {
            Ok(self
                .reservations
                .lock()
                .await
                .values()
                .filter(|r| r.order_id == order_id && r.status == ReservationStatus::Reserved)
                .cloned()
                .collect())
        })
    }

    fn confirm_reservations(
        &self,
        order_id: OrderId,
    ) -> StoreFuture<'_, Result<usize, StorageError>> {
        Box::pin(async move {
            let mut reservations = self.reservations.lock().await;
            let mut confirmed = 0;
            for reservation in reservations.values_mut() {
                if reservation.order_id == order_id
                    && reservation.status == ReservationStatus::Reserved
                {
                    reservation.status = ReservationStatus::Confirmed;
                    confirmed += 1;
                }
            }
            Ok(confirmed)
        })
    }

    fn cancel_reservations<'a>(
        &'a self,
        order_id: OrderId,
        reason: &str,
    ) -> StoreFuture<'a, Result<Vec<RestoredStock>, StorageError>> {
        let reason = reason.to_string();
        Box::pin(async move {
            let candidates: Vec<ReservationId> = self
                .reservations
                .lock()
                .await
                .values()
                .filter(|r| r.order_id == order_id && r.status == ReservationStatus::Reserved)
                .map(|r| r.id)
                .collect();

            let mut restored = Vec::new();
            for id in candidates {
                if let Some(reservation) = self
                    .terminate(id, ReservationStatus::Cancelled, Some(&reason))
                    .await
                {
                    restored.push(RestoredStock {
                        item_id: reservation.item_id,
                        quantity: reservation.reserved_quantity,
                    });
                }
            }
            Ok(restored)
        })
    }

    fn sweep_expired(
        &self,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Result<Vec<ItemReservation>, StorageError>> {
        Box::pin(async move {
            let candidates: Vec<ReservationId> = self
                .reservations
                .lock()
                .await
                .values()
                .filter(|r| r.is_expired(now))
                .map(|r| r.id)
                .collect();

            let mut swept = Vec::new();
            for id in candidates {
                if let Some(reservation) = self
                    .terminate(id, ReservationStatus::Expired, Some("reservation-expired"))
                    .await
                {
                    swept.push(reservation);
                }
            }
            Ok(swept)
        })
    }
}

// ============================================================================
// Inventory
// ============================================================================

/// In-memory [`InventoryStore`].
pub struct MemoryInventoryStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<(UserId, ItemId), InventoryEntry>>,
}

impl MemoryInventoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl InventoryStore for MemoryInventoryStore {
    fn count_entries(&self, user_id: UserId) -> StoreFuture<'_, Result<u32, StorageError>> {
        Box::pin(async move {
            let count = self
                .entries
                .lock()
                .await
                .keys()
                .filter(|(owner, _)| *owner == user_id)
                .count();
            u32::try_from(count).map_err(|e| StorageError(e.to_string()))
        })
    }

    fn add(
        &self,
        user_id: UserId,
        item_id: ItemId,
        quantity: u32,
    ) -> StoreFuture<'_, Result<InventoryUpsert, StorageError>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut entries = self.entries.lock().await;
            match entries.get_mut(&(user_id, item_id)) {
                Some(entry) => {
                    entry.quantity = entry.quantity.saturating_add(quantity);
                    entry.updated_at = now;
                    Ok(InventoryUpsert {
                        entry: entry.clone(),
                        newly_created: false,
                    })
                }
                None => {
                    let entry = InventoryEntry {
                        user_id,
                        item_id,
                        quantity,
                        updated_at: now,
                    };
                    entries.insert((user_id, item_id), entry.clone());
                    Ok(InventoryUpsert {
                        entry,
                        newly_created: true,
                    })
                }
            }
        })
    }

    fn entries(
        &self,
        user_id: UserId,
    ) -> StoreFuture<'_, Result<Vec<InventoryEntry>, StorageError>> {
        Box::pin(async move {
            Ok(self
                .entries
                .lock()
                .await
                .values()
                .filter(|entry| entry.user_id == user_id)
                .cloned()
                .collect())
        })
    }
}
