//! Key/value substrate: TTL-bounded locks, reservations and counters.
//!
//! The saga keeps its ephemeral coordination state here: distributed locks
//! (atomic set-if-absent with expiry), reservation records with TTL, and
//! usage counters. Keys follow a fixed grammar, see [`keys`].
//!
//! Substrate errors surface to the caller; the caller decides whether to
//! emit a `*_FAILED` event or retry.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

use crate::types::{OrderId, UserId};

/// Errors surfaced by the KV substrate.
#[derive(Error, Debug, Clone)]
pub enum KvError {
    /// Connection to the substrate failed
    #[error("kv connection failed: {0}")]
    ConnectionFailed(String),

    /// An operation on a key failed
    #[error("kv operation failed for key '{key}': {reason}")]
    OperationFailed {
        /// The key involved
        key: String,
        /// The reason for failure
        reason: String,
    },

    /// The stored value could not be interpreted
    #[error("kv value for key '{key}' has unexpected shape")]
    InvalidValue {
        /// The key involved
        key: String,
    },
}

/// Boxed future returned by KV operations.
pub type KvFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, KvError>> + Send + 'a>>;

/// Key/value store with atomic set-if-absent, TTLs and counters.
pub trait KvStore: Send + Sync {
    /// Atomic set-if-absent with TTL. Returns whether the caller now holds
    /// the lock. The lock auto-expires after `ttl` so a crashed holder
    /// cannot deadlock the resource.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] if the substrate rejects the operation.
    fn acquire_lock<'a>(&'a self, key: &str, ttl: Duration) -> KvFuture<'a, bool>;

    /// Unconditional delete of a lock key.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] if the substrate rejects the operation.
    fn release_lock<'a>(&'a self, key: &str) -> KvFuture<'a, ()>;

    /// Store a reservation value under `key` with a TTL.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] if the substrate rejects the operation.
    fn set_reservation<'a>(
        &'a self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> KvFuture<'a, ()>;

    /// Fetch a reservation value. Expired entries read as `None`.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] if the substrate rejects the operation.
    fn get_reservation<'a>(&'a self, key: &str) -> KvFuture<'a, Option<serde_json::Value>>;

    /// Delete a reservation value.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] if the substrate rejects the operation.
    fn delete_reservation<'a>(&'a self, key: &str) -> KvFuture<'a, ()>;

    /// Atomically increment a counter, returning the new value. Missing
    /// counters start at zero.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] if the substrate rejects the operation.
    fn incr<'a>(&'a self, key: &str) -> KvFuture<'a, i64>;

    /// Atomically decrement a counter, returning the new value.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] if the substrate rejects the operation.
    fn decr<'a>(&'a self, key: &str) -> KvFuture<'a, i64>;
}

/// Key grammar for the saga's KV entries.
pub mod keys {
    use super::{OrderId, UserId};

    /// Balance hold for one `(user, order)` pair
    #[must_use]
    pub fn balance_reserve(user_id: &UserId, order_id: &OrderId) -> String {
        format!("balance_reserve:{user_id}:{order_id}")
    }

    /// Inventory slot hold for one `(user, order)` pair
    #[must_use]
    pub fn inventory_reserve(user_id: &UserId, order_id: &OrderId) -> String {
        format!("inventory_reserve:{user_id}:{order_id}")
    }

    /// Advisory occupied+pending slot counter per user
    #[must_use]
    pub fn inventory_slots(user_id: &UserId) -> String {
        format!("inventory_slots:{user_id}")
    }

    /// Short-lived critical-section lock over an arbitrary resource
    #[must_use]
    pub fn lock(resource: &str) -> String {
        format!("lock:{resource}")
    }

    /// At-most-once guard for the payment step of one order
    #[must_use]
    pub fn payment_attempt(order_id: &OrderId) -> String {
        format!("lock:payment:{order_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_grammar() {
        let user = UserId::new();
        let order = OrderId::new();

        assert_eq!(
            keys::balance_reserve(&user, &order),
            format!("balance_reserve:{user}:{order}")
        );
        assert_eq!(
            keys::inventory_reserve(&user, &order),
            format!("inventory_reserve:{user}:{order}")
        );
        assert_eq!(keys::inventory_slots(&user), format!("inventory_slots:{user}"));
        assert_eq!(keys::lock("inventory:abc"), "lock:inventory:abc");
        assert!(keys::payment_attempt(&order).starts_with("lock:payment:"));
    }
}
