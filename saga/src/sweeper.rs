//! Expiry sweeper for durable stock reservations.
//!
//! Once per interval, flips `RESERVED` rows past their expiry to
//! `EXPIRED`, restoring stock identically to a cancellation. This bounds
//! the loss from crashed sagas: a reservation whose order never settles
//! is reclaimed within TTL + sweep interval.

use crate::storage::ItemStore;
use purchase_saga_core::clock::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Periodic reconciler of expired stock reservations.
pub struct ReservationSweeper {
    items: Arc<dyn ItemStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl ReservationSweeper {
    /// Create a sweeper. Send `true` on the shutdown channel to stop it.
    #[must_use]
    pub fn new(
        items: Arc<dyn ItemStore>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            items,
            clock,
            interval,
            shutdown,
        }
    }

    /// One reconciliation pass. Returns how many reservations were swept.
    pub async fn sweep_once(&self) -> usize {
        let now = self.clock.now();
        match self.items.sweep_expired(now).await {
            Ok(swept) => {
                if !swept.is_empty() {
                    metrics::counter!("saga.reservations.swept").increment(swept.len() as u64);
                    for reservation in &swept {
                        tracing::warn!(
                            order_id = %reservation.order_id,
                            item_id = %reservation.item_id,
                            quantity = reservation.reserved_quantity,
                            expired_at = %reservation.expires_at,
                            "expired stock reservation reclaimed"
                        );
                    }
                }
                swept.len()
            }
            Err(error) => {
                tracing::error!(error = %error, "reservation sweep failed");
                0
            }
        }
    }

    /// Run until shutdown, sweeping every interval.
    pub async fn run(mut self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "starting reservation sweeper");
        let mut ticker = tokio::time::interval(self.interval);
        // the first tick fires immediately; skip it so sweeps are spaced
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        tracing::info!("reservation sweeper stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Spawn the sweeper as a background task.
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryItemStore;
    use crate::types::{Item, ReservationStatus};
    use purchase_saga_core::types::{ItemId, Money, OrderId, UserId};
    use purchase_saga_testing::{test_clock, ManualClock};

    #[tokio::test]
    async fn sweep_once_reclaims_expired_rows() {
        let clock = Arc::new(ManualClock::new(test_clock().now()));
        let items = Arc::new(MemoryItemStore::new(clock.clone() as Arc<dyn Clock>));
        let item = Item {
            id: ItemId::new(),
            name: "gadget".to_string(),
            price: Money::from_dollars(10),
            stock: 5,
            is_active: true,
        };
        let gadget_id = item.id;
        items.insert(item).await.unwrap();
        items
            .reserve_stock(
                OrderId::new(),
                UserId::new(),
                gadget_id,
                2,
                Duration::from_secs(300),
            )
            .await
            .unwrap();

        let (_tx, shutdown) = watch::channel(false);
        let sweeper = ReservationSweeper::new(
            items.clone(),
            clock.clone() as Arc<dyn Clock>,
            Duration::from_secs(60),
            shutdown,
        );

        // nothing expired yet
        assert_eq!(sweeper.sweep_once().await, 0);

        clock.advance(chrono::Duration::seconds(301));
        assert_eq!(sweeper.sweep_once().await, 1);
        assert_eq!(items.get(gadget_id).await.unwrap().unwrap().stock, 5);
        assert!(
            items
                .all_reservations()
                .await
                .iter()
                .all(|r| r.status == ReservationStatus::Expired)
        );

        // second pass finds nothing
        assert_eq!(sweeper.sweep_once().await, 0);
    }
}
