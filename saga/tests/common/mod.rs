//! Shared harness for the end-to-end saga tests: the full application
//! wired over the in-memory substrate, with a recorder on every channel.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic, dead_code)]

use purchase_saga::app::{SagaApp, Stores};
use purchase_saga::audit::MemoryAuditSink;
use purchase_saga::config::Config;
use purchase_saga::gateway::PaymentGateway;
use purchase_saga::notifier::LogNotificationSender;
use purchase_saga::participants::coupon::{CouponStore, MemoryCouponStore, UserCoupon};
use purchase_saga::storage::memory::{
    MemoryInventoryStore, MemoryItemStore, MemoryOrderStore, MemoryUserStore,
};
use purchase_saga::storage::{InventoryStore, ItemStore, UserStore};
use purchase_saga::types::{Item, User};
use purchase_saga_core::clock::Clock;
use purchase_saga_core::envelope::Envelope;
use purchase_saga_core::events::channels;
use purchase_saga_core::types::{ItemId, Money, OrderId, UserId};
use purchase_saga_runtime::InMemoryDeadLetterQueue;
use purchase_saga_testing::{test_clock, EventRecorder, InMemoryEventBus, InMemoryKvStore, ManualClock};
use std::sync::Arc;
use std::time::Duration;

/// The wired system under test.
pub struct Harness {
    pub app: SagaApp,
    pub clock: Arc<ManualClock>,
    pub kv: Arc<InMemoryKvStore>,
    pub users: Arc<MemoryUserStore>,
    pub items: Arc<MemoryItemStore>,
    pub inventory: Arc<MemoryInventoryStore>,
    pub coupons: Arc<MemoryCouponStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub recorder: EventRecorder,
}

impl Harness {
    /// Start the full application with the given gateway.
    pub async fn start(gateway: Arc<dyn PaymentGateway>) -> Self {
        let config = Config::default();
        let clock = Arc::new(ManualClock::new(test_clock().now()));
        let clock_dyn = Arc::clone(&clock) as Arc<dyn Clock>;

        let bus = Arc::new(InMemoryEventBus::new());
        let kv = Arc::new(InMemoryKvStore::new(Arc::clone(&clock_dyn)));
        let users = Arc::new(MemoryUserStore::new());
        let items = Arc::new(MemoryItemStore::new(Arc::clone(&clock_dyn)));
        let orders = Arc::new(MemoryOrderStore::new(Arc::clone(&clock_dyn)));
        let inventory = Arc::new(MemoryInventoryStore::new(Arc::clone(&clock_dyn)));
        let coupons = Arc::new(MemoryCouponStore::new());
        let audit = Arc::new(MemoryAuditSink::new());

        let recorder = EventRecorder::attach(bus.as_ref(), channels::ALL)
            .await
            .expect("recorder subscription");

        let app = SagaApp::start(
            &config,
            bus,
            Arc::clone(&kv) as _,
            clock_dyn,
            Stores {
                orders,
                users: Arc::clone(&users) as _,
                items: Arc::clone(&items) as _,
                inventory: Arc::clone(&inventory) as _,
                coupons: Arc::clone(&coupons) as _,
            },
            gateway,
            Arc::clone(&audit) as _,
            Arc::new(LogNotificationSender),
            Arc::new(InMemoryDeadLetterQueue::new()),
        )
        .await
        .expect("application start");

        Self {
            app,
            clock,
            kv,
            users,
            items,
            inventory,
            coupons,
            audit,
            recorder,
        }
    }

    pub async fn seed_user(&self, balance: Money, max_slots: u32) -> UserId {
        let user = User {
            id: UserId::new(),
            username: format!("user-{}", UserId::new()),
            balance,
            is_active: true,
            max_inventory_slots: max_slots,
        };
        let id = user.id;
        self.users.insert(user).await.expect("seed user");
        id
    }

    pub async fn seed_item(&self, price: Money, stock: u32) -> ItemId {
        let item = Item {
            id: ItemId::new(),
            name: "widget".to_string(),
            price,
            stock,
            is_active: true,
        };
        let id = item.id;
        self.items.insert(item).await.expect("seed item");
        id
    }

    pub async fn seed_coupon(&self, coupon: UserCoupon) {
        self.coupons.insert(coupon).await.expect("seed coupon");
    }

    pub async fn balance(&self, user_id: UserId) -> Money {
        self.users
            .get(user_id)
            .await
            .expect("user lookup")
            .expect("user exists")
            .balance
    }

    pub async fn stock(&self, item_id: ItemId) -> u32 {
        self.items
            .get(item_id)
            .await
            .expect("item lookup")
            .expect("item exists")
            .stock
    }

    pub async fn inventory_quantity(&self, user_id: UserId, item_id: ItemId) -> Option<u32> {
        self.inventory
            .entries(user_id)
            .await
            .expect("inventory lookup")
            .into_iter()
            .find(|entry| entry.item_id == item_id)
            .map(|entry| entry.quantity)
    }

    /// Wait until the order reaches a terminal event; returns its type.
    pub async fn wait_terminal(&self, order_id: OrderId) -> String {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            for envelope in self.recorder.recorded().await {
                if !envelope.is(channels::ORDER_COMPLETED) && !envelope.is(channels::ORDER_FAILED)
                {
                    continue;
                }
                if envelope_order_id(&envelope) == Some(order_id) {
                    return envelope.event_type;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "order {order_id} reached no terminal event within 5s"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Events recorded for one order, in arrival order.
    pub async fn events_for(&self, order_id: OrderId) -> Vec<String> {
        self.recorder
            .recorded()
            .await
            .into_iter()
            .filter(|envelope| envelope_order_id(envelope) == Some(order_id))
            .map(|envelope| envelope.event_type)
            .collect()
    }
}

pub fn envelope_order_id(envelope: &Envelope) -> Option<OrderId> {
    envelope
        .data
        .get("orderId")
        .and_then(serde_json::Value::as_str)
        .and_then(|raw| raw.parse().ok())
        .map(OrderId::from_uuid)
}

/// Assert that `expected` appears as a subsequence of `events`, in order.
pub fn assert_subsequence(events: &[String], expected: &[&str]) {
    let mut cursor = 0;
    for event in events {
        if cursor < expected.len() && event == expected[cursor] {
            cursor += 1;
        }
    }
    assert!(
        cursor == expected.len(),
        "expected subsequence {expected:?} in {events:?} (matched {cursor})"
    );
}
