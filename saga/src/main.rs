//! Demo binary: runs the full saga system in-process and drives a few
//! purchases through it.

use purchase_saga::app::{SagaApp, Stores};
use purchase_saga::audit::MemoryAuditSink;
use purchase_saga::config::Config;
use purchase_saga::gateway::SimulatedGateway;
use purchase_saga::notifier::LogNotificationSender;
use purchase_saga::participants::coupon::{
    CouponStore, CouponUsageStatus, MemoryCouponStore, UserCoupon,
};
use purchase_saga::storage::memory::{
    MemoryInventoryStore, MemoryItemStore, MemoryOrderStore, MemoryUserStore,
};
use purchase_saga::storage::{ItemStore, UserStore};
use purchase_saga::types::{Item, User};
use purchase_saga_core::clock::{Clock, SystemClock};
use purchase_saga_core::events::{channels, DiscountType};
use purchase_saga_core::types::{ItemId, Money, UserCouponId, UserId};
use purchase_saga_runtime::InMemoryDeadLetterQueue;
use purchase_saga_testing::{EventRecorder, InMemoryEventBus, InMemoryKvStore};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let bus = Arc::new(InMemoryEventBus::new());
    let kv = Arc::new(InMemoryKvStore::new(Arc::clone(&clock)));
    let dlq = Arc::new(InMemoryDeadLetterQueue::new());
    let audit_sink = Arc::new(MemoryAuditSink::new());

    let users = Arc::new(MemoryUserStore::new());
    let items = Arc::new(MemoryItemStore::new(Arc::clone(&clock)));
    let orders = Arc::new(MemoryOrderStore::new(Arc::clone(&clock)));
    let inventory = Arc::new(MemoryInventoryStore::new(Arc::clone(&clock)));
    let coupons = Arc::new(MemoryCouponStore::new());

    // Seed demo data.
    let alice = User {
        id: UserId::new(),
        username: "alice".to_string(),
        balance: Money::from_cents(50_000),
        is_active: true,
        max_inventory_slots: 5,
    };
    let bob = User {
        id: UserId::new(),
        username: "bob".to_string(),
        balance: Money::from_cents(5_000),
        is_active: true,
        max_inventory_slots: 5,
    };
    let keyboard = Item {
        id: ItemId::new(),
        name: "Mechanical Keyboard".to_string(),
        price: Money::from_cents(10_000),
        stock: 50,
        is_active: true,
    };
    let coupon = UserCoupon {
        id: UserCouponId::new(),
        user_id: alice.id,
        name: "welcome-15".to_string(),
        discount_type: DiscountType::Fixed,
        discount_value: 1_500,
        max_discount: None,
        min_order_amount: None,
        applicable_items: None,
        remaining_uses: 1,
        expires_at: None,
        status: CouponUsageStatus::Available,
    };
    let alice_id = alice.id;
    let bob_id = bob.id;
    let keyboard_id = keyboard.id;
    let coupon_id = coupon.id;
    users.insert(alice).await?;
    users.insert(bob).await?;
    items.insert(keyboard).await?;
    coupons.insert(coupon).await?;

    // Watch terminal events before anything can publish them.
    let recorder = EventRecorder::attach(
        bus.as_ref(),
        &[channels::ORDER_COMPLETED, channels::ORDER_FAILED],
    )
    .await?;

    let app = SagaApp::start(
        &config,
        bus,
        kv,
        Arc::clone(&clock),
        Stores {
            orders,
            users: Arc::clone(&users) as Arc<dyn UserStore>,
            items: Arc::clone(&items) as Arc<dyn ItemStore>,
            inventory,
            coupons,
        },
        Arc::new(SimulatedGateway::new(config.payment.clone())),
        audit_sink.clone(),
        Arc::new(LogNotificationSender),
        dlq,
    )
    .await?;

    println!("=== Purchase Saga Demo ===\n");

    // Happy path.
    let order = app
        .orders()
        .create_order(alice_id, keyboard_id, 1, None)
        .await?;
    println!("alice buys 1 keyboard (order {})", order.id);
    wait_for_outcome(&recorder, &order.id.to_string()).await;

    // Discounted purchase.
    let order = app
        .orders()
        .create_order(alice_id, keyboard_id, 1, Some(coupon_id))
        .await?;
    println!("alice buys 1 keyboard with coupon (order {})", order.id);
    wait_for_outcome(&recorder, &order.id.to_string()).await;

    // Insufficient balance.
    let order = app
        .orders()
        .create_order(bob_id, keyboard_id, 1, None)
        .await?;
    println!("bob tries to buy 1 keyboard (order {})", order.id);
    wait_for_outcome(&recorder, &order.id.to_string()).await;

    let alice_balance = users.get(alice_id).await?.map(|user| user.balance);
    let stock = items.get(keyboard_id).await?.map(|item| item.stock);
    println!("\nfinal state:");
    println!("  alice balance: {}", alice_balance.unwrap_or(Money::ZERO));
    println!("  keyboard stock: {}", stock.unwrap_or(0));
    println!("  audit entries: {}", audit_sink.entries().await.len());

    app.shutdown().await;
    Ok(())
}

/// Wait for the terminal event of one order and print it.
async fn wait_for_outcome(recorder: &EventRecorder, order_id: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        for envelope in recorder.recorded().await {
            let matches = envelope
                .data
                .get("orderId")
                .and_then(serde_json::Value::as_str)
                .is_some_and(|id| id == order_id);
            if matches {
                println!("  -> {}", envelope.event_type);
                return;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            println!("  -> no outcome within 5s");
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
