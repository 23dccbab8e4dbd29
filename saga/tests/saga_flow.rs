//! End-to-end saga scenarios over the in-memory substrate.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod common;

use common::{assert_subsequence, Harness};
use purchase_saga::gateway::{ApprovingGateway, DecliningGateway};
use purchase_saga::participants::coupon::{CouponStore, CouponUsageStatus, UserCoupon};
use purchase_saga::types::ReservationStatus;
use purchase_saga_core::events::{channels, DiscountType, OrderFailed};
use purchase_saga_core::types::{Money, UserCouponId};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn happy_path_completes_and_moves_every_resource() {
    let harness = Harness::start(Arc::new(ApprovingGateway)).await;
    let user_id = harness.seed_user(Money::from_cents(50_000), 5).await;
    let item_id = harness.seed_item(Money::from_cents(10_000), 50).await;

    let order = harness
        .app
        .orders()
        .create_order(user_id, item_id, 1, None)
        .await
        .unwrap();

    let outcome = harness.wait_terminal(order.id).await;
    assert_eq!(outcome, channels::ORDER_COMPLETED);

    assert_eq!(harness.balance(user_id).await, Money::from_cents(40_000));
    assert_eq!(harness.stock(item_id).await, 49);
    assert_eq!(harness.inventory_quantity(user_id, item_id).await, Some(1));

    // The causal chain arrives in order; the two post-payment events are
    // produced by independent consumers of payment.processed.
    let events = harness.events_for(order.id).await;
    assert_subsequence(
        &events,
        &[
            channels::ORDER_CREATED,
            channels::USER_VALIDATED,
            channels::PAYMENT_RESERVED,
            channels::INVENTORY_RESERVED,
            channels::ITEM_RESERVED,
            channels::PAYMENT_PROCESSED,
        ],
    );
    // both consumers of payment.processed finish, then the notifier
    for channel in [
        channels::INVENTORY_CONFIRMED,
        channels::ORDER_COMPLETED,
        channels::NOTIFICATION_SENT,
    ] {
        assert!(
            harness
                .recorder
                .wait_for(channel, Duration::from_secs(5))
                .await
                .is_some(),
            "missing event {channel}"
        );
    }

    // every stock reservation settled as confirmed
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let reservations = harness.items.all_reservations().await;
        if !reservations.is_empty()
            && reservations.iter().all(|r| r.status == ReservationStatus::Confirmed)
        {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "reservations never confirmed: {reservations:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn insufficient_balance_fails_without_touching_anything() {
    let harness = Harness::start(Arc::new(ApprovingGateway)).await;
    let user_id = harness.seed_user(Money::from_cents(5_000), 5).await;
    let item_id = harness.seed_item(Money::from_cents(10_000), 50).await;

    let order = harness
        .app
        .orders()
        .create_order(user_id, item_id, 1, None)
        .await
        .unwrap();

    let outcome = harness.wait_terminal(order.id).await;
    assert_eq!(outcome, channels::ORDER_FAILED);

    let failed: OrderFailed = harness
        .recorder
        .wait_for(channels::ORDER_FAILED, Duration::from_secs(1))
        .await
        .unwrap()
        .decode()
        .unwrap();
    assert!(failed.reason.contains("balance"));

    assert_eq!(harness.balance(user_id).await, Money::from_cents(5_000));
    assert_eq!(harness.stock(item_id).await, 50);
    assert_eq!(harness.inventory_quantity(user_id, item_id).await, None);
}

#[tokio::test]
async fn out_of_stock_compensates_balance_and_slot() {
    let harness = Harness::start(Arc::new(ApprovingGateway)).await;
    let user_id = harness.seed_user(Money::from_cents(50_000), 5).await;
    let item_id = harness.seed_item(Money::from_cents(10_000), 0).await;

    let order = harness
        .app
        .orders()
        .create_order(user_id, item_id, 1, None)
        .await
        .unwrap();

    let outcome = harness.wait_terminal(order.id).await;
    assert_eq!(outcome, channels::ORDER_FAILED);

    // compensation events may interleave; wait for both
    assert!(
        harness
            .recorder
            .wait_for(channels::PAYMENT_ROLLBACK, Duration::from_secs(5))
            .await
            .is_some()
    );
    assert!(
        harness
            .recorder
            .wait_for(channels::INVENTORY_ROLLBACK, Duration::from_secs(5))
            .await
            .is_some()
    );

    let events = harness.events_for(order.id).await;
    assert_subsequence(
        &events,
        &[
            channels::USER_VALIDATED,
            channels::PAYMENT_RESERVED,
            channels::INVENTORY_RESERVED,
            channels::ITEM_RESERVATION_FAILED,
        ],
    );

    assert_eq!(harness.balance(user_id).await, Money::from_cents(50_000));
    assert_eq!(harness.stock(item_id).await, 0);
    assert_eq!(harness.inventory_quantity(user_id, item_id).await, None);
}

#[tokio::test]
async fn payment_failure_unwinds_every_step() {
    let harness = Harness::start(Arc::new(DecliningGateway)).await;
    let user_id = harness.seed_user(Money::from_cents(50_000), 5).await;
    let item_id = harness.seed_item(Money::from_cents(10_000), 50).await;

    let order = harness
        .app
        .orders()
        .create_order(user_id, item_id, 1, None)
        .await
        .unwrap();

    let outcome = harness.wait_terminal(order.id).await;
    assert_eq!(outcome, channels::ORDER_FAILED);

    for channel in [
        channels::ITEM_RESTORED,
        channels::INVENTORY_ROLLBACK,
        channels::PAYMENT_ROLLBACK,
    ] {
        assert!(
            harness
                .recorder
                .wait_for(channel, Duration::from_secs(5))
                .await
                .is_some(),
            "missing compensation event {channel}"
        );
    }

    let events = harness.events_for(order.id).await;
    assert_subsequence(&events, &[channels::ITEM_RESERVED, channels::PAYMENT_FAILED]);

    assert_eq!(harness.balance(user_id).await, Money::from_cents(50_000));
    assert_eq!(harness.stock(item_id).await, 50);
    assert_eq!(harness.inventory_quantity(user_id, item_id).await, None);
    assert!(
        harness
            .items
            .all_reservations()
            .await
            .iter()
            .all(|r| r.status == ReservationStatus::Cancelled)
    );
}

#[tokio::test]
async fn concurrent_purchases_of_last_unit_sell_exactly_one() {
    let harness = Harness::start(Arc::new(ApprovingGateway)).await;
    let first_user = harness.seed_user(Money::from_cents(50_000), 5).await;
    let second_user = harness.seed_user(Money::from_cents(50_000), 5).await;
    let item_id = harness.seed_item(Money::from_cents(10_000), 1).await;

    let first = harness
        .app
        .orders()
        .create_order(first_user, item_id, 1, None)
        .await
        .unwrap();
    let second = harness
        .app
        .orders()
        .create_order(second_user, item_id, 1, None)
        .await
        .unwrap();

    let first_outcome = harness.wait_terminal(first.id).await;
    let second_outcome = harness.wait_terminal(second.id).await;

    let outcomes = [first_outcome.as_str(), second_outcome.as_str()];
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == channels::ORDER_COMPLETED)
            .count(),
        1,
        "expected exactly one winner, got {outcomes:?}"
    );
    assert_eq!(harness.stock(item_id).await, 0);

    let (loser_user, loser_order) = if first_outcome == channels::ORDER_COMPLETED {
        (second_user, second.id)
    } else {
        (first_user, first.id)
    };
    let loser_events = harness.events_for(loser_order).await;
    assert!(
        loser_events
            .iter()
            .any(|e| e == channels::ITEM_RESERVATION_FAILED)
    );
    assert!(
        harness
            .recorder
            .wait_for(channels::PAYMENT_ROLLBACK, Duration::from_secs(5))
            .await
            .is_some()
    );
    assert_eq!(harness.balance(loser_user).await, Money::from_cents(50_000));
}

#[tokio::test]
async fn coupon_discount_flows_to_the_charge() {
    let harness = Harness::start(Arc::new(ApprovingGateway)).await;
    let user_id = harness.seed_user(Money::from_cents(50_000), 5).await;
    let item_id = harness.seed_item(Money::from_cents(10_000), 50).await;

    let coupon = UserCoupon {
        id: UserCouponId::new(),
        user_id,
        name: "welcome".to_string(),
        discount_type: DiscountType::Fixed,
        discount_value: 2_500,
        max_discount: None,
        min_order_amount: None,
        applicable_items: None,
        remaining_uses: 1,
        expires_at: None,
        status: CouponUsageStatus::Available,
    };
    let coupon_id = coupon.id;
    harness.seed_coupon(coupon).await;

    let order = harness
        .app
        .orders()
        .create_order(user_id, item_id, 1, Some(coupon_id))
        .await
        .unwrap();

    let outcome = harness.wait_terminal(order.id).await;
    assert_eq!(outcome, channels::ORDER_COMPLETED);

    // only the discounted amount left the balance
    assert_eq!(harness.balance(user_id).await, Money::from_cents(42_500));
    assert_eq!(harness.stock(item_id).await, 49);

    let events = harness.events_for(order.id).await;
    assert_subsequence(
        &events,
        &[
            channels::COUPON_VALIDATION_REQUESTED,
            channels::COUPON_VALIDATED,
            channels::ORDER_CREATED,
        ],
    );

    // the usage settles as consumed once the validator sees completion
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let stored = harness.coupons.get(coupon_id).await.unwrap().unwrap();
        if stored.status == CouponUsageStatus::Used {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "coupon usage never confirmed (status {:?})",
            stored.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn rejected_coupon_fails_the_order_before_the_chain() {
    let harness = Harness::start(Arc::new(ApprovingGateway)).await;
    let user_id = harness.seed_user(Money::from_cents(50_000), 5).await;
    let item_id = harness.seed_item(Money::from_cents(10_000), 50).await;

    let order = harness
        .app
        .orders()
        .create_order(user_id, item_id, 1, Some(UserCouponId::new()))
        .await
        .unwrap();

    let outcome = harness.wait_terminal(order.id).await;
    assert_eq!(outcome, channels::ORDER_FAILED);

    // the chain never started, nothing to compensate
    let events = harness.events_for(order.id).await;
    assert!(!events.iter().any(|e| e == channels::ORDER_CREATED));
    assert_eq!(harness.balance(user_id).await, Money::from_cents(50_000));
    assert_eq!(harness.stock(item_id).await, 50);
}

#[tokio::test]
async fn audit_trail_covers_the_whole_flow() {
    let harness = Harness::start(Arc::new(ApprovingGateway)).await;
    let user_id = harness.seed_user(Money::from_cents(50_000), 5).await;
    let item_id = harness.seed_item(Money::from_cents(10_000), 50).await;

    let order = harness
        .app
        .orders()
        .create_order(user_id, item_id, 1, None)
        .await
        .unwrap();
    let outcome = harness.wait_terminal(order.id).await;
    assert_eq!(outcome, channels::ORDER_COMPLETED);

    // give the recorder's sibling (the audit participant) a beat, then
    // flush through shutdown
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.app.shutdown().await;

    let entries = harness.audit.entries().await;
    assert!(
        entries.iter().any(|e| e.event_type == channels::ORDER_CREATED),
        "audit missing order.created"
    );
    assert!(
        entries.iter().any(|e| e.event_type == channels::ORDER_COMPLETED),
        "audit missing order.completed"
    );
    assert!(entries.iter().all(|e| e.order_id == Some(order.id)));
}
