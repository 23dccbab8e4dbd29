//! The six saga participants.
//!
//! Each participant is a value with injected collaborators (stores, bus,
//! KV, clock, config) and a static event-type → handler dispatch inside
//! [`Participant::handle`](purchase_saga_runtime::Participant::handle).
//! Participants commit locally first and publish after commit, so a
//! downstream handler never observes state the event outran.

pub mod coupon;
pub mod inventory;
pub mod item;
pub mod order;
pub mod payment;
pub mod user;

pub use coupon::{CouponStore, CouponUsageStatus, CouponValidator, MemoryCouponStore, UserCoupon};
pub use inventory::InventoryParticipant;
pub use item::ItemParticipant;
pub use order::{CreateOrderError, OrderParticipant};
pub use payment::PaymentParticipant;
pub use user::UserParticipant;

use purchase_saga_core::bus::EventBus;
use purchase_saga_core::clock::Clock;
use purchase_saga_core::envelope::{Envelope, Event};
use purchase_saga_runtime::HandlerError;
use serde::de::DeserializeOwned;

/// Encode and publish one event; the envelope timestamp comes from the
/// participant's clock.
pub(crate) async fn publish_event<E: Event>(
    bus: &dyn EventBus,
    clock: &dyn Clock,
    event: &E,
) -> Result<(), HandlerError> {
    let envelope = Envelope::encode(event, clock.now())
        .map_err(|error| HandlerError::Fatal(error.to_string()))?;
    bus.publish(event.channel(), &envelope)
        .await
        .map_err(|error| HandlerError::Retryable(error.to_string()))
}

/// Decode a typed payload; shape mismatches are fatal (retrying cannot fix
/// a malformed envelope).
pub(crate) fn decode_payload<P: DeserializeOwned>(
    envelope: &Envelope,
) -> Result<P, HandlerError> {
    envelope
        .decode()
        .map_err(|error| HandlerError::Fatal(error.to_string()))
}
