//! # Purchase Saga Core
//!
//! Core contracts for the purchase saga: the wire event taxonomy, the
//! [`EventBus`](bus::EventBus) and [`KvStore`](kv::KvStore) substrate
//! traits, the [`Clock`](clock::Clock) abstraction, and the shared value
//! types used by every participant.
//!
//! ## Architecture
//!
//! ```text
//! Order ──▶ (Coupon?) ──▶ User ──▶ Inventory ──▶ Item ──▶ Payment ──▶ Order(complete)
//!                           │         │           │         │
//!                           └─────────┴───────────┴─────────┴── failure ──▶ compensate
//! ```
//!
//! Each participant owns its rows and reacts only to events; the only
//! cross-boundary signal is an event on a named channel. The contracts in
//! this crate are everything two participants share.

pub mod bus;
pub mod clock;
pub mod envelope;
pub mod events;
pub mod kv;
pub mod types;

pub use bus::{EventBus, EventBusError, EventStream};
pub use clock::{Clock, SystemClock};
pub use envelope::{CodecError, Envelope, Event};
pub use events::{channels, FailedStep};
pub use kv::{keys, KvError, KvStore};
pub use types::{ItemId, Money, OrderId, ReservationId, UserCouponId, UserId};
