//! # Purchase Saga
//!
//! A distributed purchase transaction executed as a choreographed saga:
//! six autonomous participants cooperating over a publish/subscribe bus,
//! with compensating rollback on any step failure.
//!
//! ```text
//! Order ──▶ (Coupon?) ──▶ User ──▶ Inventory ──▶ Item ──▶ Payment ──▶ Order(complete)
//!                           │          │           │         │
//!                           └──────────┴───────────┴─────────┴── failure ──▶ Order(fail) ──▶ compensate
//! ```
//!
//! There is no central orchestrator. Each participant owns its rows,
//! commits locally, publishes after commit, and compensates when a
//! downstream failure event arrives. Safety under concurrency comes from
//! per-resource exclusion (row locks, an advisory KV lock), transactional
//! reads, and TTL-bounded reservations reconciled by a sweeper.
//!
//! The crate provides *saga consistency*, not global transactions: each
//! step commits locally and every failure triggers compensations that
//! semantically reverse prior commits. Delivery is at-least-once; every
//! handler is idempotent within a saga instance.

pub mod app;
pub mod audit;
pub mod config;
pub mod gateway;
pub mod notifier;
pub mod participants;
pub mod storage;
pub mod sweeper;
pub mod types;

pub use app::{SagaApp, Stores};
pub use config::{Config, ConfigError};
pub use gateway::{PaymentGateway, SimulatedGateway};
pub use participants::{CreateOrderError, OrderParticipant};
pub use types::{Order, OrderStatus};
