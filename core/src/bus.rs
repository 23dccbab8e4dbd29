//! Event bus abstraction for cross-participant communication.
//!
//! Participants never call one another; every interaction travels through a
//! named channel on the bus. Delivery is at-least-once and per-publisher
//! order is preserved within a channel, so handlers must be idempotent on
//! `(orderId, step)`.
//!
//! # Dyn Compatibility
//!
//! Methods return explicit `Pin<Box<dyn Future>>` instead of `async fn` so
//! participants can hold the bus as `Arc<dyn EventBus>`.

use crate::envelope::Envelope;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the bus substrate
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish to a channel
    #[error("publish failed for channel '{channel}': {reason}")]
    PublishFailed {
        /// The channel that failed
        channel: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to channels
    #[error("subscription failed for channels {channels:?}: {reason}")]
    SubscriptionFailed {
        /// The channels that failed to subscribe
        channels: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Network or transport error
    #[error("transport error: {0}")]
    TransportError(String),
}

/// Stream of envelopes from a subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Envelope, EventBusError>> + Send + Sync>>;

/// Boxed future returned by bus operations.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventBusError>> + Send + 'a>>;

/// Publish/subscribe over named channels.
///
/// # Guarantees
///
/// - **At-least-once**: an envelope may be delivered more than once.
/// - **Per-publisher order**: envelopes from one publisher arrive on a
///   channel in publish order. No ordering across publishers or channels.
/// - `publish` returns once the envelope is handed to the substrate, not
///   when subscribers have processed it.
pub trait EventBus: Send + Sync {
    /// Publish an envelope to a channel.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the substrate rejects
    /// the message.
    fn publish<'a>(&'a self, channel: &str, envelope: &Envelope) -> BusFuture<'a, ()>;

    /// Subscribe to one or more channels, receiving a merged stream.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the subscription
    /// cannot be established.
    fn subscribe<'a>(&'a self, channels: &[&str]) -> BusFuture<'a, EventStream>;
}
