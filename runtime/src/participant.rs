//! The participant abstraction.
//!
//! A participant is one autonomous service in the saga: it owns a subset of
//! the resources and reacts to events on the channels it subscribes to.
//! Dispatch inside a participant is a static match on the envelope's event
//! type string to a typed handler; handlers are registered at construction
//! through the participant's collaborators, never looked up reflectively.

use purchase_saga_core::envelope::Envelope;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// How a handler invocation failed.
///
/// Precondition failures are *not* errors: a participant translates them
/// into its `*_FAILED` event and returns `Ok`. `HandlerError` covers the
/// cases where the delivery itself could not be processed.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Transient infrastructure failure; the runner retries with backoff.
    #[error("retryable handler failure: {0}")]
    Retryable(String),

    /// Permanent failure (malformed payload, unknown event type); the
    /// delivery is dead-lettered without retry.
    #[error("fatal handler failure: {0}")]
    Fatal(String),
}

impl HandlerError {
    /// Whether the runner should retry this delivery.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Boxed future returned by [`Participant::handle`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>>;

/// One autonomous saga participant.
///
/// Implementations must be safe to invoke concurrently; coordination
/// between in-flight handler invocations uses the per-resource controls
/// (row locks, KV locks), never handler-level serialization.
pub trait Participant: Send + Sync {
    /// Participant name for logs and metrics
    fn name(&self) -> &'static str;

    /// Channels this participant subscribes to
    fn channels(&self) -> &'static [&'static str];

    /// Handle one delivered envelope.
    ///
    /// Must be idempotent: at-least-once delivery means the same envelope
    /// can arrive more than once.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] when the delivery could not be processed;
    /// domain failures are reported as `*_FAILED` events instead.
    fn handle<'a>(&'a self, envelope: &'a Envelope) -> HandlerFuture<'a>;
}
