//! # Purchase Saga Runtime
//!
//! Runtime plumbing shared by every participant:
//!
//! - [`Participant`](participant::Participant) - the handler interface
//! - [`ParticipantRunner`](runner::ParticipantRunner) - the subscription
//!   loop with shutdown, retry and dead-lettering
//! - [`RetryPolicy`](retry::RetryPolicy) - exponential backoff for
//!   transient handler failures
//! - [`DeadLetterQueue`](dlq::DeadLetterQueue) - terminal parking for
//!   undeliverable envelopes
//!
//! The runtime knows nothing about the saga's domain; it moves envelopes
//! from the bus into handlers and keeps failures observable.

pub mod dlq;
pub mod participant;
pub mod retry;
pub mod runner;

pub use dlq::{DeadLetterQueue, DlqError, DlqStatus, FailedDelivery, FailureReport, InMemoryDeadLetterQueue};
pub use participant::{HandlerError, HandlerFuture, Participant};
pub use retry::{retry_with_predicate, RetryPolicy};
pub use runner::ParticipantRunner;
