//! Wire envelope for events on the bus.
//!
//! Every message published to a channel is an [`Envelope`]:
//! `{ eventType, timestamp, data }` with a structural JSON payload. The
//! channel name equals the event type string, so subscribers match on
//! `event_type` and then decode the typed payload.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while encoding or decoding event payloads.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Payload could not be serialized to JSON
    #[error("failed to encode event payload: {0}")]
    Encode(#[source] serde_json::Error),

    /// Payload could not be deserialized into the expected type
    #[error("failed to decode '{event_type}' payload: {source}")]
    Decode {
        /// The envelope's event type
        event_type: String,
        /// The underlying JSON error
        #[source]
        source: serde_json::Error,
    },
}

/// An event that can be published on the bus.
///
/// The event type string doubles as the channel name, so every payload
/// type knows where it travels.
pub trait Event: Serialize + Send + Sync {
    /// Stable event type identifier, e.g. `"order.created"`
    fn event_type(&self) -> &'static str;

    /// Channel this event is published on (equal to the event type)
    fn channel(&self) -> &'static str {
        self.event_type()
    }
}

/// Wire envelope: event type, publish timestamp, structural payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Event type identifier (also the channel name)
    pub event_type: String,
    /// When the publisher created the envelope
    pub timestamp: DateTime<Utc>,
    /// Structural payload, shape per event type
    pub data: serde_json::Value,
}

impl Envelope {
    /// Wrap a typed event into an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the payload cannot be serialized.
    pub fn encode<E: Event>(event: &E, timestamp: DateTime<Utc>) -> Result<Self, CodecError> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            timestamp,
            data: serde_json::to_value(event).map_err(CodecError::Encode)?,
        })
    }

    /// Decode the payload into a typed event struct.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the payload shape does not match.
    pub fn decode<P: DeserializeOwned>(&self) -> Result<P, CodecError> {
        serde_json::from_value(self.data.clone()).map_err(|source| CodecError::Decode {
            event_type: self.event_type.clone(),
            source,
        })
    }

    /// Whether this envelope carries the given event type.
    #[must_use]
    pub fn is(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Envelope {{ type: {}, at: {} }}", self.event_type, self.timestamp)
    }
}
