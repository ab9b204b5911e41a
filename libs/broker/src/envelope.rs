//! The unit handed to the broker: routing key plus serialized payload.

use serde::Serialize;

use crate::error::BrokerError;

/// Content type attached to JSON payloads.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// A message as published to an exchange and delivered to a queue.
///
/// The payload is opaque bytes at this layer; whether they deserialize to
/// what the consumer expects is a processing concern, not a transport one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub content_type: String,
}

impl Envelope {
    /// Wraps already-serialized bytes as a JSON envelope.
    pub fn new(routing_key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload,
            content_type: CONTENT_TYPE_JSON.to_string(),
        }
    }

    /// Serializes `value` into a JSON envelope. A serialization failure
    /// returns [`BrokerError::PayloadError`] and nothing is built.
    pub fn json<T: Serialize>(
        routing_key: impl Into<String>,
        value: &T,
    ) -> Result<Self, BrokerError> {
        let payload = serde_json::to_vec(value)?;
        Ok(Self::new(routing_key, payload))
    }
}
