//! Error types for broker operations.

use thiserror::Error;

/// Errors surfaced by connection, topology, publish, and subscribe calls.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The connection or channel could not be obtained. Callers decide
    /// whether and when to retry; the broker layer never loops internally.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// A declare did not match what the broker already holds under that
    /// name. This is a fatal misconfiguration, not a transient failure.
    #[error("topology conflict on {kind} '{name}': {reason}")]
    TopologyConflict {
        kind: &'static str,
        name: String,
        reason: String,
    },

    /// Payload serialization or deserialization failed. On the publish
    /// side this aborts the publish before anything is sent.
    #[error("payload error: {0}")]
    PayloadError(String),

    /// The channel was closed underneath an in-flight operation.
    #[error("channel closed")]
    ChannelClosed,
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::PayloadError(err.to_string())
    }
}
