//! Publishing onto the exchange.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::connection::BrokerConnection;
use crate::envelope::Envelope;
use crate::error::BrokerError;
use crate::topology::Topology;

/// Publishes envelopes onto one exchange, fire-and-forget.
///
/// The exchange is declared lazily on the first publish. A successful
/// return means the message was accepted by the local channel, not that
/// the broker confirmed delivery.
pub struct Publisher {
    conn: Arc<BrokerConnection>,
    topology: Topology,
    exchange_declared: AtomicBool,
}

impl Publisher {
    pub fn new(conn: Arc<BrokerConnection>, topology: Topology) -> Self {
        Self {
            conn,
            topology,
            exchange_declared: AtomicBool::new(false),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Sends an envelope to the exchange with its routing key.
    pub async fn publish(&self, envelope: Envelope) -> Result<(), BrokerError> {
        let channel = self.conn.ensure_ready().await?;

        if !self.exchange_declared.load(Ordering::Acquire) {
            channel.declare_exchange(&self.topology).await?;
            self.exchange_declared.store(true, Ordering::Release);
        }

        channel.publish(&self.topology.exchange, &envelope).await?;
        debug!(
            exchange = %self.topology.exchange,
            routing_key = %envelope.routing_key,
            bytes = envelope.payload.len(),
            "message published"
        );
        Ok(())
    }

    /// Serializes `value` and publishes it. A serialization failure aborts
    /// with [`BrokerError::PayloadError`] before anything touches the wire.
    pub async fn publish_json<T: Serialize>(
        &self,
        routing_key: &str,
        value: &T,
    ) -> Result<(), BrokerError> {
        let envelope = Envelope::json(routing_key, value)?;
        self.publish(envelope).await
    }
}
