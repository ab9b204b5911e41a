//! Transport seam between the broker layer and the wire.
//!
//! [`Connector`] opens a physical connection and hands back a logical
//! [`Channel`]; everything above this module is transport-agnostic. The
//! AMQP implementation lives in [`crate::amqp`], the in-process one in
//! [`crate::memory`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::endpoint::BrokerEndpoint;
use crate::envelope::Envelope;
use crate::error::BrokerError;
use crate::topology::Topology;

/// Opens physical connections. Called at most once per connect cycle by
/// [`crate::BrokerConnection`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Arc<dyn Channel>, BrokerError>;
}

#[async_trait]
impl<C: Connector + ?Sized> Connector for Arc<C> {
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Arc<dyn Channel>, BrokerError> {
        (**self).connect(endpoint).await
    }
}

/// One logical channel on an open connection.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Declares an exchange. Idempotent for an identical redeclaration;
    /// a mismatch fails with [`BrokerError::TopologyConflict`].
    async fn declare_exchange(&self, topology: &Topology) -> Result<(), BrokerError>;

    /// Declares a queue. Same idempotence contract as exchanges.
    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), BrokerError>;

    /// Binds a queue to an exchange for a routing key. Re-binding the same
    /// triple has no additional effect.
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    /// Publishes fire-and-forget onto an exchange.
    async fn publish(&self, exchange: &str, envelope: &Envelope) -> Result<(), BrokerError>;

    /// Registers a consumer on a queue. Deliveries arrive on the returned
    /// receiver in broker order and require manual acknowledgment. The
    /// receiver ends when the channel closes.
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<mpsc::UnboundedReceiver<Delivery>, BrokerError>;

    /// Closes the channel, cancelling all consumers registered on it.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Acknowledgment backend for a single delivery.
#[async_trait]
pub trait Acknowledger: Send {
    async fn ack(self: Box<Self>) -> Result<(), BrokerError>;
    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), BrokerError>;
}

/// One message handed to a consumer. Unacknowledged deliveries are eligible
/// for redelivery if the consumer disconnects.
pub struct Delivery {
    pub routing_key: String,
    pub payload: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(routing_key: String, payload: Vec<u8>, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            routing_key,
            payload,
            acker,
        }
    }

    /// Confirms processing; the broker may discard the message.
    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    /// Rejects the message, optionally putting it back on the queue.
    pub async fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.nack(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}
