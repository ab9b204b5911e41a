//! AMQP transport over lapin.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::endpoint::BrokerEndpoint;
use crate::envelope::Envelope;
use crate::error::BrokerError;
use crate::topology::{ExchangeKind, Topology};
use crate::transport::{Acknowledger, Channel, Connector, Delivery};

/// AMQP reply code for a declare that conflicts with existing topology.
const PRECONDITION_FAILED: u16 = 406;

/// Opens one AMQP connection and one channel on it.
pub struct AmqpConnector;

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Arc<dyn Channel>, BrokerError> {
        let uri = endpoint.amqp_uri();
        let connection = Connection::connect(&uri, ConnectionProperties::default())
            .await
            .map_err(|e| {
                BrokerError::BrokerUnavailable(format!("connect to {endpoint}: {e}"))
            })?;

        let channel = connection.create_channel().await.map_err(|e| {
            BrokerError::BrokerUnavailable(format!("create channel on {endpoint}: {e}"))
        })?;

        Ok(Arc::new(AmqpChannel {
            connection,
            channel,
        }))
    }
}

struct AmqpChannel {
    connection: Connection,
    channel: lapin::Channel,
}

fn to_lapin_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
    }
}

fn unavailable(context: &str, err: lapin::Error) -> BrokerError {
    BrokerError::BrokerUnavailable(format!("{context}: {err}"))
}

/// The broker answers a mismatched redeclaration with 406
/// precondition-failed; everything else is treated as unavailability.
fn declare_error(kind: &'static str, name: &str, err: lapin::Error) -> BrokerError {
    if let lapin::Error::ProtocolError(amqp) = &err {
        if amqp.get_id() == PRECONDITION_FAILED {
            return BrokerError::TopologyConflict {
                kind,
                name: name.to_string(),
                reason: amqp.to_string(),
            };
        }
    }
    unavailable("declare", err)
}

#[async_trait]
impl Channel for AmqpChannel {
    async fn declare_exchange(&self, topology: &Topology) -> Result<(), BrokerError> {
        self.channel
            .exchange_declare(
                &topology.exchange,
                to_lapin_kind(topology.kind),
                ExchangeDeclareOptions {
                    durable: topology.durable,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| declare_error("exchange", &topology.exchange, e))
    }

    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), BrokerError> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map(|_| ())
            .map_err(|e| declare_error("queue", queue, e))
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| declare_error("binding", queue, e))
    }

    async fn publish(&self, exchange: &str, envelope: &Envelope) -> Result<(), BrokerError> {
        // Fire-and-forget: the returned confirmation future is dropped,
        // success only means the channel accepted the frame.
        self.channel
            .basic_publish(
                exchange,
                &envelope.routing_key,
                BasicPublishOptions::default(),
                &envelope.payload,
                BasicProperties::default()
                    .with_content_type(envelope.content_type.as_str().into()),
            )
            .await
            .map(|_confirm| ())
            .map_err(|e| unavailable("publish", e))
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<mpsc::UnboundedReceiver<Delivery>, BrokerError> {
        let mut consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| unavailable("consume", e))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let queue = queue.to_string();
        tokio::spawn(async move {
            while let Some(result) = consumer.next().await {
                match result {
                    Ok(delivery) => {
                        let handed = Delivery::new(
                            delivery.routing_key.to_string(),
                            delivery.data,
                            Box::new(AmqpAcker {
                                acker: delivery.acker,
                            }),
                        );
                        if tx.send(handed).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(queue = %queue, error = %e, "consumer stream error");
                        break;
                    }
                }
            }
            debug!(queue = %queue, "amqp consumer stream ended");
        });

        Ok(rx)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.channel
            .close(200, "shutdown")
            .await
            .map_err(|e| unavailable("channel close", e))?;
        self.connection
            .close(200, "shutdown")
            .await
            .map_err(|e| unavailable("connection close", e))
    }
}

struct AmqpAcker {
    acker: lapin::acker::Acker,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| unavailable("ack", e))
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), BrokerError> {
        self.acker
            .nack(BasicNackOptions {
                requeue,
                ..BasicNackOptions::default()
            })
            .await
            .map_err(|e| unavailable("nack", e))
    }
}
