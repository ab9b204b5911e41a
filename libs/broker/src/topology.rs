//! Exchange, queue, and binding declaration.

use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use crate::connection::BrokerConnection;
use crate::error::BrokerError;

/// Exchange routing discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Deliver to queues whose binding key equals the routing key.
    Direct,
    /// Deliver by wildcard pattern match (`*` one word, `#` any words).
    Topic,
    /// Deliver to every bound queue regardless of key.
    Fanout,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Fanout => "fanout",
        }
    }
}

impl FromStr for ExchangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(ExchangeKind::Direct),
            "topic" => Ok(ExchangeKind::Topic),
            "fanout" => Ok(ExchangeKind::Fanout),
            other => Err(format!("unknown exchange type '{other}'")),
        }
    }
}

/// One exchange per deployment; queues are declared per consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

impl Topology {
    pub fn new(exchange: impl Into<String>, kind: ExchangeKind, durable: bool) -> Self {
        Self {
            exchange: exchange.into(),
            kind,
            durable,
        }
    }

    /// Durable direct exchange, the deployment default.
    pub fn direct(exchange: impl Into<String>) -> Self {
        Self::new(exchange, ExchangeKind::Direct, true)
    }
}

/// Association between a queue and the exchange for one routing key. A
/// queue may carry several bindings, one per key of interest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: String,
    pub routing_key: String,
    pub durable: bool,
}

impl QueueBinding {
    /// Durable queue binding, the deployment default.
    pub fn durable(queue: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            routing_key: routing_key.into(),
            durable: true,
        }
    }
}

/// Declares topology on the shared channel. Safe to call repeatedly: the
/// broker's declare semantics make identical redeclarations no-ops, and a
/// mismatch surfaces as [`BrokerError::TopologyConflict`].
pub struct TopologyManager {
    conn: Arc<BrokerConnection>,
}

impl TopologyManager {
    pub fn new(conn: Arc<BrokerConnection>) -> Self {
        Self { conn }
    }

    /// Declares the exchange only. Sufficient for the publish side.
    pub async fn declare_exchange(&self, topology: &Topology) -> Result<(), BrokerError> {
        let channel = self.conn.ensure_ready().await?;
        channel.declare_exchange(topology).await?;
        debug!(exchange = %topology.exchange, kind = topology.kind.as_str(), "exchange declared");
        Ok(())
    }

    /// Declares exchange, queue, and binding. Required before consuming.
    pub async fn declare_queue_binding(
        &self,
        binding: &QueueBinding,
        topology: &Topology,
    ) -> Result<(), BrokerError> {
        let channel = self.conn.ensure_ready().await?;
        channel.declare_exchange(topology).await?;
        channel.declare_queue(&binding.queue, binding.durable).await?;
        channel
            .bind_queue(&binding.queue, &topology.exchange, &binding.routing_key)
            .await?;
        debug!(
            queue = %binding.queue,
            exchange = %topology.exchange,
            routing_key = %binding.routing_key,
            "queue bound"
        );
        Ok(())
    }
}
