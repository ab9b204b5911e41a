//! In-process broker fabric for tests and local development.
//!
//! Implements the [`Connector`]/[`Channel`] seam over plain in-memory
//! state: exchanges route by kind (direct, fanout, topic with `*`/`#`
//! wildcards), queues buffer until a consumer attaches, and deliveries are
//! tracked as unacknowledged until settled. Knobs for failing or slowing
//! the connect cycle support the connection tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::endpoint::BrokerEndpoint;
use crate::envelope::Envelope;
use crate::error::BrokerError;
use crate::topology::{ExchangeKind, Topology};
use crate::transport::{Acknowledger, Channel, Connector, Delivery};

/// In-memory broker. All channels opened through one instance share the
/// same exchanges and queues, so separate "processes" in a test can talk
/// to each other.
pub struct MemoryBroker {
    fabric: Arc<Mutex<FabricState>>,
    connect_count: AtomicUsize,
    fail_connects: AtomicBool,
    connect_delay: Option<Duration>,
    next_channel_id: AtomicUsize,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            fabric: Arc::new(Mutex::new(FabricState::default())),
            connect_count: AtomicUsize::new(0),
            fail_connects: AtomicBool::new(false),
            connect_delay: None,
            next_channel_id: AtomicUsize::new(0),
        }
    }

    /// A broker that rejects every connect attempt.
    pub fn failing() -> Self {
        let broker = Self::new();
        broker.fail_connects.store(true, Ordering::SeqCst);
        broker
    }

    /// A broker whose connects take `delay`, widening the window for
    /// concurrent-connect races.
    pub fn with_connect_delay(delay: Duration) -> Self {
        Self {
            connect_delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn set_fail_connects(&self, fail: bool) {
        self.fail_connects.store(fail, Ordering::SeqCst);
    }

    /// Number of successful physical connects.
    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }

    pub fn exchange_exists(&self, name: &str) -> bool {
        self.fabric.lock().unwrap().exchanges.contains_key(name)
    }

    /// Messages sitting in the queue, not yet handed to a consumer.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.fabric
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .unwrap_or(0)
    }

    /// Deliveries handed out but not yet settled.
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.fabric
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map(|q| q.unacked.len())
            .unwrap_or(0)
    }

    pub fn binding_count(&self, queue: &str) -> usize {
        self.fabric
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map(|q| q.bindings.len())
            .unwrap_or(0)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Arc<dyn Channel>, BrokerError> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connects.load(Ordering::SeqCst) {
            return Err(BrokerError::BrokerUnavailable(format!(
                "{endpoint}: connection refused (memory broker in failing mode)"
            )));
        }

        self.connect_count.fetch_add(1, Ordering::SeqCst);
        let id = self.next_channel_id.fetch_add(1, Ordering::SeqCst);
        debug!(channel_id = id, "memory broker channel opened");

        Ok(Arc::new(MemoryChannel {
            id,
            fabric: Arc::clone(&self.fabric),
            closed: AtomicBool::new(false),
        }))
    }
}

#[derive(Default)]
struct FabricState {
    exchanges: HashMap<String, ExchangeRecord>,
    queues: HashMap<String, QueueRecord>,
}

struct ExchangeRecord {
    kind: ExchangeKind,
    durable: bool,
}

#[derive(Default)]
struct QueueRecord {
    durable: bool,
    /// (exchange, routing key) pairs; a set, so re-binding is a no-op.
    bindings: HashSet<(String, String)>,
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, StoredMessage>,
    consumer: Option<ConsumerSlot>,
    next_tag: u64,
}

struct ConsumerSlot {
    channel_id: usize,
    sender: mpsc::UnboundedSender<Delivery>,
}

#[derive(Clone)]
struct StoredMessage {
    routing_key: String,
    payload: Vec<u8>,
}

/// Hands ready messages to the queue's consumer, moving them to the
/// unacked table. Called whenever a message or a consumer arrives.
fn flush_queue(fabric: &Arc<Mutex<FabricState>>, state: &mut FabricState, queue: &str) {
    let Some(q) = state.queues.get_mut(queue) else {
        return;
    };
    while q.consumer.is_some() {
        let Some(msg) = q.ready.pop_front() else {
            break;
        };
        let tag = q.next_tag;
        q.next_tag += 1;
        q.unacked.insert(tag, msg.clone());

        let delivery = Delivery::new(
            msg.routing_key.clone(),
            msg.payload.clone(),
            Box::new(MemoryAcker {
                fabric: Arc::clone(fabric),
                queue: queue.to_string(),
                tag,
            }),
        );

        let slot = q.consumer.as_ref().unwrap();
        if slot.sender.send(delivery).is_err() {
            // Consumer went away; take the message back.
            let msg = q.unacked.remove(&tag).unwrap();
            q.ready.push_front(msg);
            q.consumer = None;
        }
    }
}

struct MemoryChannel {
    id: usize,
    fabric: Arc<Mutex<FabricState>>,
    closed: AtomicBool,
}

impl MemoryChannel {
    fn guard_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BrokerError::ChannelClosed)
        } else {
            Ok(())
        }
    }
}

fn routes_to(binding_key: &str, kind: ExchangeKind, routing_key: &str) -> bool {
    match kind {
        ExchangeKind::Direct => binding_key == routing_key,
        ExchangeKind::Fanout => true,
        ExchangeKind::Topic => topic_matches(binding_key, routing_key),
    }
}

/// AMQP topic matching: `*` matches exactly one dot-separated word, `#`
/// matches zero or more.
fn topic_matches(pattern: &str, key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.split_first(), key.split_first()) {
            (None, None) => true,
            (Some((&"#", rest)), _) => {
                matches(rest, key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some((&"*", p_rest)), Some((_, k_rest))) => matches(p_rest, k_rest),
            (Some((p, p_rest)), Some((k, k_rest))) => p == k && matches(p_rest, k_rest),
            _ => false,
        }
    }
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    matches(&pattern, &key)
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_exchange(&self, topology: &Topology) -> Result<(), BrokerError> {
        self.guard_open()?;
        let mut state = self.fabric.lock().unwrap();
        if let Some(existing) = state.exchanges.get(&topology.exchange) {
            if existing.kind == topology.kind && existing.durable == topology.durable {
                return Ok(());
            }
            return Err(BrokerError::TopologyConflict {
                kind: "exchange",
                name: topology.exchange.clone(),
                reason: format!(
                    "declared as {} durable={}, requested {} durable={}",
                    existing.kind.as_str(),
                    existing.durable,
                    topology.kind.as_str(),
                    topology.durable
                ),
            });
        }
        state.exchanges.insert(
            topology.exchange.clone(),
            ExchangeRecord {
                kind: topology.kind,
                durable: topology.durable,
            },
        );
        Ok(())
    }

    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), BrokerError> {
        self.guard_open()?;
        let mut state = self.fabric.lock().unwrap();
        if let Some(existing) = state.queues.get(queue) {
            if existing.durable == durable {
                return Ok(());
            }
            return Err(BrokerError::TopologyConflict {
                kind: "queue",
                name: queue.to_string(),
                reason: format!(
                    "declared durable={}, requested durable={}",
                    existing.durable, durable
                ),
            });
        }
        state.queues.insert(
            queue.to_string(),
            QueueRecord {
                durable,
                ..QueueRecord::default()
            },
        );
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.guard_open()?;
        let mut state = self.fabric.lock().unwrap();
        if !state.exchanges.contains_key(exchange) {
            return Err(BrokerError::BrokerUnavailable(format!(
                "cannot bind to undeclared exchange '{exchange}'"
            )));
        }
        let Some(q) = state.queues.get_mut(queue) else {
            return Err(BrokerError::BrokerUnavailable(format!(
                "cannot bind undeclared queue '{queue}'"
            )));
        };
        q.bindings
            .insert((exchange.to_string(), routing_key.to_string()));
        Ok(())
    }

    async fn publish(&self, exchange: &str, envelope: &Envelope) -> Result<(), BrokerError> {
        self.guard_open()?;
        let mut state = self.fabric.lock().unwrap();
        let Some(record) = state.exchanges.get(exchange) else {
            return Err(BrokerError::BrokerUnavailable(format!(
                "publish to undeclared exchange '{exchange}'"
            )));
        };
        let kind = record.kind;

        let targets: Vec<String> = state
            .queues
            .iter()
            .filter(|(_, q)| {
                q.bindings
                    .iter()
                    .any(|(ex, key)| ex == exchange && routes_to(key, kind, &envelope.routing_key))
            })
            .map(|(name, _)| name.clone())
            .collect();

        for queue in targets {
            if let Some(q) = state.queues.get_mut(&queue) {
                q.ready.push_back(StoredMessage {
                    routing_key: envelope.routing_key.clone(),
                    payload: envelope.payload.clone(),
                });
            }
            flush_queue(&self.fabric, &mut state, &queue);
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<mpsc::UnboundedReceiver<Delivery>, BrokerError> {
        self.guard_open()?;
        let mut state = self.fabric.lock().unwrap();
        let Some(q) = state.queues.get_mut(queue) else {
            return Err(BrokerError::BrokerUnavailable(format!(
                "consume from undeclared queue '{queue}'"
            )));
        };

        let (tx, rx) = mpsc::unbounded_channel();
        q.consumer = Some(ConsumerSlot {
            channel_id: self.id,
            sender: tx,
        });
        debug!(queue, consumer_tag, "memory consumer attached");

        // Deliver anything that was published before the consumer arrived.
        flush_queue(&self.fabric, &mut state, queue);
        Ok(rx)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::SeqCst);
        let mut state = self.fabric.lock().unwrap();
        for q in state.queues.values_mut() {
            let owned = q
                .consumer
                .as_ref()
                .is_some_and(|slot| slot.channel_id == self.id);
            if owned {
                q.consumer = None;
                // Unsettled deliveries return to the queue, oldest first.
                let mut tags: Vec<u64> = q.unacked.keys().copied().collect();
                tags.sort_unstable();
                for tag in tags.into_iter().rev() {
                    if let Some(msg) = q.unacked.remove(&tag) {
                        q.ready.push_front(msg);
                    }
                }
            }
        }
        debug!(channel_id = self.id, "memory broker channel closed");
        Ok(())
    }
}

struct MemoryAcker {
    fabric: Arc<Mutex<FabricState>>,
    queue: String,
    tag: u64,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        let mut state = self.fabric.lock().unwrap();
        if let Some(q) = state.queues.get_mut(&self.queue) {
            q.unacked.remove(&self.tag);
        }
        Ok(())
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), BrokerError> {
        let mut state = self.fabric.lock().unwrap();
        let requeued = match state.queues.get_mut(&self.queue) {
            Some(q) => match q.unacked.remove(&self.tag) {
                Some(msg) if requeue => {
                    q.ready.push_front(msg);
                    true
                }
                _ => false,
            },
            None => false,
        };
        if requeued {
            flush_queue(&self.fabric, &mut state, &self.queue);
        }
        Ok(())
    }
}
