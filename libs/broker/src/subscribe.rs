//! Consuming deliveries with manual acknowledgment.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::connection::BrokerConnection;
use crate::error::BrokerError;
use crate::topology::{QueueBinding, Topology};
use crate::transport::Delivery;

/// What happens to a delivery whose handler fails.
///
/// Decode failures are independent of this policy: an undecodable payload
/// is always logged and acknowledged so a poison message cannot loop
/// through redelivery forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckPolicy {
    /// Acknowledge regardless of the handler outcome. The handler error is
    /// logged and the message is gone. This reproduces the original
    /// pipeline's behavior and is the default; delivery is at-least-once
    /// with respect to transport failures only, not handler failures.
    #[default]
    AckAlways,
    /// Leave the delivery unacknowledged on handler failure. The broker
    /// redelivers it once this consumer disconnects.
    AckOnSuccessOnly,
    /// Negatively acknowledge on handler failure and ask the broker to
    /// requeue immediately.
    Requeue,
}

/// Error type handlers report back with.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Running consumer registration. Dropping the handle does not stop the
/// consumer; closing the [`BrokerConnection`] is the cancellation path.
pub struct Subscription {
    consumer_tag: String,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Hard-stops the consumer task without acknowledging anything.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Waits until the consumer stream ends (i.e. the channel closed).
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Binds a queue and feeds decoded deliveries to a handler, one at a time.
///
/// The broker delivers sequentially to a single consumer registration, so
/// a slow handler delays acknowledgment of its own queue but never blocks
/// unrelated queues. No timeout is imposed on handlers; wrap slow work in
/// one if a hung handler must not stall the consumer.
pub struct Subscriber {
    conn: Arc<BrokerConnection>,
    topology: Topology,
    ack_policy: AckPolicy,
}

impl Subscriber {
    pub fn new(conn: Arc<BrokerConnection>, topology: Topology) -> Self {
        Self {
            conn,
            topology,
            ack_policy: AckPolicy::default(),
        }
    }

    pub fn with_ack_policy(mut self, policy: AckPolicy) -> Self {
        self.ack_policy = policy;
        self
    }

    /// Declares exchange + queue + binding, registers a consumer, and
    /// spawns the delivery loop. Each incoming message is decoded as `E`
    /// and handed to `handler` at most once.
    pub async fn subscribe<E, H, Fut>(
        &self,
        binding: &QueueBinding,
        handler: H,
    ) -> Result<Subscription, BrokerError>
    where
        E: DeserializeOwned + Send + 'static,
        H: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send,
    {
        let channel = self.conn.ensure_ready().await?;
        channel.declare_exchange(&self.topology).await?;
        channel.declare_queue(&binding.queue, binding.durable).await?;
        channel
            .bind_queue(&binding.queue, &self.topology.exchange, &binding.routing_key)
            .await?;

        let consumer_tag = format!("{}-{}", binding.queue, Uuid::new_v4());
        let mut deliveries = channel.consume(&binding.queue, &consumer_tag).await?;

        info!(
            queue = %binding.queue,
            exchange = %self.topology.exchange,
            routing_key = %binding.routing_key,
            consumer_tag = %consumer_tag,
            "consumer registered"
        );

        let policy = self.ack_policy;
        let queue = binding.queue.clone();
        let task = tokio::spawn(async move {
            while let Some(delivery) = deliveries.recv().await {
                handle_delivery::<E, H, Fut>(&queue, policy, delivery, &handler).await;
            }
            debug!(queue = %queue, "consumer stream ended");
        });

        Ok(Subscription { consumer_tag, task })
    }
}

async fn handle_delivery<E, H, Fut>(queue: &str, policy: AckPolicy, delivery: Delivery, handler: &H)
where
    E: DeserializeOwned + Send + 'static,
    H: Fn(E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send,
{
    let event: E = match serde_json::from_slice(&delivery.payload) {
        Ok(event) => event,
        Err(e) => {
            // A malformed payload is a processing error, not a transport
            // error: drop it after one logged failure instead of letting
            // it cycle through redelivery.
            warn!(queue, error = %e, "discarding undecodable message");
            if let Err(e) = delivery.ack().await {
                warn!(queue, error = %e, "failed to ack undecodable message");
            }
            return;
        }
    };

    match handler(event).await {
        Ok(()) => {
            if let Err(e) = delivery.ack().await {
                warn!(queue, error = %e, "failed to ack processed message");
            }
        }
        Err(e) => {
            error!(queue, error = %e, "message handler failed");
            let outcome = match policy {
                AckPolicy::AckAlways => delivery.ack().await,
                AckPolicy::AckOnSuccessOnly => {
                    // Left unacknowledged on purpose; the broker holds it
                    // until this consumer goes away.
                    Ok(())
                }
                AckPolicy::Requeue => delivery.nack(true).await,
            };
            if let Err(e) = outcome {
                warn!(queue, error = %e, "failed to settle failed delivery");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde::Deserialize;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use super::*;
    use crate::endpoint::BrokerEndpoint;
    use crate::envelope::Envelope;
    use crate::memory::MemoryBroker;
    use crate::publish::Publisher;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Ping {
        n: u32,
    }

    fn connection(broker: &Arc<MemoryBroker>) -> Arc<BrokerConnection> {
        Arc::new(BrokerConnection::new(
            BrokerEndpoint::default(),
            Arc::clone(broker),
        ))
    }

    fn topology() -> Topology {
        Topology::direct("hashtag.io")
    }

    fn binding() -> QueueBinding {
        QueueBinding::durable("notification.email.password", "password.forget")
    }

    async fn drain_settles(broker: &Arc<MemoryBroker>, queue: &str) {
        // Acks land asynchronously after the handler returns; poll briefly.
        for _ in 0..50 {
            if broker.queue_depth(queue) == 0 && broker.unacked_count(queue) == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue did not drain");
    }

    #[tokio::test]
    async fn test_round_trip_payload_fidelity() {
        let broker = Arc::new(MemoryBroker::new());
        let subscriber = Subscriber::new(connection(&broker), topology());
        let (tx, mut rx) = mpsc::unbounded_channel();

        subscriber
            .subscribe(&binding(), move |ping: Ping| {
                let tx = tx.clone();
                async move {
                    tx.send(ping).unwrap();
                    Ok(())
                }
            })
            .await
            .unwrap();

        let publisher = Publisher::new(connection(&broker), topology());
        publisher
            .publish(Envelope::new("password.forget", br#"{"n":7}"#.to_vec()))
            .await
            .unwrap();

        let received = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, Ping { n: 7 });
        drain_settles(&broker, "notification.email.password").await;
    }

    #[tokio::test]
    async fn test_failing_handler_still_acks_by_default() {
        let broker = Arc::new(MemoryBroker::new());
        let subscriber = Subscriber::new(connection(&broker), topology());
        let calls = Arc::new(AtomicUsize::new(0));

        let counted = calls.clone();
        subscriber
            .subscribe(&binding(), move |_: Ping| {
                let counted = counted.clone();
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Err("handler always fails".into())
                }
            })
            .await
            .unwrap();

        let publisher = Publisher::new(connection(&broker), topology());
        publisher
            .publish(Envelope::new("password.forget", br#"{"n":1}"#.to_vec()))
            .await
            .unwrap();

        // The queue drains: one invocation, no redelivery loop.
        drain_settles(&broker, "notification.email.password").await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_acked_without_handler() {
        let broker = Arc::new(MemoryBroker::new());
        let subscriber = Subscriber::new(connection(&broker), topology());
        let calls = Arc::new(AtomicUsize::new(0));

        let counted = calls.clone();
        subscriber
            .subscribe(&binding(), move |_: Ping| {
                let counted = counted.clone();
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        let publisher = Publisher::new(connection(&broker), topology());
        publisher
            .publish(Envelope::new("password.forget", b"not json".to_vec()))
            .await
            .unwrap();

        drain_settles(&broker, "notification.email.password").await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ack_on_success_only_leaves_failure_unacked() {
        let broker = Arc::new(MemoryBroker::new());
        let subscriber = Subscriber::new(connection(&broker), topology())
            .with_ack_policy(AckPolicy::AckOnSuccessOnly);
        let (tx, mut rx) = mpsc::unbounded_channel();

        subscriber
            .subscribe(&binding(), move |ping: Ping| {
                let tx = tx.clone();
                async move {
                    tx.send(ping.n).unwrap();
                    Err("no".into())
                }
            })
            .await
            .unwrap();

        let publisher = Publisher::new(connection(&broker), topology());
        publisher
            .publish(Envelope::new("password.forget", br#"{"n":3}"#.to_vec()))
            .await
            .unwrap();

        timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(broker.unacked_count("notification.email.password"), 1);
    }

    #[tokio::test]
    async fn test_requeue_policy_redelivers_until_success() {
        let broker = Arc::new(MemoryBroker::new());
        let subscriber =
            Subscriber::new(connection(&broker), topology()).with_ack_policy(AckPolicy::Requeue);
        let calls = Arc::new(AtomicUsize::new(0));

        let counted = calls.clone();
        subscriber
            .subscribe(&binding(), move |_: Ping| {
                let counted = counted.clone();
                async move {
                    // Fail the first delivery, succeed on the requeued one.
                    if counted.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err("transient".into())
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap();

        let publisher = Publisher::new(connection(&broker), topology());
        publisher
            .publish(Envelope::new("password.forget", br#"{"n":9}"#.to_vec()))
            .await
            .unwrap();

        drain_settles(&broker, "notification.email.password").await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_same_key_deliveries_keep_publish_order() {
        let broker = Arc::new(MemoryBroker::new());
        let subscriber = Subscriber::new(connection(&broker), topology());
        let (tx, mut rx) = mpsc::unbounded_channel();

        subscriber
            .subscribe(&binding(), move |ping: Ping| {
                let tx = tx.clone();
                async move {
                    tx.send(ping.n).unwrap();
                    Ok(())
                }
            })
            .await
            .unwrap();

        let publisher = Publisher::new(connection(&broker), topology());
        for n in 0..5u32 {
            publisher
                .publish(Envelope::new(
                    "password.forget",
                    format!("{{\"n\":{n}}}").into_bytes(),
                ))
                .await
                .unwrap();
        }

        for expected in 0..5 {
            let n = timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(n, expected);
        }
    }

    #[tokio::test]
    async fn test_closing_connection_ends_consumer() {
        let broker = Arc::new(MemoryBroker::new());
        let conn = connection(&broker);
        let subscriber = Subscriber::new(conn.clone(), topology());

        let subscription = subscriber
            .subscribe(&binding(), |_: Ping| async { Ok(()) })
            .await
            .unwrap();

        conn.close().await.unwrap();
        timeout(Duration::from_secs(1), subscription.join())
            .await
            .expect("consumer task should end when the channel closes");
    }
}
