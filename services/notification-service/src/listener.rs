//! Password reset event consumption.

use std::future::Future;
use std::sync::Arc;

use hashtag_broker::{
    BrokerConnection, BrokerError, HandlerResult, QueueBinding, Subscriber, Subscription, Topology,
};
use hashtag_events::PasswordResetEvent;
use tracing::info;

/// Binds the password reset queue and exposes the registration point the
/// email-dispatch subsystem plugs into.
pub struct PasswordResetListener {
    subscriber: Subscriber,
    binding: QueueBinding,
}

impl PasswordResetListener {
    pub fn new(conn: Arc<BrokerConnection>, topology: Topology, binding: QueueBinding) -> Self {
        Self {
            subscriber: Subscriber::new(conn, topology),
            binding,
        }
    }

    /// Registers `handler` to run once per received reset event. Declares
    /// the queue and binding on first use; the broker connection is shared
    /// and established lazily.
    pub async fn start<H, Fut>(&self, handler: H) -> Result<Subscription, BrokerError>
    where
        H: Fn(PasswordResetEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send,
    {
        self.subscriber.subscribe(&self.binding, handler).await
    }
}

/// Default handler: records the event and nothing more.
// TODO: implement the forgot-password email dispatch
pub async fn log_password_reset(event: PasswordResetEvent) -> HandlerResult {
    info!(
        email = %event.email,
        reset_url = %event.reset_url,
        "received password reset notification"
    );
    Ok(())
}
