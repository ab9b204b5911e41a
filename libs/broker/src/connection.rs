//! The single shared broker connection.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::endpoint::BrokerEndpoint;
use crate::error::BrokerError;
use crate::transport::{Channel, Connector};

/// Lifecycle of the physical connection. Owned exclusively by
/// [`BrokerConnection`]; other components observe it only through
/// [`BrokerConnection::ensure_ready`].
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready(Arc<dyn Channel>),
    Failed,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready(_) => "ready",
            ConnectionState::Failed => "failed",
        }
    }
}

/// Owns the one physical connection and channel per process.
///
/// Construct it in the binary's entry point and pass it to
/// [`crate::Publisher`] / [`crate::Subscriber`] as an `Arc`; they never
/// open connections of their own.
pub struct BrokerConnection {
    endpoint: BrokerEndpoint,
    connector: Box<dyn Connector>,
    state: Mutex<ConnectionState>,
}

impl BrokerConnection {
    pub fn new(endpoint: BrokerEndpoint, connector: impl Connector + 'static) -> Self {
        Self {
            endpoint,
            connector: Box::new(connector),
            state: Mutex::new(ConnectionState::Disconnected),
        }
    }

    /// Returns the channel, connecting first if necessary.
    ///
    /// Idempotent: when already `Ready` the existing channel is returned.
    /// Otherwise exactly one connect cycle runs; the state lock is held
    /// across the attempt, so concurrent callers await its outcome instead
    /// of racing to open duplicate physical connections. On failure the
    /// state is `Failed` and the next call may try again — there is no
    /// internal retry loop, callers own backoff.
    pub async fn ensure_ready(&self) -> Result<Arc<dyn Channel>, BrokerError> {
        let mut state = self.state.lock().await;

        if let ConnectionState::Ready(channel) = &*state {
            return Ok(channel.clone());
        }

        self.transition(&mut state, ConnectionState::Connecting);
        info!(endpoint = %self.endpoint, "connecting to message broker");

        match self.connector.connect(&self.endpoint).await {
            Ok(channel) => {
                self.transition(&mut state, ConnectionState::Ready(channel.clone()));
                info!(endpoint = %self.endpoint, "broker channel ready");
                Ok(channel)
            }
            Err(e) => {
                self.transition(&mut state, ConnectionState::Failed);
                error!(endpoint = %self.endpoint, error = %e, "broker connect failed");
                Err(e)
            }
        }
    }

    /// Closes the channel and returns to `Disconnected`. All consumers
    /// registered on the channel are implicitly cancelled.
    pub async fn close(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;

        if let ConnectionState::Ready(channel) = &*state {
            channel.close().await?;
        }
        self.transition(&mut state, ConnectionState::Disconnected);
        info!(endpoint = %self.endpoint, "broker connection closed");
        Ok(())
    }

    /// Current state name, for logging and assertions.
    pub async fn state_name(&self) -> &'static str {
        self.state.lock().await.name()
    }

    fn transition(&self, state: &mut ConnectionState, next: ConnectionState) {
        debug!(from = state.name(), to = next.name(), "connection state");
        *state = next;
    }
}
