//! hashtag.io notification service.
//!
//! Consumer daemon: binds the password reset queue, logs incoming events
//! (email dispatch plugs into [`PasswordResetListener::start`]), and shuts
//! the broker connection down on ctrl-c.

use std::sync::Arc;

use anyhow::Result;
use hashtag_broker::{AmqpConnector, BrokerConnection};
use hashtag_notification_service::{log_password_reset, Config, PasswordResetListener};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting notification service");

    let conn = Arc::new(BrokerConnection::new(config.broker.clone(), AmqpConnector));
    let listener = PasswordResetListener::new(conn.clone(), config.topology(), config.binding());

    let subscription = listener.start(log_password_reset).await?;
    info!(
        queue = %config.password_reset_queue,
        routing_key = %config.password_forget_routing_key,
        "consuming password reset events"
    );

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    // Closing the connection cancels the consumer; wait for its loop to
    // wind down before exiting.
    conn.close().await?;
    subscription.join().await;

    info!("Notification service shutdown complete");
    Ok(())
}
