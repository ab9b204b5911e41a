//! Manual smoke entry point for the password reset pipeline.
//!
//! The HTTP layer fronting the user service lives elsewhere; until it is
//! mounted, this binary wires the saga against the configured broker and
//! fires one reset request per email given on the command line, seeding an
//! in-memory account for each so the saga has a record to act on.

use std::sync::Arc;

use anyhow::Result;
use hashtag_broker::{AmqpConnector, BrokerConnection, Publisher};
use hashtag_user_service::{Config, MemoryUserStore, PasswordResetSaga, User};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn seed_user(email: &str) -> User {
    User {
        id: format!("user-{email}"),
        username: email.split('@').next().unwrap_or("user").to_string(),
        email: email.to_string(),
        password_hash: String::new(),
        first_name: "Smoke".to_string(),
        last_name: "Test".to_string(),
        age: 0,
        address: None,
        city: None,
        zip: None,
        reset_token: None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let emails: Vec<String> = std::env::args().skip(1).collect();
    if emails.is_empty() {
        anyhow::bail!("usage: user-service <email>...");
    }

    info!(broker = %config.broker, exchange = %config.exchange, "starting user service smoke run");

    let conn = Arc::new(BrokerConnection::new(config.broker.clone(), AmqpConnector));
    let publisher = Publisher::new(conn.clone(), config.topology());

    let store = Arc::new(MemoryUserStore::new());
    for email in &emails {
        store.insert(seed_user(email));
    }

    let saga = PasswordResetSaga::new(
        store,
        publisher,
        config.password_forget_routing_key.clone(),
        config.reset_url_base.clone(),
    );

    for email in &emails {
        if let Err(e) = saga.request_password_reset(email).await {
            error!(email, error = %e, "reset request failed");
        }
    }

    conn.close().await?;
    Ok(())
}
