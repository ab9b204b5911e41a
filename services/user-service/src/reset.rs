//! Initiator side of the forgot-password saga.
//!
//! One call runs the whole initiator state machine:
//! requested → token issued → event published. Failures are terminal for
//! the call; an already-persisted token is deliberately left in place when
//! the publish fails (no compensating rollback), since re-requesting
//! simply overwrites it.

use std::sync::Arc;

use hashtag_broker::{BrokerError, Publisher};
use hashtag_events::PasswordResetEvent;
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::{StoreError, UserStore};

/// Random bytes behind a reset token; hex-encoded to 40 characters.
pub const RESET_TOKEN_BYTES: usize = 20;

#[derive(Debug, Error)]
pub enum ResetError {
    /// No account for that email. Surfaced to the HTTP layer as a plain
    /// not-found; note the response timing still differs from the success
    /// path, a known hardening gap.
    #[error("no user with email '{0}'")]
    RecordNotFound(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Drives a password reset request from lookup to published event.
pub struct PasswordResetSaga<S> {
    store: Arc<S>,
    publisher: Publisher,
    routing_key: String,
    reset_url_base: String,
}

impl<S: UserStore> PasswordResetSaga<S> {
    pub fn new(
        store: Arc<S>,
        publisher: Publisher,
        routing_key: impl Into<String>,
        reset_url_base: impl Into<String>,
    ) -> Self {
        Self {
            store,
            publisher,
            routing_key: routing_key.into(),
            reset_url_base: reset_url_base.into(),
        }
    }

    /// Looks the user up, mints and persists a fresh reset token
    /// (overwriting any prior unconsumed one), and publishes the event the
    /// notification service sends the email from.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), ResetError> {
        debug!(email, stage = "requested", "password reset requested");

        let Some(mut user) = self.store.find_by_email(email).await? else {
            warn!(email, stage = "failed", "password reset for unknown email");
            return Err(ResetError::RecordNotFound(email.to_string()));
        };

        let token = generate_reset_token();
        user.reset_token = Some(token.clone());
        self.store.save(&user).await?;
        debug!(email, stage = "token_issued", "reset token persisted");

        let event = PasswordResetEvent {
            email: user.email.clone(),
            reset_token: token.clone(),
            reset_url: format!("{}/reset/{}", self.reset_url_base, token),
        };
        self.publisher
            .publish_json(&self.routing_key, &event)
            .await?;

        info!(
            email,
            stage = "event_published",
            routing_key = %self.routing_key,
            "password reset event published"
        );
        Ok(())
    }
}

fn generate_reset_token() -> String {
    let mut bytes = [0u8; RESET_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
