//! Event payload types.

use serde::{Deserialize, Serialize};

/// Payload of a forgot-password event.
///
/// Created by the user service when a reset is requested, consumed by the
/// notification service to dispatch the reset email. The token is also
/// persisted on the user record; the event itself is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordResetEvent {
    /// Address the reset email goes to.
    pub email: String,

    /// Single-use opaque token, 40 hex characters.
    pub reset_token: String,

    /// Frontend link embedding the token.
    pub reset_url: String,
}
