//! # hashtag-user-service
//!
//! Account records and the initiator side of the forgot-password saga.
//!
//! The HTTP controllers fronting this service, password hashing, and
//! session token issuance are external collaborators. What lives here is
//! the piece with cross-service consequences: looking up the user, minting
//! and persisting the reset token, and publishing the
//! [`hashtag_events::PasswordResetEvent`] the notification service acts on.

pub mod config;
pub mod reset;
pub mod store;

pub use config::Config;
pub use reset::{PasswordResetSaga, ResetError};
pub use store::{MemoryUserStore, StoreError, User, UserStore};
