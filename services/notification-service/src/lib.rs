//! # hashtag-notification-service
//!
//! Responder side of the forgot-password saga: consumes
//! [`hashtag_events::PasswordResetEvent`]s from the platform exchange and
//! hands them to whatever dispatches the actual email.

pub mod config;
pub mod listener;

pub use config::Config;
pub use listener::{log_password_reset, PasswordResetListener};
