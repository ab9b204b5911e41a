//! # hashtag-events
//!
//! Event type definitions shared between the hashtag.io services.
//!
//! The user service publishes events onto the platform exchange; the
//! notification service consumes them. Both sides depend on this crate so
//! the wire contract (field names, routing keys, queue names) lives in
//! exactly one place.
//!
//! ## Design Principles
//!
//! - Events are plain serde structs with camelCase wire fields, matching
//!   the JSON the services exchange.
//! - Events carry no secrets beyond the single-use token they exist to
//!   transport.
//! - Topology names are defaults; services may override them through their
//!   environment configuration.

mod types;

pub use types::PasswordResetEvent;

/// Default exchange all platform events are published to.
pub const DEFAULT_EXCHANGE: &str = "hashtag.io";

/// Default queue the notification service consumes password emails from.
pub const PASSWORD_RESET_QUEUE: &str = "notification.email.password";

/// Routing key for forgot-password events, used by both the publishing and
/// the consuming side.
pub const PASSWORD_FORGET_ROUTING_KEY: &str = "password.forget";
