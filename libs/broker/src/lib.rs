//! # hashtag-broker
//!
//! Message broker layer for the hashtag.io services: one lazily-established
//! connection per process, idempotent topology declaration, fire-and-forget
//! publishing, and manually-acknowledged consumption.
//!
//! ## Architecture
//!
//! - [`BrokerConnection`] owns the single physical connection and channel.
//!   All other components borrow the channel through
//!   [`BrokerConnection::ensure_ready`]; none hold a connection of their own.
//! - [`TopologyManager`] declares exchanges, queues, and bindings. Declares
//!   are idempotent; a conflicting redeclaration fails with
//!   [`BrokerError::TopologyConflict`].
//! - [`Publisher`] pushes an [`Envelope`] onto an exchange with a routing
//!   key. Success means "accepted by the local channel", not "delivered".
//! - [`Subscriber`] binds a queue to a routing key and feeds deliveries to
//!   a handler one at a time, acknowledging per its [`AckPolicy`].
//!
//! The transport behind the connection is a trait seam ([`Connector`] /
//! [`Channel`]): [`AmqpConnector`] speaks AMQP via lapin, and
//! [`MemoryBroker`] provides an in-process fabric for tests and local
//! development.
//!
//! ## Error model
//!
//! Every operation returns an explicit `Result`. Connection-layer failures
//! surface as [`BrokerError::BrokerUnavailable`] to the immediate caller and
//! are never retried internally; retry and backoff belong to the caller.

mod amqp;
mod connection;
mod endpoint;
mod envelope;
mod error;
mod memory;
mod publish;
mod subscribe;
mod topology;
mod transport;

pub use amqp::AmqpConnector;
pub use connection::{BrokerConnection, ConnectionState};
pub use endpoint::{BrokerEndpoint, FRAME_MAX};
pub use envelope::{Envelope, CONTENT_TYPE_JSON};
pub use error::BrokerError;
pub use memory::MemoryBroker;
pub use publish::Publisher;
pub use subscribe::{AckPolicy, HandlerResult, Subscriber, Subscription};
pub use topology::{ExchangeKind, QueueBinding, Topology, TopologyManager};
pub use transport::{Acknowledger, Channel, Connector, Delivery};
